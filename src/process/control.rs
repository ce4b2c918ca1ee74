//! Platform-specific signalling of supervised children.
//!
//! Children are spawned as leaders of their own process group, so signals
//! reach anything the node binary forks as well.

use crate::error::{AppError, Result};

/// Ask a child to shut down (SIGTERM to its process group).
#[cfg(unix)]
pub fn terminate(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let target = Pid::from_raw(pid as i32);
    killpg(target, Signal::SIGTERM).or_else(|group_err| {
        kill(target, Signal::SIGTERM).map_err(|e| {
            AppError::process(format!(
                "Failed to send SIGTERM to PID {} (killpg failed: {}): {}",
                pid, group_err, e
            ))
        })
    })
}

#[cfg(unix)]
pub fn force_kill(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::{getpgid, Pid};

    let target = Pid::from_raw(pid as i32);
    match getpgid(Some(target)) {
        Ok(pgid) => killpg(pgid, Signal::SIGKILL).map_err(|e| {
            AppError::process(format!(
                "Failed to kill process group {} (from pid {}): {}",
                pgid.as_raw(),
                pid,
                e
            ))
        }),
        Err(e) => kill(target, Signal::SIGKILL).map_err(|kill_err| {
            AppError::process(format!(
                "Failed to kill process {} (getpgid failed: {}): {}",
                pid, e, kill_err
            ))
        }),
    }
}

#[cfg(not(unix))]
pub fn terminate(pid: u32) -> Result<()> {
    taskkill(pid, false)
}

#[cfg(not(unix))]
pub fn force_kill(pid: u32) -> Result<()> {
    taskkill(pid, true)
}

#[cfg(not(unix))]
fn taskkill(pid: u32, force: bool) -> Result<()> {
    let pid_arg = pid.to_string();
    let mut args = vec!["/PID", pid_arg.as_str(), "/T"];
    if force {
        args.push("/F");
    }
    let output = std::process::Command::new("taskkill")
        .args(&args)
        .output()
        .map_err(|e| AppError::process(format!("Failed to run taskkill: {e}")))?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr.trim();
    Err(AppError::process(format!(
        "taskkill failed for pid {}: {}",
        pid,
        if detail.is_empty() { "(no output)" } else { detail }
    )))
}

/// Pick a free local TCP port.
pub(crate) fn find_available_port() -> Result<u16> {
    portpicker::pick_unused_port()
        .ok_or_else(|| AppError::process("No free local port available"))
}
