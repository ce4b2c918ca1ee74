//! Built-in supervision engine running each VDE as a tokio child process.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt as _, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;

use super::control::{force_kill, terminate};
use super::{ProcessDefinition, ProcessHandle, ProcessState, ProcessSupervisor};
use crate::config::SupervisorConfig;
use crate::error::{AppError, Result};

/// Maximum backoff between launch attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// How long a child must stay up before it counts as RUNNING.
    pub start_secs: Duration,
    /// Relaunch attempts after exits during STARTING before going FATAL.
    pub start_retries: u32,
    /// Grace period after SIGTERM before the process group is killed.
    pub stop_wait: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            start_secs: Duration::from_secs(config.start_secs),
            start_retries: config.start_retries,
            stop_wait: Duration::from_secs(config.stop_wait_secs),
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}

fn calculate_backoff(retries: u32) -> Duration {
    let secs = 1u64 << retries.min(5); // 1, 2, 4, 8, 16, 32
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

#[derive(Debug, Default)]
struct Runtime {
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    /// Bumped on every launch and on cancellation; stale monitors compare it.
    generation: u64,
    retries: u32,
}

enum ExitAction {
    Done,
    Relaunch { generation: u64, delay: Duration },
}

struct Shared {
    definition: ProcessDefinition,
    settings: SupervisorSettings,
    state: watch::Sender<ProcessState>,
    runtime: Mutex<Runtime>,
}

impl Shared {
    fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ProcessState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            log::debug!("VDE {} {} -> {}", self.definition.name, previous, state);
        }
    }

    fn runtime(&self) -> std::sync::MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn the child and hand it to a monitor task. Leaves the state STARTING.
    ///
    /// With `pending`, the launch is a relaunch scheduled for that generation
    /// and is skipped if a stop cancelled it in the meantime.
    fn launch(self: &Arc<Self>, pending: Option<u64>) -> Result<()> {
        let definition = &self.definition;
        let mut rt = self.runtime();
        if let Some(generation) = pending {
            if rt.generation != generation || self.state() != ProcessState::Starting {
                return Ok(());
            }
        }

        let mut cmd = Command::new(&definition.program);
        cmd.args(&definition.args)
            .current_dir(&definition.directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|e| {
            AppError::process(format!(
                "Failed to spawn `{}`: {}",
                definition.command_line(),
                e
            ))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| AppError::process("Failed to get process ID"))?;

        if let Some(stdout) = child.stdout.take() {
            spawn_line_logger(stdout, definition.name.clone(), "stdout", log::Level::Info);
        }
        if let Some(stderr) = child.stderr.take() {
            let level = if definition.redirect_stderr {
                log::Level::Info
            } else {
                log::Level::Error
            };
            spawn_line_logger(stderr, definition.name.clone(), "stderr", level);
        }

        rt.pid = Some(pid);
        rt.started_at = Some(Utc::now());
        rt.generation += 1;
        let generation = rt.generation;
        self.set_state(ProcessState::Starting);
        drop(rt);

        log::info!("VDE {} spawned (pid: {})", definition.name, pid);
        tokio::spawn(supervise(Arc::clone(self), child, generation));
        Ok(())
    }

    fn promote_running(&self, generation: u64) {
        let mut rt = self.runtime();
        if rt.generation != generation || self.state() != ProcessState::Starting {
            return;
        }
        rt.retries = 0;
        self.set_state(ProcessState::Running);
        let pid = rt.pid;
        drop(rt);
        log::info!("VDE {} running (pid: {:?})", self.definition.name, pid);
    }

    /// Decide what follows a child exit. State and runtime change together
    /// under the runtime lock so a concurrent stop sees a consistent pair.
    fn on_exit(
        &self,
        generation: u64,
        status: std::io::Result<ExitStatus>,
        during_startup: bool,
    ) -> ExitAction {
        let name = &self.definition.name;
        let mut rt = self.runtime();
        if rt.generation != generation {
            return ExitAction::Done;
        }
        rt.pid = None;
        let uptime = rt
            .started_at
            .take()
            .map(|at| (Utc::now() - at).num_seconds())
            .unwrap_or_default();

        match &status {
            Ok(status) => log::info!("VDE {} exited with {} after {}s", name, status, uptime),
            Err(e) => log::warn!("VDE {} wait failed after {}s: {}", name, uptime, e),
        }

        if matches!(
            self.state(),
            ProcessState::Stopping | ProcessState::Stopped
        ) {
            self.set_state(ProcessState::Stopped);
            return ExitAction::Done;
        }

        let retries = if during_startup { rt.retries + 1 } else { 0 };
        rt.retries = retries;

        if during_startup && retries > self.settings.start_retries {
            self.set_state(ProcessState::Fatal);
            drop(rt);
            log::error!(
                "VDE {} exited during startup {} times, giving up",
                name,
                retries
            );
            return ExitAction::Done;
        }

        if !during_startup && !self.definition.autorestart {
            self.set_state(ProcessState::Exited);
            return ExitAction::Done;
        }

        self.set_state(ProcessState::Starting);
        drop(rt);
        if during_startup {
            log::warn!("VDE {} exited during startup, retry {}", name, retries);
        } else {
            log::warn!("VDE {} exited unexpectedly, restarting", name);
        }
        ExitAction::Relaunch {
            generation,
            delay: calculate_backoff(retries),
        }
    }

    async fn wait_until(
        &self,
        done: impl Fn(ProcessState) -> bool + Send,
    ) -> Result<ProcessState> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|state| done(*state))
            .await
            .map_err(|e| AppError::process(e.to_string()))?;
        Ok(state)
    }
}

async fn supervise(shared: Arc<Shared>, mut child: Child, generation: u64) {
    let early_exit = tokio::select! {
        status = child.wait() => Some(status),
        () = tokio::time::sleep(shared.settings.start_secs) => None,
    };

    let (status, during_startup) = match early_exit {
        Some(status) => (status, true),
        None => {
            shared.promote_running(generation);
            (child.wait().await, false)
        }
    };

    if let ExitAction::Relaunch { generation, delay } =
        shared.on_exit(generation, status, during_startup)
    {
        tokio::time::sleep(delay).await;
        if let Err(e) = shared.launch(Some(generation)) {
            log::error!("VDE {} relaunch failed: {}", shared.definition.name, e);
            shared.set_state(ProcessState::Fatal);
        }
    }
}

fn spawn_line_logger<R>(reader: R, name: String, stream: &'static str, level: log::Level)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            log::log!(level, "[VDE {} {}] {}", name, stream, line);
        }
    });
}

/// One supervised child.
pub struct LocalProcess {
    shared: Arc<Shared>,
    /// Serializes start/stop so check-then-launch cannot interleave.
    control: tokio::sync::Mutex<()>,
}

impl LocalProcess {
    fn new(definition: ProcessDefinition, settings: SupervisorSettings) -> Self {
        let (state, _) = watch::channel(ProcessState::Stopped);
        Self {
            shared: Arc::new(Shared {
                definition,
                settings,
                state,
                runtime: Mutex::new(Runtime::default()),
            }),
            control: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl ProcessHandle for LocalProcess {
    fn name(&self) -> &str {
        &self.shared.definition.name
    }

    fn state(&self) -> ProcessState {
        self.shared.state()
    }

    fn pid(&self) -> Option<u32> {
        self.shared.runtime().pid
    }

    async fn start(&self, wait: bool) -> Result<()> {
        {
            let _guard = self.control.lock().await;
            match self.shared.state() {
                ProcessState::Running | ProcessState::Starting => {}
                ProcessState::Stopping => {
                    return Err(AppError::process(format!(
                        "VDE {} is still stopping",
                        self.name()
                    )));
                }
                ProcessState::Stopped | ProcessState::Exited | ProcessState::Fatal => {
                    self.shared.runtime().retries = 0;
                    if let Err(e) = self.shared.launch(None) {
                        self.shared.set_state(ProcessState::Fatal);
                        return Err(e);
                    }
                }
            }
        }

        if !wait {
            return Ok(());
        }

        match self
            .shared
            .wait_until(|state| state != ProcessState::Starting)
            .await?
        {
            ProcessState::Fatal | ProcessState::Exited => Err(AppError::process(format!(
                "VDE {} failed to start",
                self.name()
            ))),
            _ => Ok(()),
        }
    }

    async fn stop(&self, wait: bool) -> Result<()> {
        {
            let _guard = self.control.lock().await;
            let signal = {
                let mut rt = self.shared.runtime();
                match self.shared.state() {
                    ProcessState::Running | ProcessState::Starting => match rt.pid {
                        Some(pid) => {
                            self.shared.set_state(ProcessState::Stopping);
                            Some((pid, rt.generation))
                        }
                        None => {
                            // Waiting out a relaunch backoff: cancel it.
                            rt.generation += 1;
                            self.shared.set_state(ProcessState::Stopped);
                            None
                        }
                    },
                    ProcessState::Stopping => None,
                    ProcessState::Stopped | ProcessState::Exited | ProcessState::Fatal => {
                        return Ok(());
                    }
                }
            };

            if let Some((pid, generation)) = signal {
                if let Err(e) = terminate(pid) {
                    log::warn!("{e}, force killing VDE {}", self.name());
                    if let Err(e) = force_kill(pid) {
                        log::error!("Failed to force kill PID {pid}: {e}");
                    }
                }
                spawn_kill_escalation(Arc::clone(&self.shared), pid, generation);
            }
        }

        if wait {
            self.shared
                .wait_until(|state| {
                    !matches!(
                        state,
                        ProcessState::Running | ProcessState::Starting | ProcessState::Stopping
                    )
                })
                .await?;
        }
        Ok(())
    }
}

fn spawn_kill_escalation(shared: Arc<Shared>, pid: u32, generation: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(shared.settings.stop_wait).await;
        let still_stopping = shared.runtime().generation == generation
            && shared.state() == ProcessState::Stopping;
        if still_stopping {
            log::warn!(
                "VDE {} (pid {}) did not exit within {}s, force killing",
                shared.definition.name,
                pid,
                shared.settings.stop_wait.as_secs()
            );
            if let Err(e) = force_kill(pid) {
                log::error!("Failed to force kill PID {pid}: {e}");
            }
        }
    });
}

/// In-process supervision engine.
pub struct LocalSupervisor {
    processes: RwLock<HashMap<String, Arc<LocalProcess>>>,
    settings: SupervisorSettings,
}

impl LocalSupervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self {
            processes: RwLock::new(HashMap::new()),
            settings,
        }
    }
}

impl Default for LocalSupervisor {
    fn default() -> Self {
        Self::new(SupervisorSettings::default())
    }
}

#[async_trait]
impl ProcessSupervisor for LocalSupervisor {
    async fn add(&self, name: &str, definition: ProcessDefinition) -> Result<()> {
        let autostart = definition.autostart;
        let process = Arc::new(LocalProcess::new(definition, self.settings));

        let replaced = {
            let mut procs = self.processes.write().unwrap_or_else(|e| e.into_inner());
            procs.insert(name.to_string(), Arc::clone(&process))
        };
        if replaced.is_some() {
            log::warn!("Replaced process definition for VDE {}", name);
        }

        if autostart {
            if let Err(e) = process.start(false).await {
                log::error!("Autostart of VDE {} failed: {}", name, e);
            }
        }
        Ok(())
    }

    fn find(&self, name: &str) -> Option<Arc<dyn ProcessHandle>> {
        let procs = self.processes.read().unwrap_or_else(|e| e.into_inner());
        procs
            .get(name)
            .map(|process| Arc::clone(process) as Arc<dyn ProcessHandle>)
    }

    fn remove(&self, name: &str) -> Option<Arc<dyn ProcessHandle>> {
        let mut procs = self.processes.write().unwrap_or_else(|e| e.into_inner());
        procs
            .remove(name)
            .map(|process| process as Arc<dyn ProcessHandle>)
    }

    fn for_each(&self, visit: &mut dyn FnMut(&str, ProcessState)) {
        let entries: Vec<(String, ProcessState)> = {
            let procs = self.processes.read().unwrap_or_else(|e| e.into_inner());
            procs
                .iter()
                .map(|(name, process)| (name.clone(), process.state()))
                .collect()
        };
        for (name, state) in &entries {
            visit(name, *state);
        }
    }
}
