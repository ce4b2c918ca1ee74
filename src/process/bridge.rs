//! Translates VDE instances into process definitions and drives the engine.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::{ProcessDefinition, ProcessHandle, ProcessState, ProcessSupervisor, PROCESS_GROUP};
use crate::error::{AppError, Result};

/// Why a VDE process is being registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchKind {
    /// Freshly created: the node initializes its database and keys.
    FirstRun,
    /// Found on disk at startup: the engine starts and restarts it on its own.
    Recovery,
}

impl LaunchKind {
    fn extra_flags(&self) -> &'static [&'static str] {
        match self {
            Self::FirstRun => &["-initDatabase=true", "-generateKeys=true"],
            Self::Recovery => &[],
        }
    }
}

pub struct SupervisorBridge {
    supervisor: Arc<dyn ProcessSupervisor>,
    executable: PathBuf,
    start_timeout: Duration,
    stop_timeout: Duration,
}

impl SupervisorBridge {
    pub fn new(
        supervisor: Arc<dyn ProcessSupervisor>,
        executable: PathBuf,
        start_timeout: Duration,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            supervisor,
            executable,
            start_timeout,
            stop_timeout,
        }
    }

    /// Build the definition for one VDE:
    /// `<executable> -VDEMode=true [flags] -configPath=<path> -workDir=<dir>`.
    pub fn definition(
        &self,
        name: &str,
        work_dir: &Path,
        config_path: &Path,
        kind: LaunchKind,
    ) -> ProcessDefinition {
        let mut args = vec!["-VDEMode=true".to_string()];
        args.extend(kind.extra_flags().iter().map(|flag| (*flag).to_string()));
        args.push(format!("-configPath={}", config_path.display()));
        args.push(format!("-workDir={}", work_dir.display()));

        let recovering = kind == LaunchKind::Recovery;
        ProcessDefinition {
            name: name.to_string(),
            group: PROCESS_GROUP.to_string(),
            program: self.executable.clone(),
            args,
            directory: work_dir.to_path_buf(),
            autostart: recovering,
            autorestart: recovering,
            redirect_stderr: recovering,
        }
    }

    pub async fn register(
        &self,
        name: &str,
        work_dir: &Path,
        config_path: &Path,
        kind: LaunchKind,
    ) -> Result<()> {
        let definition = self.definition(name, work_dir, config_path, kind);
        log::debug!("Registering VDE {}: {}", name, definition.command_line());
        self.supervisor.add(name, definition).await
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn ProcessHandle>> {
        self.supervisor.find(name)
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.supervisor.remove(name).is_some()
    }

    pub fn for_each(&self, visit: &mut dyn FnMut(&str, ProcessState)) {
        self.supervisor.for_each(visit);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.for_each(&mut |name, _| names.push(name.to_string()));
        names.sort();
        names
    }

    pub async fn start(&self, name: &str, wait: bool) -> Result<()> {
        let handle = self
            .find(name)
            .ok_or_else(|| AppError::instance_not_found(name))?;
        bounded(name, "start", self.start_timeout, handle.start(wait)).await
    }

    pub async fn stop(&self, name: &str, wait: bool) -> Result<()> {
        let handle = self
            .find(name)
            .ok_or_else(|| AppError::instance_not_found(name))?;
        bounded(name, "stop", self.stop_timeout, handle.stop(wait)).await
    }
}

async fn bounded(
    name: &str,
    transition: &str,
    limit: Duration,
    fut: impl Future<Output = Result<()>> + Send,
) -> Result<()> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            log::error!(
                "VDE {} did not finish {} within {}s",
                name,
                transition,
                limit.as_secs()
            );
            Err(AppError::wait_timeout(name, transition, limit.as_secs()))
        }
    }
}
