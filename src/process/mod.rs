//! Process supervision: the engine contract, the built-in engine and the
//! bridge that turns VDE instances into supervised processes.

mod bridge;
mod control;
mod local;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

pub use bridge::{LaunchKind, SupervisorBridge};
pub(crate) use control::find_available_port;
pub use local::{LocalSupervisor, SupervisorSettings};

/// Group tag attached to every VDE process definition.
pub const PROCESS_GROUP: &str = "vdeMaster";

/// Run state of a supervised process, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Exited,
    Fatal,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Exited => "EXITED",
            Self::Fatal => "FATAL",
        }
    }

    /// States from which a start request is accepted.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Stopped | Self::Exited | Self::Fatal)
    }

    /// States from which a stop request is accepted.
    pub fn can_stop(&self) -> bool {
        matches!(self, Self::Running | Self::Starting)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the engine needs to launch and supervise one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDefinition {
    pub name: String,
    pub group: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Working directory of the child.
    pub directory: PathBuf,
    pub autostart: bool,
    pub autorestart: bool,
    pub redirect_stderr: bool,
}

impl ProcessDefinition {
    /// The command line as a single string: `<program> <args...>`.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// A live process managed by the engine.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> ProcessState;

    fn pid(&self) -> Option<u32>;

    /// Launch the process. With `wait`, return once it left STARTING.
    async fn start(&self, wait: bool) -> Result<()>;

    /// Stop the process. With `wait`, return once it is STOPPED.
    /// Stopping a process that is not running is a no-op.
    async fn stop(&self, wait: bool) -> Result<()>;
}

/// The process-supervision engine.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Register a process, replacing any previous one with the same name.
    /// Processes marked `autostart` are launched by the engine itself.
    async fn add(&self, name: &str, definition: ProcessDefinition) -> Result<()>;

    fn find(&self, name: &str) -> Option<Arc<dyn ProcessHandle>>;

    /// Forget a process. It is expected to be stopped already.
    fn remove(&self, name: &str) -> Option<Arc<dyn ProcessHandle>>;

    fn for_each(&self, visit: &mut dyn FnMut(&str, ProcessState));
}
