//! VDE instance management.
//!
//! Layout under the master work directory:
//! - configs/{name}/             - work directory of the VDE node
//! - configs/{name}/config.toml  - its configuration, derived from the master's
//!
//! Each VDE also owns a database role `db_user` and a database `{name}`.

mod crud;
mod lifecycle;
mod recovery;
mod types;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

use crate::config::{ConfigManager, Mode, NodeConfig};
use crate::database::{DatabaseProvisioner, SqlExecutor};
use crate::error::{AppError, Result};
use crate::paths::Workspace;
use crate::process::{ProcessSupervisor, SupervisorBridge};

pub use types::VdeInstance;

/// Per-name async locks held across check-then-act sequences.
#[derive(Default)]
struct InstanceLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl InstanceLocks {
    async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Unlock `name` and drop its entry unless another task is waiting on it.
    fn release(&self, name: &str, guard: OwnedMutexGuard<()>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        drop(guard);
        if locks
            .get(name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(name);
        }
    }
}

/// Creates, supervises and tears down the VDEs of a master node.
pub struct VdeManager {
    mode: Mode,
    workspace: Workspace,
    database: DatabaseProvisioner,
    configs: ConfigManager,
    processes: SupervisorBridge,
    locks: InstanceLocks,
}

impl VdeManager {
    pub fn new(
        master: NodeConfig,
        executor: Arc<dyn SqlExecutor>,
        supervisor: Arc<dyn ProcessSupervisor>,
    ) -> Self {
        let processes = SupervisorBridge::new(
            supervisor,
            master.node_executable_path(),
            master.supervisor.start_timeout(),
            master.supervisor.stop_timeout(),
        );
        Self {
            mode: master.mode,
            workspace: Workspace::new(&master.work_dir),
            database: DatabaseProvisioner::new(executor),
            configs: ConfigManager::new(master),
            processes,
            locks: InstanceLocks::default(),
        }
    }

    fn ensure_master(&self, op: &str) -> Result<()> {
        if self.mode == Mode::Master {
            return Ok(());
        }
        let err = AppError::wrong_mode(op);
        log::error!("{}: {}", op, err);
        Err(err)
    }
}
