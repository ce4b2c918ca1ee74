use super::VdeManager;
use crate::config::Mode;
use crate::error::Result;
use crate::process::LaunchKind;
use crate::validation::validate_instance_name;

impl VdeManager {
    /// Register every VDE found in the workspace. The engine starts them
    /// itself and restarts them when they exit.
    ///
    /// Workers have nothing to recover and return right away.
    pub async fn init(&self) -> Result<()> {
        const OP: &str = "init";
        if self.mode != Mode::Master {
            log::debug!("Node runs as worker, skipping VDE recovery");
            return Ok(());
        }

        self.workspace.ensure_root().map_err(|e| {
            log::error!("Preparing VDE root {}: {}", self.workspace.root().display(), e);
            e.with("op", OP)
        })?;
        let names = self.workspace.instance_names().map_err(|e| {
            log::error!("Initialising VDE list at {}: {}", self.workspace.root().display(), e);
            e.with("op", OP)
        })?;

        for name in names {
            if validate_instance_name(&name).is_err() {
                log::warn!("Skipping {:?} in VDE root: not a valid VDE name", name);
                continue;
            }
            let _guard = self.locks.acquire(&name).await;
            if self.processes.find(&name).is_some() {
                continue;
            }

            let work_dir = self.workspace.instance_dir(&name);
            let config_path = self.workspace.config_path(&name);
            self.processes
                .register(&name, &work_dir, &config_path, LaunchKind::Recovery)
                .await
                .map_err(|e| {
                    log::error!("Registering VDE {}: {}", name, e);
                    e.during(OP, &name, "register")
                })?;
            log::info!("Recovered VDE {}", name);
        }
        Ok(())
    }
}
