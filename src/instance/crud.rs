use std::collections::HashMap;

use super::{VdeInstance, VdeManager};
use crate::error::{AppError, Result};
use crate::process::{find_available_port, LaunchKind};
use crate::validation::{validate_instance_name, validate_role_name};

impl VdeManager {
    /// Provision and launch a new VDE.
    ///
    /// Steps run in order: database role and database, work directory,
    /// config file, process registration, start. A failing step stops the
    /// sequence and leaves earlier steps applied. A `port` of 0 picks a free
    /// local port.
    pub async fn create_vde(
        &self,
        name: &str,
        db_user: &str,
        db_password: &str,
        port: u16,
    ) -> Result<VdeInstance> {
        const OP: &str = "create_vde";
        self.ensure_master(OP)?;
        validate_instance_name(name).map_err(|e| e.with("op", OP))?;
        validate_role_name(db_user).map_err(|e| e.during(OP, name, "validate"))?;

        let _guard = self.locks.acquire(name).await;
        if self.processes.find(name).is_some() {
            let err = AppError::instance_exists(name).with("op", OP);
            log::error!("Creating VDE: {}", err);
            return Err(err);
        }

        let port = if port == 0 {
            find_available_port().map_err(|e| e.during(OP, name, "pick_port"))?
        } else {
            port
        };

        self.database
            .create_instance_db(name, db_user, db_password)
            .await
            .map_err(|e| e.during(OP, name, "create_db"))?;

        let work_dir = self.workspace.ensure(name).map_err(|e| {
            log::error!("Creating VDE {} work directory: {}", name, e);
            e.during(OP, name, "create_dir")
        })?;

        let (config, config_path) = self
            .configs
            .build(name, db_user, db_password, port, &work_dir);
        self.configs.save(&config, &config_path).map_err(|e| {
            log::error!("Saving VDE {} config: {}", name, e);
            e.during(OP, name, "save_config")
        })?;

        self.processes
            .register(name, &work_dir, &config_path, LaunchKind::FirstRun)
            .await
            .map_err(|e| {
                log::error!("Registering VDE {} process: {}", name, e);
                e.during(OP, name, "register")
            })?;

        self.processes.start(name, true).await.map_err(|e| {
            log::error!("Starting VDE {}: {}", name, e);
            e.during(OP, name, "start")
        })?;

        log::info!("VDE {} created on port {}", name, port);
        Ok(VdeInstance::from_config(name, &config, config_path))
    }

    /// Map of every registered VDE to its engine state (`RUNNING`, `STOPPED`, ...).
    pub fn list_processes(&self) -> Result<HashMap<String, String>> {
        self.ensure_master("list_processes")?;

        let mut list = HashMap::new();
        self.processes.for_each(&mut |name, state| {
            list.insert(name.to_string(), state.to_string());
        });
        Ok(list)
    }

    /// Read back a VDE from its persisted config.
    pub fn describe_vde(&self, name: &str) -> Result<VdeInstance> {
        const OP: &str = "describe_vde";
        self.ensure_master(OP)?;
        validate_instance_name(name).map_err(|e| e.with("op", OP))?;

        let config_path = self.workspace.config_path(name);
        let config = self
            .configs
            .load(&config_path)
            .map_err(|e| e.during(OP, name, "load_config"))?;
        Ok(VdeInstance::from_config(name, &config, config_path))
    }

    /// Stop a VDE, drop its database objects and remove its work directory.
    ///
    /// The process stays registered until the directory is gone, so a failed
    /// delete can be retried.
    pub async fn delete_vde(&self, name: &str) -> Result<()> {
        const OP: &str = "delete_vde";
        self.ensure_master(OP)?;
        validate_instance_name(name).map_err(|e| e.with("op", OP))?;

        let guard = self.locks.acquire(name).await;
        if self.processes.find(name).is_some() {
            self.processes.stop(name, true).await.map_err(|e| {
                log::error!("Stopping VDE {} before delete: {}", name, e);
                e.during(OP, name, "stop")
            })?;
        }

        let config_path = self.workspace.config_path(name);
        let config = self.configs.load(&config_path).map_err(|e| {
            log::error!("Loading VDE {} config: {}", name, e);
            e.during(OP, name, "load_config")
        })?;

        // Both names go into SQL unquoted.
        validate_instance_name(&config.db.name).map_err(|e| e.during(OP, name, "load_config"))?;
        validate_role_name(&config.db.user).map_err(|e| e.during(OP, name, "load_config"))?;

        self.database
            .drop_instance_db(&config.db.name, &config.db.user)
            .await
            .map_err(|e| e.during(OP, name, "drop_db"))?;

        self.workspace.remove(name).map_err(|e| {
            log::error!("Removing VDE {} work directory: {}", name, e);
            e.during(OP, name, "remove_dir")
        })?;

        self.processes.unregister(name);
        self.locks.release(name, guard);
        log::info!("VDE {} deleted", name);
        Ok(())
    }
}
