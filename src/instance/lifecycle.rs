use std::sync::Arc;

use super::VdeManager;
use crate::error::{AppError, Result};
use crate::process::{ProcessHandle, ProcessState};

impl VdeManager {
    pub async fn start_vde(&self, name: &str) -> Result<()> {
        const OP: &str = "start_vde";
        self.ensure_master(OP)?;

        let _guard = self.locks.acquire(name).await;
        let handle = self.registered(OP, name)?;
        let state = handle.state();
        if !state.can_start() {
            let err = AppError::invalid_state(name, state).with("op", OP);
            log::error!("Starting VDE: {}", err);
            return Err(err);
        }

        self.processes.start(name, true).await.map_err(|e| {
            log::error!("Starting VDE {}: {}", name, e);
            e.with("op", OP)
        })?;
        log::info!("VDE {} started", name);
        Ok(())
    }

    pub async fn stop_vde(&self, name: &str) -> Result<()> {
        const OP: &str = "stop_vde";
        self.ensure_master(OP)?;

        let _guard = self.locks.acquire(name).await;
        let handle = self.registered(OP, name)?;
        let state = handle.state();
        if !state.can_stop() {
            let err = AppError::invalid_state(name, state).with("op", OP);
            log::error!("Stopping VDE: {}", err);
            return Err(err);
        }

        self.processes.stop(name, true).await.map_err(|e| {
            log::error!("Stopping VDE {}: {}", name, e);
            e.with("op", OP)
        })?;
        log::info!("VDE {} stopped", name);
        Ok(())
    }

    /// Stop the VDE if it is up, then start it again.
    pub async fn restart_vde(&self, name: &str) -> Result<()> {
        const OP: &str = "restart_vde";
        self.ensure_master(OP)?;

        let _guard = self.locks.acquire(name).await;
        let handle = self.registered(OP, name)?;
        let state = handle.state();
        if state == ProcessState::Stopping {
            let err = AppError::invalid_state(name, state).with("op", OP);
            log::error!("Restarting VDE: {}", err);
            return Err(err);
        }

        if state.can_stop() {
            self.processes
                .stop(name, true)
                .await
                .map_err(|e| e.during(OP, name, "stop"))?;
        }
        self.processes.start(name, true).await.map_err(|e| {
            log::error!("Restarting VDE {}: {}", name, e);
            e.during(OP, name, "start")
        })?;
        log::info!("VDE {} restarted", name);
        Ok(())
    }

    /// Stop every registered VDE, waiting for each. Failures are logged.
    pub async fn shutdown(&self) {
        for name in self.processes.names() {
            let _guard = self.locks.acquire(&name).await;
            let Some(handle) = self.processes.find(&name) else {
                continue;
            };
            if !handle.state().can_stop() {
                continue;
            }
            match self.processes.stop(&name, true).await {
                Ok(()) => log::info!("VDE {} stopped", name),
                Err(e) => log::error!("Stopping VDE {} on shutdown: {}", name, e),
            }
        }
    }

    fn registered(&self, op: &str, name: &str) -> Result<Arc<dyn ProcessHandle>> {
        self.processes.find(name).ok_or_else(|| {
            let err = AppError::instance_not_found(name).with("op", op);
            log::error!("Finding VDE process: {}", err);
            err
        })
    }
}
