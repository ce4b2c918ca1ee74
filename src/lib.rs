//! Lifecycle manager for Virtual Dedicated Ecosystems (VDEs).
//!
//! A master node provisions each VDE with its own database role and
//! database, a work directory holding a derived node config, and a
//! supervised node process.

mod config;
mod database;
mod error;
mod instance;
mod paths;
mod process;
mod validation;

use std::path::Path;
use std::sync::Arc;

pub use config::{ConfigManager, DbConfig, HttpConfig, Mode, NodeConfig, SupervisorConfig};
pub use database::{DatabaseProvisioner, PgExecutor, SqlExecutor};
pub use error::{AppError, ErrorKind, Result};
pub use instance::{VdeInstance, VdeManager};
pub use paths::{default_config_path, Workspace};
pub use process::{
    LaunchKind, LocalSupervisor, ProcessDefinition, ProcessHandle, ProcessState,
    ProcessSupervisor, SupervisorBridge, SupervisorSettings, PROCESS_GROUP,
};

/// Run a node until Ctrl-C: recover VDEs, then stop them all on exit.
pub async fn run(config_path: &Path) -> Result<()> {
    let config = NodeConfig::load(config_path)?;
    log::info!(
        "Starting node in {:?} mode from {}",
        config.mode,
        config_path.display()
    );

    let executor = Arc::new(PgExecutor::connect(&config.db).await?);
    let supervisor = Arc::new(LocalSupervisor::new(SupervisorSettings::from_config(
        &config.supervisor,
    )));
    let manager = VdeManager::new(config, executor, supervisor);
    manager.init().await?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::other(format!("Failed to listen for Ctrl-C: {}", e)))?;

    log::info!("Shutting down, stopping VDEs");
    manager.shutdown().await;
    Ok(())
}
