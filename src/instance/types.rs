//! Instance-related type definitions.

use std::path::PathBuf;

use serde::Serialize;

use crate::config::NodeConfig;

/// One VDE as described by its persisted configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VdeInstance {
    pub name: String,
    pub db_user: String,
    #[serde(skip_serializing)]
    pub db_password: String,
    pub port: u16,
    pub work_dir: PathBuf,
    pub config_path: PathBuf,
}

impl VdeInstance {
    pub(crate) fn from_config(name: &str, config: &NodeConfig, config_path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            db_user: config.db.user.clone(),
            db_password: config.db.password.clone(),
            port: config.http.port,
            work_dir: config.work_dir.clone(),
            config_path,
        }
    }
}
