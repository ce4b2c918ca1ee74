use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::paths::{write_private_file, DEFAULT_CONFIG_FILE, NODE_EXECUTABLE_FILE_NAME};

/// Role of this node with respect to VDE management.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Master,
    #[default]
    Worker,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub mode: Mode,
    pub work_dir: PathBuf,
    #[serde(default)]
    pub private_dir: PathBuf,
    #[serde(default)]
    pub node_executable: Option<PathBuf>,
    pub db: DbConfig,
    pub http: HttpConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub name: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_host")]
    pub host: String,
    pub port: u16,
}

/// Timing policy for supervised child processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Seconds a child must stay up before it counts as RUNNING.
    #[serde(default = "default_start_secs")]
    pub start_secs: u64,
    #[serde(default = "default_start_retries")]
    pub start_retries: u32,
    /// Grace period between SIGTERM and SIGKILL.
    #[serde(default = "default_stop_wait_secs")]
    pub stop_wait_secs: u64,
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_max_connections() -> u32 {
    5
}

fn default_http_host() -> String {
    "127.0.0.1".to_string()
}

fn default_start_secs() -> u64 {
    1
}

fn default_start_retries() -> u32 {
    3
}

fn default_stop_wait_secs() -> u64 {
    10
}

fn default_start_timeout_secs() -> u64 {
    60
}

fn default_stop_timeout_secs() -> u64 {
    60
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            start_secs: default_start_secs(),
            start_retries: default_start_retries(),
            stop_wait_secs: default_stop_wait_secs(),
            start_timeout_secs: default_start_timeout_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl SupervisorConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl NodeConfig {
    /// Read a node configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            AppError::config(format!("Failed to parse config {}: {}", path.display(), e))
        })
    }

    /// Write the configuration as TOML, readable by the owner only.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| AppError::config(e.to_string()))?;
        write_private_file(path, content.as_bytes()).map_err(|e| {
            AppError::config(format!("Failed to write config {}: {}", path.display(), e))
        })
    }

    /// Path of the node binary launched for each VDE.
    pub fn node_executable_path(&self) -> PathBuf {
        self.node_executable
            .clone()
            .unwrap_or_else(|| self.work_dir.join(NODE_EXECUTABLE_FILE_NAME))
    }
}

/// Derives per-instance configurations from the master configuration.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    master: NodeConfig,
}

impl ConfigManager {
    pub fn new(master: NodeConfig) -> Self {
        Self { master }
    }

    /// Overlay instance credentials, name, port and paths onto a copy of the
    /// master configuration. Returns the config and the file it belongs in.
    pub fn build(
        &self,
        instance_name: &str,
        db_user: &str,
        db_password: &str,
        port: u16,
        work_dir: &Path,
    ) -> (NodeConfig, PathBuf) {
        let mut config = self.master.clone();
        config.mode = Mode::Worker;
        config.work_dir = work_dir.to_path_buf();
        config.private_dir = work_dir.to_path_buf();
        config.db.user = db_user.to_string();
        config.db.password = db_password.to_string();
        config.db.name = instance_name.to_string();
        config.http.port = port;

        (config, work_dir.join(DEFAULT_CONFIG_FILE))
    }

    pub fn save(&self, config: &NodeConfig, path: &Path) -> Result<()> {
        config.save(path)
    }

    pub fn load(&self, path: &Path) -> Result<NodeConfig> {
        NodeConfig::load(path)
    }
}
