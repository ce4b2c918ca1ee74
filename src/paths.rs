//! Centralized path utilities and the per-instance workspace layout.
//!
//! Layout under the master work directory:
//! - configs/{name}/            - working directory of one VDE
//! - configs/{name}/config.toml - its persisted configuration

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{AppError, Result};

/// Folder under the master work directory holding one directory per VDE.
pub const CHILD_FOLDER: &str = "configs";

/// File name of a node configuration inside its work directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Default node binary name, resolved against the master work directory.
pub const NODE_EXECUTABLE_FILE_NAME: &str = "vde-node";

/// Get the default master config path (~/.vde_master/config.toml).
pub fn default_config_path() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| AppError::config("Cannot find home directory"))?;
    Ok(home.join(".vde_master").join(DEFAULT_CONFIG_FILE))
}

/// Create a single directory readable by the owner only.
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt as _;
        builder.mode(0o700);
    }
    builder.create(path)
}

/// Write a file that only the owner can read, replacing any previous content.
pub(crate) fn write_private_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(content)?;
    file.sync_all()
}

/// Filesystem side of VDE provisioning: one directory per instance.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Workspace rooted at `<work_dir>/configs`.
    pub fn new(work_dir: &Path) -> Self {
        Self {
            root: work_dir.join(CHILD_FOLDER),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the directory of an instance.
    pub fn instance_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Get the persisted config path of an instance.
    pub fn config_path(&self, name: &str) -> PathBuf {
        self.instance_dir(name).join(DEFAULT_CONFIG_FILE)
    }

    /// Make sure the workspace root exists.
    pub fn ensure_root(&self) -> Result<()> {
        if let Some(parent) = self.root.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::io(format!(
                    "Failed to create work dir {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        self.ensure_dir(&self.root)
    }

    /// Make sure the instance directory and the root above it exist.
    /// Succeeds if they already do.
    pub fn ensure(&self, name: &str) -> Result<PathBuf> {
        self.ensure_root()?;
        let dir = self.instance_dir(name);
        self.ensure_dir(&dir)?;
        Ok(dir)
    }

    fn ensure_dir(&self, dir: &Path) -> Result<()> {
        if dir.is_dir() {
            return Ok(());
        }
        match create_private_dir(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
            Err(e) => {
                log::error!("Failed to create directory {:?}: {}", dir, e);
                Err(AppError::io(format!(
                    "Failed to create directory {}: {}",
                    dir.display(),
                    e
                )))
            }
        }
    }

    /// Remove an instance directory and everything in it.
    pub fn remove(&self, name: &str) -> Result<()> {
        let dir = self.instance_dir(name);
        if !dir.exists() {
            return Ok(());
        }
        fs::remove_dir_all(&dir).map_err(|e| {
            AppError::io(format!("Failed to remove {}: {}", dir.display(), e))
        })
    }

    /// Names of all instance directories, sorted.
    pub fn instance_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_dir() {
                continue;
            }
            match entry.file_name().to_str() {
                Some(name) => names.push(name.to_string()),
                None => log::warn!("Skipping non UTF-8 workspace entry {:?}", entry.path()),
            }
        }
        names.sort();
        Ok(names)
    }
}
