//! Application paths management.

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Manages all application paths following platform conventions.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub config_file: PathBuf,
    pub database_file: PathBuf,
    pub blob_dir: PathBuf,
}

impl AppPaths {
    /// Create paths using platform-specific directories.
    pub fn new() -> Option<Self> {
        let proj_dirs = ProjectDirs::from("dev", "kiln", "kiln")?;

        let config_dir = proj_dirs.config_dir().to_path_buf();
        let data_dir = proj_dirs.data_dir().to_path_buf();

        Some(Self::with_dirs(config_dir, data_dir))
    }

    /// Build paths from explicit config and data directories.
    pub fn with_dirs(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            config_file: config_dir.join("config.toml"),
            database_file: data_dir.join("kiln.db"),
            blob_dir: data_dir.join("blobs"),
            config_dir,
            data_dir,
        }
    }

    /// Point data paths at a different data directory.
    pub fn relocate_data(mut self, data_dir: &Path) -> Self {
        self.database_file = data_dir.join("kiln.db");
        self.blob_dir = data_dir.join("blobs");
        self.data_dir = data_dir.to_path_buf();
        self
    }

    /// Create all necessary directories.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.blob_dir)?;
        Ok(())
    }

    /// Check if kiln has been initialized.
    pub fn is_initialized(&self) -> bool {
        self.config_file.exists() && self.database_file.exists()
    }
}
