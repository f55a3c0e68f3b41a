//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Name of the per-application record inside a project directory
pub const APP_RECORD_FILE: &str = "dockhand.yml";

/// Name of the append-only diagnostic log inside a project directory
pub const DIAGNOSTIC_LOG_FILE: &str = "dockhand.logs.txt";

/// Operator-level storage (settings, tracing logs, ssh control sockets)
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Get the directory holding ssh control sockets
    pub fn control_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("cm"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::DockhandError> {
        self.logs_dir().create().await?;
        self.control_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let base_dir = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dockhand");

        Self::new(base_dir)
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// Paths inside the application's project directory
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    /// Project root (build context)
    pub root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The application record
    pub fn record_file(&self) -> File {
        File::new(self.root.join(APP_RECORD_FILE))
    }

    /// The append-only diagnostic log for failed stages
    pub fn diagnostic_log(&self) -> File {
        File::new(self.root.join(DIAGNOSTIC_LOG_FILE))
    }

    /// A file relative to the project root
    pub fn file(&self, name: &str) -> File {
        File::new(self.root.join(name))
    }
}
