//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout of the controller
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

    /// Default checkout location of the GitOps repository
    pub fn repository_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("repository"))
    }

    /// Default template root
    pub fn templates_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("templates"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Scratch space for transient credentials
    pub fn scratch_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("scratch"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::ControlError> {
        self.templates_dir().create().await?;
        self.logs_dir().create().await?;
        self.scratch_dir().create_private().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/autodeploy");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".autodeploy");

        Self::new(base_dir)
    }
}
