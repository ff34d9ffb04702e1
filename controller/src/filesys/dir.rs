//! Directory operations

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::ControlError;
use crate::filesys::file::File;

/// Relative contents of a directory tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeListing {
    /// Relative paths of regular files
    pub files: BTreeSet<PathBuf>,

    /// Relative paths of directories, parents before children
    pub dirs: BTreeSet<PathBuf>,
}

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), ControlError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Create the directory readable by the owner only (0o700 on Unix)
    pub async fn create_private(&self) -> Result<(), ControlError> {
        self.create().await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o700)).await?;
        }
        Ok(())
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), ControlError> {
        if self.exists().await {
            fs::remove_dir_all(&self.path).await?;
        }
        Ok(())
    }

    /// Recursively list files and directories relative to this directory.
    ///
    /// Symlinks are not followed.
    pub async fn walk(&self) -> Result<TreeListing, ControlError> {
        let mut listing = TreeListing::default();
        let mut pending = vec![PathBuf::new()];

        while let Some(relative) = pending.pop() {
            let mut entries = fs::read_dir(self.path.join(&relative)).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let child = relative.join(entry.file_name());
                if file_type.is_dir() {
                    listing.dirs.insert(child.clone());
                    pending.push(child);
                } else if file_type.is_file() {
                    listing.files.insert(child);
                }
            }
        }

        Ok(listing)
    }

    /// Get a file within this directory
    pub fn file(&self, relative: impl AsRef<Path>) -> File {
        File::new(self.path.join(relative))
    }

    /// Get a subdirectory
    pub fn subdir(&self, relative: impl AsRef<Path>) -> Dir {
        Dir::new(self.path.join(relative))
    }

    /// Create a uniquely named private directory below this one
    pub async fn create_temp_dir(&self, prefix: &str) -> Result<Dir, ControlError> {
        let temp_dir = self.subdir(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        temp_dir.create_private().await?;
        Ok(temp_dir)
    }
}
