//! Persistent storage backend for original files and shadow copies.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};
use crate::path::normalize;

/// Read/write access to workspace files by workspace path.
pub trait Storage: Send + Sync {
    /// Reads a text file; `Ok(None)` when it does not exist.
    fn read(&self, path: &str) -> Result<Option<String>>;

    /// Writes a text file, creating parent folders.
    fn write(&self, path: &str, content: &str) -> Result<()>;

    /// Moves a file, replacing any existing target.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Deletes a file. Deleting a missing file succeeds.
    fn delete(&self, path: &str) -> Result<()>;

    fn exists(&self, path: &str) -> bool;

    fn is_dir(&self, path: &str) -> bool;
}

/// [`Storage`] rooted at a directory of the local filesystem.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a workspace path to its location on disk.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let normalized = normalize(path).ok_or_else(|| SyncError::NotFound(path.to_string()))?;
        Ok(self.root.join(&normalized[1..]))
    }
}

impl Storage for FsStorage {
    fn read(&self, path: &str) -> Result<Option<String>> {
        let location = self.resolve(path)?;
        match fs::read_to_string(&location) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SyncError::io(format!("failed to read '{path}'"), &err)),
        }
    }

    fn write(&self, path: &str, content: &str) -> Result<()> {
        let location = self.resolve(path)?;
        if let Some(parent) = location.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| SyncError::io(format!("failed to create folder for '{path}'"), &err))?;
        }
        fs::write(&location, content)
            .map_err(|err| SyncError::io(format!("failed to write '{path}'"), &err))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| SyncError::io(format!("failed to create folder for '{to}'"), &err))?;
        }
        fs::rename(&source, &target)
            .map_err(|err| SyncError::io(format!("failed to move '{from}' to '{to}'"), &err))
    }

    fn delete(&self, path: &str) -> Result<()> {
        let location = self.resolve(path)?;
        match fs::remove_file(&location) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SyncError::io(format!("failed to delete '{path}'"), &err)),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_ok_and(|location| location.exists())
    }

    fn is_dir(&self, path: &str) -> bool {
        self.resolve(path).is_ok_and(|location| location.is_dir())
    }
}
