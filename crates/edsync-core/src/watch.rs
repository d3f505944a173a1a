//! Filesystem watch seam.
//!
//! The registry arms one watch per (endpoint, path); implementations are
//! free to share the underlying OS watch between handles.

use crate::error::Result;

/// Identifies one armed watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    /// Created or modified.
    Changed,
    Removed,
}

/// Raw callback delivered by a watcher for a workspace path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: String,
    pub kind: WatchEventKind,
}

impl WatchEvent {
    pub fn changed(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: WatchEventKind::Changed,
        }
    }

    pub fn removed(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: WatchEventKind::Removed,
        }
    }
}

pub trait WatchService: Send + Sync {
    /// Starts watching `path`. Events are delivered out of band.
    fn watch(&self, path: &str) -> Result<WatchHandle>;

    /// Releases a handle returned by [`WatchService::watch`].
    fn unwatch(&self, handle: WatchHandle);
}
