//! Tunables of the synchronization core.

use std::time::Duration;

/// Default quiet period before a deletion is confirmed.
pub const DEFAULT_DELETE_DEBOUNCE: Duration = Duration::from_millis(1000);
/// Default folder, relative to a project, holding shadow copies.
pub const DEFAULT_SHADOW_DIR: &str = ".edsync/working-copies";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Project-relative folder for shadow copies.
    pub shadow_dir: String,
    pub delete_debounce: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            shadow_dir: DEFAULT_SHADOW_DIR.to_string(),
            delete_debounce: DEFAULT_DELETE_DEBOUNCE,
        }
    }
}
