//! Tracking session registry.
//!
//! Records which endpoint tracks which path, the per-endpoint tracking mode,
//! the hash baseline of every (endpoint, path) and the watch handle armed for
//! it. Every endpoint owns one session behind its own lock; a reverse index
//! answers "who tracks this path" without visiting every session.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::hash::ContentHash;
use crate::protocol::EndpointId;
use crate::storage::Storage;
use crate::watch::{WatchHandle, WatchService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingMode {
    #[default]
    Active,
    Suspended,
}

struct TrackedFile {
    watch: Option<WatchHandle>,
    last_hash: Option<ContentHash>,
    /// Cancelled on STOP so undelivered reconcile results are dropped.
    reconcile: CancellationToken,
}

impl TrackedFile {
    fn release(self, watcher: &dyn WatchService) {
        self.reconcile.cancel();
        if let Some(handle) = self.watch {
            watcher.unwatch(handle);
        }
    }
}

#[derive(Default)]
struct EndpointSession {
    mode: TrackingMode,
    files: FxHashMap<String, TrackedFile>,
    /// Paths whose reconciliation was requested while suspended.
    deferred: FxHashSet<String>,
    closed: bool,
}

/// Result of comparing a fresh digest with the recorded baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashObservation {
    /// Digest differs; the new one was recorded.
    Changed,
    Unchanged,
    Suspended,
    Untracked,
}

/// Outcome of [`TrackingRegistry::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOutcome {
    pub was_tracked: bool,
    pub tracked_elsewhere: bool,
}

pub struct TrackingRegistry {
    sessions: DashMap<EndpointId, Arc<Mutex<EndpointSession>>>,
    trackers: DashMap<String, FxHashSet<EndpointId>>,
    watcher: Arc<dyn WatchService>,
    storage: Arc<dyn Storage>,
}

impl TrackingRegistry {
    pub fn new(watcher: Arc<dyn WatchService>, storage: Arc<dyn Storage>) -> Self {
        Self {
            sessions: DashMap::new(),
            trackers: DashMap::new(),
            watcher,
            storage,
        }
    }

    /// Runs `f` on the live session of `endpoint`, creating it on demand.
    fn with_session<T>(&self, endpoint: &EndpointId, mut f: impl FnMut(&mut EndpointSession) -> T) -> T {
        loop {
            let session = self.sessions.entry(endpoint.clone()).or_default().clone();
            let mut guard = session.lock();
            if guard.closed {
                continue;
            }
            return f(&mut guard);
        }
    }

    /// Runs `f` on the session of `endpoint` if one exists.
    fn with_existing<T>(
        &self,
        endpoint: &EndpointId,
        f: impl FnOnce(&mut EndpointSession) -> T,
    ) -> Option<T> {
        let session = self.sessions.get(endpoint).map(|entry| entry.value().clone())?;
        let mut guard = session.lock();
        if guard.closed {
            return None;
        }
        Some(f(&mut guard))
    }

    fn baseline(&self, path: &str) -> Option<ContentHash> {
        match self.storage.read(path) {
            Ok(content) => content.map(ContentHash::of),
            Err(err) => {
                debug!("no hash baseline for {path}: {err}");
                None
            }
        }
    }

    fn arm(&self, path: &str) -> Option<WatchHandle> {
        match self.watcher.watch(path) {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!("failed to watch {path}: {err}");
                None
            }
        }
    }

    fn index(&self, path: &str, endpoint: &EndpointId) {
        self.trackers
            .entry(path.to_string())
            .or_default()
            .insert(endpoint.clone());
    }

    fn unindex(&self, path: &str, endpoint: &EndpointId) {
        if let Some(mut endpoints) = self.trackers.get_mut(path) {
            endpoints.remove(endpoint);
        }
        self.trackers.remove_if(path, |_, endpoints| endpoints.is_empty());
    }

    /// Starts tracking `path` for `endpoint`. Returns `false` when it was
    /// already tracked.
    pub fn start(&self, endpoint: &EndpointId, path: &str) -> bool {
        self.with_session(endpoint, |session| {
            if session.files.contains_key(path) {
                return false;
            }
            let file = TrackedFile {
                watch: self.arm(path),
                last_hash: self.baseline(path),
                reconcile: CancellationToken::new(),
            };
            session.files.insert(path.to_string(), file);
            self.index(path, endpoint);
            true
        })
    }

    /// Stops tracking `path` for `endpoint`, leaving other endpoints alone.
    pub fn stop(&self, endpoint: &EndpointId, path: &str) -> StopOutcome {
        let was_tracked = self
            .with_existing(endpoint, |session| {
                session.deferred.remove(path);
                let file = session.files.remove(path)?;
                file.release(self.watcher.as_ref());
                self.unindex(path, endpoint);
                Some(())
            })
            .flatten()
            .is_some();
        StopOutcome {
            was_tracked,
            tracked_elsewhere: self.is_tracked(path),
        }
    }

    pub fn suspend(&self, endpoint: &EndpointId) {
        self.with_session(endpoint, |session| session.mode = TrackingMode::Suspended);
    }

    /// Reactivates `endpoint` and hands back the reconciliations deferred
    /// while it was suspended.
    pub fn resume(&self, endpoint: &EndpointId) -> Vec<String> {
        self.with_session(endpoint, |session| {
            session.mode = TrackingMode::Active;
            let mut deferred: Vec<String> = session.deferred.drain().collect();
            deferred.sort();
            deferred
        })
    }

    /// Re-keys the tracking of `old_path` under `new_path`, keeping its hash
    /// baseline. Returns `false` when `old_path` was not tracked.
    pub fn move_path(&self, endpoint: &EndpointId, old_path: &str, new_path: &str) -> bool {
        if old_path == new_path {
            return false;
        }
        self.with_existing(endpoint, |session| {
            let Some(mut file) = session.files.remove(old_path) else {
                return false;
            };
            if let Some(handle) = file.watch.take() {
                self.watcher.unwatch(handle);
            }
            file.watch = self.arm(new_path);
            if let Some(replaced) = session.files.insert(new_path.to_string(), file) {
                replaced.release(self.watcher.as_ref());
            }
            if session.deferred.remove(old_path) {
                session.deferred.insert(new_path.to_string());
            }
            self.unindex(old_path, endpoint);
            self.index(new_path, endpoint);
            true
        })
        .unwrap_or(false)
    }

    /// Forgets `endpoint` entirely and returns the paths it was tracking.
    pub fn disconnect(&self, endpoint: &EndpointId) -> Vec<String> {
        let Some((_, session)) = self.sessions.remove(endpoint) else {
            return Vec::new();
        };
        let mut guard = session.lock();
        guard.closed = true;
        let mut paths = Vec::with_capacity(guard.files.len());
        for (path, file) in guard.files.drain() {
            file.release(self.watcher.as_ref());
            self.unindex(&path, endpoint);
            paths.push(path);
        }
        guard.deferred.clear();
        paths.sort();
        paths
    }

    #[must_use]
    pub fn mode(&self, endpoint: &EndpointId) -> TrackingMode {
        self.with_existing(endpoint, |session| session.mode)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_tracking(&self, endpoint: &EndpointId, path: &str) -> bool {
        self.with_existing(endpoint, |session| session.files.contains_key(path))
            .unwrap_or(false)
    }

    /// Whether any endpoint tracks `path`.
    #[must_use]
    pub fn is_tracked(&self, path: &str) -> bool {
        self.trackers
            .get(path)
            .is_some_and(|endpoints| !endpoints.is_empty())
    }

    /// Endpoints tracking `path`, in a stable order.
    #[must_use]
    pub fn trackers_of(&self, path: &str) -> Vec<EndpointId> {
        let mut endpoints: Vec<EndpointId> = self
            .trackers
            .get(path)
            .map(|endpoints| endpoints.iter().cloned().collect())
            .unwrap_or_default();
        endpoints.sort();
        endpoints
    }

    #[must_use]
    pub fn tracked_paths(&self, endpoint: &EndpointId) -> Vec<String> {
        let mut paths = self
            .with_existing(endpoint, |session| {
                session.files.keys().cloned().collect::<Vec<_>>()
            })
            .unwrap_or_default();
        paths.sort();
        paths
    }

    /// Compares `hash` with the baseline of (endpoint, path) and records it
    /// when it differs. Suspended endpoints keep their old baseline.
    pub fn observe_hash(&self, endpoint: &EndpointId, path: &str, hash: &ContentHash) -> HashObservation {
        self.with_existing(endpoint, |session| {
            if session.mode == TrackingMode::Suspended {
                return HashObservation::Suspended;
            }
            let Some(file) = session.files.get_mut(path) else {
                return HashObservation::Untracked;
            };
            if file.last_hash.as_ref() == Some(hash) {
                return HashObservation::Unchanged;
            }
            file.last_hash = Some(hash.clone());
            HashObservation::Changed
        })
        .unwrap_or(HashObservation::Untracked)
    }

    /// Clears the baseline of (endpoint, path) after a confirmed deletion.
    /// Only [`HashObservation::Changed`] is worth reporting; a missing
    /// baseline means the deletion was already seen.
    pub fn observe_deletion(&self, endpoint: &EndpointId, path: &str) -> HashObservation {
        self.with_existing(endpoint, |session| {
            if session.mode == TrackingMode::Suspended {
                return HashObservation::Suspended;
            }
            let Some(file) = session.files.get_mut(path) else {
                return HashObservation::Untracked;
            };
            match file.last_hash.take() {
                Some(_) => HashObservation::Changed,
                None => HashObservation::Unchanged,
            }
        })
        .unwrap_or(HashObservation::Untracked)
    }

    /// Token cancelled when (endpoint, path) stops being tracked.
    #[must_use]
    pub fn reconcile_token(&self, endpoint: &EndpointId, path: &str) -> Option<CancellationToken> {
        self.with_existing(endpoint, |session| {
            session.files.get(path).map(|file| file.reconcile.clone())
        })
        .flatten()
    }

    /// Records a reconciliation for replay on RESUME when `endpoint` is
    /// suspended. Returns `true` when it was deferred.
    pub fn defer_if_suspended(&self, endpoint: &EndpointId, path: &str) -> bool {
        self.with_existing(endpoint, |session| {
            if session.mode != TrackingMode::Suspended || !session.files.contains_key(path) {
                return false;
            }
            session.deferred.insert(path.to_string());
            true
        })
        .unwrap_or(false)
    }
}
