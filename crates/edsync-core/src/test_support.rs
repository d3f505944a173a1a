//! In-memory doubles shared across unit tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Result, SyncError};
use crate::protocol::{EndpointId, FileStateUpdate, Problem, ReconcileResult};
use crate::reconcile::{Analysis, Analyzer, AnalyzerScope, ReconcileChannel};
use crate::storage::Storage;
use crate::transport::{Outbound, Transport};
use crate::watch::{WatchHandle, WatchService};

pub(crate) fn temp_dir(prefix: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("{prefix}-{stamp}-{seq}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub(crate) fn endpoint(id: &str) -> EndpointId {
    EndpointId::new(id)
}

/// Storage kept in a map; folders are implied by file paths plus explicit
/// `add_dir` calls.
#[derive(Default)]
pub(crate) struct MemoryStorage {
    files: Mutex<FxHashMap<String, String>>,
    dirs: Mutex<FxHashSet<String>>,
    failing_writes: Mutex<FxHashSet<String>>,
}

impl MemoryStorage {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn with_project(project: &str) -> Arc<Self> {
        let storage = Self::new();
        storage.add_dir(project);
        storage
    }

    pub(crate) fn add_dir(&self, path: &str) {
        self.dirs.lock().insert(path.to_string());
    }

    pub(crate) fn remove_dir(&self, path: &str) {
        self.dirs.lock().remove(path);
        let prefix = format!("{path}/");
        self.files.lock().retain(|file, _| !file.starts_with(&prefix));
    }

    pub(crate) fn put(&self, path: &str, content: &str) {
        self.files.lock().insert(path.to_string(), content.to_string());
    }

    pub(crate) fn get(&self, path: &str) -> Option<String> {
        self.files.lock().get(path).cloned()
    }

    pub(crate) fn remove(&self, path: &str) {
        self.files.lock().remove(path);
    }

    /// Makes writes to `path` fail until [`MemoryStorage::heal`] is called.
    pub(crate) fn fail_writes_to(&self, path: &str) {
        self.failing_writes.lock().insert(path.to_string());
    }

    pub(crate) fn heal(&self) {
        self.failing_writes.lock().clear();
    }

    pub(crate) fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.lock().keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl Storage for MemoryStorage {
    fn read(&self, path: &str) -> Result<Option<String>> {
        Ok(self.get(path))
    }

    fn write(&self, path: &str, content: &str) -> Result<()> {
        if self.failing_writes.lock().contains(path) {
            return Err(SyncError::ServerFailure(format!("disk full writing '{path}'")));
        }
        self.put(path, content);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut files = self.files.lock();
        let content = files
            .remove(from)
            .ok_or_else(|| SyncError::NotFound(from.to_string()))?;
        files.insert(to.to_string(), content);
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.remove(path);
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.files.lock().contains_key(path) || self.is_dir(path)
    }

    fn is_dir(&self, path: &str) -> bool {
        if self.dirs.lock().contains(path) {
            return true;
        }
        let prefix = format!("{path}/");
        self.files.lock().keys().any(|file| file.starts_with(&prefix))
    }
}

/// Transport that records every message in send order.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    sent: Mutex<Vec<(EndpointId, Outbound)>>,
}

impl RecordingTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn sent(&self) -> Vec<(EndpointId, Outbound)> {
        self.sent.lock().clone()
    }

    pub(crate) fn clear(&self) {
        self.sent.lock().clear();
    }

    pub(crate) fn file_states(&self, endpoint: &EndpointId) -> Vec<FileStateUpdate> {
        self.sent
            .lock()
            .iter()
            .filter(|(target, _)| target == endpoint)
            .filter_map(|(_, message)| match message {
                Outbound::FileStateChanged(update) => Some(update.clone()),
                Outbound::ReconcileStateChanged { .. } => None,
            })
            .collect()
    }

    pub(crate) fn reconciles(&self, endpoint: &EndpointId) -> Vec<ReconcileResult> {
        self.sent
            .lock()
            .iter()
            .filter(|(target, _)| target == endpoint)
            .filter_map(|(_, message)| match message {
                Outbound::ReconcileStateChanged { result, .. } => Some(result.clone()),
                Outbound::FileStateChanged(_) => None,
            })
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, endpoint: &EndpointId, message: Outbound) {
        self.sent.lock().push((endpoint.clone(), message));
    }
}

/// Watch service that only keeps track of armed handles.
#[derive(Default)]
pub(crate) struct RecordingWatcher {
    next: AtomicU64,
    armed: Mutex<FxHashMap<WatchHandle, String>>,
}

impl RecordingWatcher {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn armed(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.armed.lock().values().cloned().collect();
        paths.sort();
        paths
    }
}

impl WatchService for RecordingWatcher {
    fn watch(&self, path: &str) -> Result<WatchHandle> {
        let handle = WatchHandle(self.next.fetch_add(1, Ordering::Relaxed));
        self.armed.lock().insert(handle, path.to_string());
        Ok(handle)
    }

    fn unwatch(&self, handle: WatchHandle) {
        self.armed.lock().remove(&handle);
    }
}

/// Analyzer reporting one warning that echoes the analyzed content.
pub(crate) struct EchoAnalyzer {
    pub(crate) suffix: &'static str,
    pub(crate) scope: AnalyzerScope,
    pub(crate) channel: ReconcileChannel,
    pub(crate) runs: Mutex<Vec<String>>,
}

impl EchoAnalyzer {
    pub(crate) fn new(suffix: &'static str, scope: AnalyzerScope) -> Arc<Self> {
        Arc::new(Self {
            suffix,
            scope,
            channel: ReconcileChannel::Generic,
            runs: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn runs(&self) -> Vec<String> {
        self.runs.lock().clone()
    }
}

impl Analyzer for EchoAnalyzer {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn applies_to(&self, path: &str) -> bool {
        path.ends_with(self.suffix)
    }

    fn scope(&self) -> AnalyzerScope {
        self.scope
    }

    fn channel(&self) -> ReconcileChannel {
        self.channel
    }

    fn reconcile(&self, _path: &str, content: &str) -> Result<Analysis> {
        self.runs.lock().push(content.to_string());
        if content.is_empty() {
            return Err(SyncError::ServerFailure("empty content".to_string()));
        }
        Ok(Analysis {
            problems: vec![Problem::warning(content, 0, content.chars().count())],
            highlighted_positions: Vec::new(),
        })
    }
}
