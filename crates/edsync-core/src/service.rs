//! Entry point wiring the registry, the working copy store, the change
//! detector and the reconciliation trigger together.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::detector::ChangeDetector;
use crate::edit::EditOperation;
use crate::error::{Result, SyncError};
use crate::events::{self, EventSender, SyncEvent};
use crate::path::normalize;
use crate::protocol::{EndpointId, FileTrackingOperation, ReconcileResult, TrackingOperationKind};
use crate::reconcile::{Analyzer, ReconcileTrigger};
use crate::registry::TrackingRegistry;
use crate::settings::SyncSettings;
use crate::storage::Storage;
use crate::transport::Transport;
use crate::watch::{WatchEvent, WatchService};
use crate::working_copy::{DiscardOutcome, EditOutcome, WorkingCopyStore};

/// Synchronization core shared by every connected endpoint.
pub struct SyncService {
    registry: Arc<TrackingRegistry>,
    store: Arc<WorkingCopyStore>,
    detector: Arc<ChangeDetector>,
    trigger: Arc<ReconcileTrigger>,
    events: EventSender,
    shutdown: CancellationToken,
    reconciler: JoinHandle<()>,
}

impl SyncService {
    /// Builds the service and spawns its reconcile loop on the current Tokio
    /// runtime.
    pub fn new(
        settings: &SyncSettings,
        storage: Arc<dyn Storage>,
        watcher: Arc<dyn WatchService>,
        transport: Arc<dyn Transport>,
        analyzers: Vec<Arc<dyn Analyzer>>,
    ) -> Self {
        let (sender, receiver) = events::channel();
        let registry = Arc::new(TrackingRegistry::new(watcher, storage.clone()));
        let store = Arc::new(WorkingCopyStore::new(storage.clone(), settings, sender.clone()));
        let detector = Arc::new(ChangeDetector::new(
            registry.clone(),
            storage,
            transport.clone(),
            settings.delete_debounce,
        ));
        let trigger = Arc::new(ReconcileTrigger::new(
            analyzers,
            registry.clone(),
            store.clone(),
            transport,
        ));
        let shutdown = CancellationToken::new();
        let reconciler = tokio::spawn(trigger.clone().run(receiver, shutdown.clone()));
        Self {
            registry,
            store,
            detector,
            trigger,
            events: sender,
            shutdown,
            reconciler,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &TrackingRegistry {
        &self.registry
    }

    #[must_use]
    pub fn store(&self) -> &WorkingCopyStore {
        &self.store
    }

    fn request_reconcile(&self, endpoint: &EndpointId, path: String) {
        let event = SyncEvent::ReconcileRequested {
            endpoint: endpoint.clone(),
            path,
        };
        if self.events.send(event).is_err() {
            debug!("reconcile loop is gone; request from {endpoint} dropped");
        }
    }

    /// Handles `track:editor-file`.
    pub fn track(&self, endpoint: &EndpointId, op: &FileTrackingOperation) -> Result<()> {
        let path = || normalize(&op.path).ok_or_else(|| SyncError::NotFound(op.path.clone()));
        match op.kind {
            TrackingOperationKind::Start => self.start(endpoint, path()?, op.project_path()),
            TrackingOperationKind::Stop => self.stop(endpoint, &path()?),
            TrackingOperationKind::Suspend => {
                self.registry.suspend(endpoint);
                info!("{endpoint} suspended tracking");
                Ok(())
            }
            TrackingOperationKind::Resume => {
                self.resume(endpoint);
                Ok(())
            }
            TrackingOperationKind::Move => self.move_path(endpoint, op.old_path(), &path()?),
        }
    }

    fn start(&self, endpoint: &EndpointId, path: String, project_path: Option<&str>) -> Result<()> {
        if !self.registry.start(endpoint, &path) {
            return Ok(());
        }
        info!("{endpoint} started tracking {path}");
        if let Err(err) = self.store.open(&path, project_path) {
            debug!("working copy of {path} not opened yet: {err}");
        }
        self.request_reconcile(endpoint, path);
        Ok(())
    }

    fn stop(&self, endpoint: &EndpointId, path: &str) -> Result<()> {
        let outcome = self.registry.stop(endpoint, path);
        if !outcome.was_tracked {
            debug!("{endpoint} stopped untracked {path}");
            return Ok(());
        }
        info!("{endpoint} stopped tracking {path}");
        if outcome.tracked_elsewhere {
            return Ok(());
        }
        match self.store.discard(path)? {
            DiscardOutcome::HasUnsavedChanges => info!("unsaved changes of {path} kept"),
            DiscardOutcome::Discarded | DiscardOutcome::Absent => {}
        }
        Ok(())
    }

    fn resume(&self, endpoint: &EndpointId) {
        let deferred = self.registry.resume(endpoint);
        info!("{endpoint} resumed tracking ({} deferred reconciles)", deferred.len());
        self.detector.resync(endpoint);
        for path in deferred {
            self.request_reconcile(endpoint, path);
        }
    }

    fn move_path(&self, endpoint: &EndpointId, old_path: Option<&str>, new_path: &str) -> Result<()> {
        let Some(old_path) = old_path.and_then(normalize) else {
            debug!("{endpoint} sent MOVE to {new_path} without an old path");
            return Ok(());
        };
        let moved = self.registry.move_path(endpoint, &old_path, new_path);
        let relocated = self.store.move_copy(&old_path, new_path)?;
        if moved || relocated {
            info!("{endpoint} moved {old_path} to {new_path}");
        }
        Ok(())
    }

    /// Handles `track:editor-content-changes`.
    pub fn apply_edit(&self, endpoint: &EndpointId, op: &EditOperation) -> Result<EditOutcome> {
        self.store.apply_edit(endpoint, op)
    }

    /// Handles `request:working-copy-content`.
    pub fn content(&self, path: &str) -> Result<String> {
        let path = normalize(path).ok_or_else(|| SyncError::NotFound(path.to_string()))?;
        self.store.get_content(&path)
    }

    /// Handles `request:pom-reconcile` and similar synchronous requests.
    pub async fn reconcile_now(&self, endpoint: &EndpointId, path: &str) -> Result<ReconcileResult> {
        let path = normalize(path).ok_or_else(|| SyncError::NotFound(path.to_string()))?;
        self.trigger.reconcile_now(endpoint, &path).await
    }

    /// Raw callback from the filesystem watcher.
    pub fn on_watch_event(&self, event: WatchEvent) {
        let Some(path) = normalize(&event.path) else {
            warn!("ignoring watch event for {}", event.path);
            return;
        };
        self.detector.handle(WatchEvent { path, ..event });
    }

    /// Stops everything `endpoint` tracks after its connection closed.
    pub fn disconnect(&self, endpoint: &EndpointId) {
        let paths = self.registry.disconnect(endpoint);
        if !paths.is_empty() {
            info!("{endpoint} disconnected; releasing {} tracked files", paths.len());
        }
        for path in paths {
            if self.registry.is_tracked(&path) {
                continue;
            }
            if let Err(err) = self.store.discard(&path) {
                warn!("failed to release working copy of {path}: {err}");
            }
        }
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.reconciler.abort();
    }
}
