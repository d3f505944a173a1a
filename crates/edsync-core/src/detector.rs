//! Change detector bridging raw watch callbacks to `event:file-state-changed`.
//!
//! Every callback re-hashes the file and compares it with the baseline of
//! each tracking endpoint, so repeated callbacks for identical content are
//! reported once. Removals are confirmed after a quiet period to absorb
//! delete-and-recreate sequences.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tracing::{debug, warn};

use crate::hash::ContentHash;
use crate::protocol::{EndpointId, FileStateUpdate};
use crate::registry::{HashObservation, TrackingRegistry};
use crate::storage::Storage;
use crate::transport::{Outbound, Transport};
use crate::watch::{WatchEvent, WatchEventKind};

pub struct ChangeDetector {
    registry: Arc<TrackingRegistry>,
    storage: Arc<dyn Storage>,
    transport: Arc<dyn Transport>,
    delete_debounce: Duration,
    pending_deletes: DashSet<String>,
}

impl ChangeDetector {
    pub fn new(
        registry: Arc<TrackingRegistry>,
        storage: Arc<dyn Storage>,
        transport: Arc<dyn Transport>,
        delete_debounce: Duration,
    ) -> Self {
        Self {
            registry,
            storage,
            transport,
            delete_debounce,
            pending_deletes: DashSet::new(),
        }
    }

    /// Handles one raw watch callback. Removals spawn a debounced check on
    /// the current Tokio runtime.
    pub fn handle(self: &Arc<Self>, event: WatchEvent) {
        match event.kind {
            WatchEventKind::Changed => self.on_changed(&event.path),
            WatchEventKind::Removed => self.schedule_deletion_check(event.path),
        }
    }

    fn on_changed(self: &Arc<Self>, path: &str) {
        let endpoints = self.registry.trackers_of(path);
        if endpoints.is_empty() {
            debug!("dropping change of untracked {path}");
            return;
        }
        let hash = match self.storage.read(path) {
            Ok(Some(content)) => ContentHash::of(content),
            Ok(None) => {
                self.schedule_deletion_check(path.to_string());
                return;
            }
            Err(err) => {
                warn!("skipping change of {path}: {err}");
                return;
            }
        };
        for endpoint in &endpoints {
            self.notify_modified(endpoint, path, &hash);
        }
    }

    fn notify_modified(&self, endpoint: &EndpointId, path: &str, hash: &ContentHash) {
        match self.registry.observe_hash(endpoint, path, hash) {
            HashObservation::Changed => self.transport.send(
                endpoint,
                Outbound::FileStateChanged(FileStateUpdate::modified(path, hash.as_str())),
            ),
            HashObservation::Suspended => debug!("{endpoint} is suspended; holding change of {path}"),
            HashObservation::Unchanged | HashObservation::Untracked => {}
        }
    }

    fn notify_deleted(&self, endpoint: &EndpointId, path: &str) {
        if self.registry.observe_deletion(endpoint, path) == HashObservation::Changed {
            self.transport
                .send(endpoint, Outbound::FileStateChanged(FileStateUpdate::deleted(path)));
        }
    }

    fn schedule_deletion_check(self: &Arc<Self>, path: String) {
        if !self.pending_deletes.insert(path.clone()) {
            return;
        }
        let detector = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(detector.delete_debounce).await;
            detector.pending_deletes.remove(&path);
            detector.confirm_deletion(&path);
        });
    }

    fn confirm_deletion(self: &Arc<Self>, path: &str) {
        if self.storage.exists(path) {
            debug!("{path} reappeared before the deletion was confirmed");
            self.on_changed(path);
            return;
        }
        for endpoint in self.registry.trackers_of(path) {
            self.notify_deleted(&endpoint, path);
        }
    }

    /// Re-hashes every path tracked by `endpoint`, reporting what changed
    /// while notifications were held back.
    pub fn resync(&self, endpoint: &EndpointId) {
        for path in self.registry.tracked_paths(endpoint) {
            match self.storage.read(&path) {
                Ok(Some(content)) => self.notify_modified(endpoint, &path, &ContentHash::of(content)),
                Ok(None) => self.notify_deleted(endpoint, &path),
                Err(err) => warn!("skipping resync of {path}: {err}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FileStateKind;
    use crate::test_support::{endpoint, MemoryStorage, RecordingTransport, RecordingWatcher};

    const PATH: &str = "/demo/pom.xml";

    struct Fixture {
        registry: Arc<TrackingRegistry>,
        storage: Arc<MemoryStorage>,
        transport: Arc<RecordingTransport>,
        detector: Arc<ChangeDetector>,
    }

    fn fixture() -> Fixture {
        let storage = MemoryStorage::with_project("/demo");
        let transport = RecordingTransport::new();
        let registry = Arc::new(TrackingRegistry::new(RecordingWatcher::new(), storage.clone()));
        let detector = Arc::new(ChangeDetector::new(
            registry.clone(),
            storage.clone(),
            transport.clone(),
            Duration::from_millis(1000),
        ));
        Fixture {
            registry,
            storage,
            transport,
            detector,
        }
    }

    #[tokio::test]
    async fn identical_content_is_reported_once() {
        let f = fixture();
        let a = endpoint("a");
        f.storage.put(PATH, "v1");
        f.registry.start(&a, PATH);

        f.storage.put(PATH, "v2");
        f.detector.handle(WatchEvent::changed(PATH));
        f.detector.handle(WatchEvent::changed(PATH));
        f.storage.put(PATH, "v3");
        f.detector.handle(WatchEvent::changed(PATH));

        let updates = f.transport.file_states(&a);
        assert_eq!(
            updates,
            vec![
                FileStateUpdate::modified(PATH, ContentHash::of("v2").as_str()),
                FileStateUpdate::modified(PATH, ContentHash::of("v3").as_str()),
            ]
        );
    }

    #[tokio::test]
    async fn baseline_suppresses_first_sync() {
        let f = fixture();
        let a = endpoint("a");
        f.storage.put(PATH, "v1");
        f.registry.start(&a, PATH);
        f.detector.handle(WatchEvent::changed(PATH));
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn suspend_of_one_endpoint_does_not_affect_another() {
        let f = fixture();
        let (a, b) = (endpoint("a"), endpoint("b"));
        f.storage.put(PATH, "v1");
        f.registry.start(&a, PATH);
        f.registry.start(&b, PATH);
        f.registry.suspend(&a);

        f.storage.put(PATH, "v2");
        f.detector.handle(WatchEvent::changed(PATH));
        assert!(f.transport.file_states(&a).is_empty());
        assert_eq!(f.transport.file_states(&b).len(), 1);

        f.registry.resume(&a);
        f.detector.resync(&a);
        assert_eq!(
            f.transport.file_states(&a),
            vec![FileStateUpdate::modified(PATH, ContentHash::of("v2").as_str())]
        );
        assert_eq!(f.transport.file_states(&b).len(), 1);
    }

    #[tokio::test]
    async fn change_after_stop_is_dropped() {
        let f = fixture();
        let a = endpoint("a");
        f.storage.put(PATH, "v1");
        f.registry.start(&a, PATH);
        f.registry.stop(&a, PATH);

        f.storage.put(PATH, "v2");
        f.detector.handle(WatchEvent::changed(PATH));
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deletion_is_confirmed_after_quiet_period() {
        let f = fixture();
        let a = endpoint("a");
        f.storage.put(PATH, "v1");
        f.registry.start(&a, PATH);

        f.storage.remove(PATH);
        f.detector.handle(WatchEvent::removed(PATH));
        f.detector.handle(WatchEvent::removed(PATH));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(f.transport.sent().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        let updates = f.transport.file_states(&a);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].kind, FileStateKind::Deleted);
        assert_eq!(updates[0].hash_code, None);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_and_recreate_is_not_a_deletion() {
        let f = fixture();
        let a = endpoint("a");
        f.storage.put(PATH, "v1");
        f.registry.start(&a, PATH);

        f.storage.remove(PATH);
        f.detector.handle(WatchEvent::removed(PATH));
        tokio::time::sleep(Duration::from_millis(200)).await;
        f.storage.put(PATH, "v1");
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(f.transport.sent().is_empty());

        f.storage.remove(PATH);
        f.detector.handle(WatchEvent::removed(PATH));
        tokio::time::sleep(Duration::from_millis(200)).await;
        f.storage.put(PATH, "v2");
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let updates = f.transport.file_states(&a);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].kind, FileStateKind::Modified);
    }
}
