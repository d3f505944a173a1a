//! Reconciliation trigger.
//!
//! Consumes [`SyncEvent`]s, runs the analyzers that apply to the updated
//! path on the blocking pool and delivers the results. Results for an
//! endpoint that stopped tracking the path in the meantime are dropped;
//! results for a suspended endpoint are deferred until it resumes.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::events::{EventReceiver, SyncEvent};
use crate::protocol::{EndpointId, HighlightedPosition, Problem, ReconcileResult};
use crate::registry::TrackingRegistry;
use crate::transport::{Outbound, Transport};
use crate::working_copy::WorkingCopyStore;

/// Who receives the results of an analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerScope {
    /// Only the endpoint whose edit triggered the run.
    Endpoint,
    /// Every endpoint tracking the path.
    File,
}

/// Notification family results are published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileChannel {
    Generic,
    Pom,
}

/// Output of one analyzer run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analysis {
    pub problems: Vec<Problem>,
    pub highlighted_positions: Vec<HighlightedPosition>,
}

impl Analysis {
    #[must_use]
    pub fn into_result(self, file_location: impl Into<String>) -> ReconcileResult {
        ReconcileResult {
            file_location: file_location.into(),
            problems: self.problems,
            highlighted_positions: self.highlighted_positions,
        }
    }
}

/// Semantic analysis over a working copy.
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &'static str;

    fn applies_to(&self, path: &str) -> bool;

    fn scope(&self) -> AnalyzerScope {
        AnalyzerScope::Endpoint
    }

    fn channel(&self) -> ReconcileChannel {
        ReconcileChannel::Generic
    }

    /// Analyzes `content`. May block; always called off the async workers.
    fn reconcile(&self, path: &str, content: &str) -> Result<Analysis>;
}

/// Reconciliation request after coalescing queued events for one path.
#[derive(Debug)]
struct Pending {
    path: String,
    origins: Vec<EndpointId>,
    /// Whether file-scoped analyzers publish to every tracker.
    broadcast: bool,
    content: Option<String>,
}

/// Folds a batch of events into at most one request per path, keeping the
/// order in which paths first appeared and the latest known content.
fn coalesce(events: Vec<SyncEvent>) -> Vec<Pending> {
    let mut pending: IndexMap<String, Pending> = IndexMap::new();
    for event in events {
        let (path, origin, broadcast, content) = match event {
            SyncEvent::ContentUpdated(update) => {
                (update.path, update.endpoint, true, Some(update.new_content))
            }
            SyncEvent::ReconcileRequested { endpoint, path } => (path, endpoint, false, None),
        };
        let entry = pending.entry(path).or_insert_with_key(|path| Pending {
            path: path.clone(),
            origins: Vec::new(),
            broadcast: false,
            content: None,
        });
        if !entry.origins.contains(&origin) {
            entry.origins.push(origin);
        }
        entry.broadcast |= broadcast;
        if content.is_some() {
            entry.content = content;
        }
    }
    pending.into_values().collect()
}

pub struct ReconcileTrigger {
    analyzers: Vec<Arc<dyn Analyzer>>,
    registry: Arc<TrackingRegistry>,
    store: Arc<WorkingCopyStore>,
    transport: Arc<dyn Transport>,
}

impl ReconcileTrigger {
    pub fn new(
        analyzers: Vec<Arc<dyn Analyzer>>,
        registry: Arc<TrackingRegistry>,
        store: Arc<WorkingCopyStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            analyzers,
            registry,
            store,
            transport,
        }
    }

    fn analyzers_for(&self, path: &str) -> Vec<Arc<dyn Analyzer>> {
        self.analyzers
            .iter()
            .filter(|analyzer| analyzer.applies_to(path))
            .cloned()
            .collect()
    }

    /// Consumes events until every sender is dropped or `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut events: EventReceiver, shutdown: CancellationToken) {
        loop {
            let first = tokio::select! {
                () = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            let mut batch = vec![first];
            while let Ok(event) = events.try_recv() {
                batch.push(event);
            }
            self.process_batch(batch).await;
        }
        debug!("reconcile loop stopped");
    }

    /// Reconciles one batch of queued events, coalesced per path.
    pub async fn process_batch(&self, batch: Vec<SyncEvent>) {
        for pending in coalesce(batch) {
            self.process(pending).await;
        }
    }

    async fn process(&self, pending: Pending) {
        let analyzers = self.analyzers_for(&pending.path);
        if analyzers.is_empty() {
            return;
        }
        let mut content = pending.content;
        for analyzer in analyzers {
            let targets = self.targets(&pending.path, &pending.origins, pending.broadcast, analyzer.scope());
            if targets.is_empty() {
                continue;
            }
            let text = match content.take() {
                Some(text) => text,
                None => match self.store.get_content(&pending.path) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!("skipping reconcile of {}: {err}", pending.path);
                        return;
                    }
                },
            };
            let result = run_analyzer(Arc::clone(&analyzer), pending.path.clone(), text.clone()).await;
            content = Some(text);
            match result {
                Ok(analysis) => self.deliver(&pending.path, analyzer.channel(), analysis, targets),
                Err(err) => warn!("{} failed on {}: {err}", analyzer.name(), pending.path),
            }
        }
    }

    /// Endpoints to publish to, each with the token that cancels delivery.
    /// Suspended endpoints are deferred here and left out.
    fn targets(
        &self,
        path: &str,
        origins: &[EndpointId],
        broadcast: bool,
        scope: AnalyzerScope,
    ) -> Vec<(EndpointId, CancellationToken)> {
        let mut endpoints = origins.to_vec();
        if broadcast && scope == AnalyzerScope::File {
            for endpoint in self.registry.trackers_of(path) {
                if !endpoints.contains(&endpoint) {
                    endpoints.push(endpoint);
                }
            }
        }
        endpoints
            .into_iter()
            .filter(|endpoint| !self.registry.defer_if_suspended(endpoint, path))
            .filter_map(|endpoint| {
                let token = self.registry.reconcile_token(&endpoint, path)?;
                Some((endpoint, token))
            })
            .collect()
    }

    fn deliver(
        &self,
        path: &str,
        channel: ReconcileChannel,
        analysis: Analysis,
        targets: Vec<(EndpointId, CancellationToken)>,
    ) {
        let result = analysis.into_result(path);
        for (endpoint, token) in targets {
            if token.is_cancelled() {
                debug!("dropping reconcile of {path} for {endpoint}: tracking stopped");
                continue;
            }
            if self.registry.defer_if_suspended(&endpoint, path) {
                continue;
            }
            self.transport.send(
                &endpoint,
                Outbound::ReconcileStateChanged {
                    channel,
                    result: result.clone(),
                },
            );
        }
    }

    /// Runs the first analyzer applying to `path` and returns its result to
    /// the caller instead of publishing it.
    pub async fn reconcile_now(&self, endpoint: &EndpointId, path: &str) -> Result<ReconcileResult> {
        let analyzer = self
            .analyzers_for(path)
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::NotFound(format!("no analyzer for {path}")))?;
        let content = self.store.get_content(path)?;
        debug!("{endpoint} requested {} on {path}", analyzer.name());
        let analysis = run_analyzer(analyzer, path.to_string(), content).await?;
        Ok(analysis.into_result(path))
    }
}

async fn run_analyzer(analyzer: Arc<dyn Analyzer>, path: String, content: String) -> Result<Analysis> {
    tokio::task::spawn_blocking(move || analyzer.reconcile(&path, &content))
        .await
        .map_err(|err| SyncError::ServerFailure(format!("analyzer task failed: {err}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::EditOperation;
    use crate::events::{self, EventSender};
    use crate::settings::SyncSettings;
    use crate::test_support::{endpoint, EchoAnalyzer, MemoryStorage, RecordingTransport, RecordingWatcher};

    const PATH: &str = "/demo/notes.txt";

    struct Fixture {
        registry: Arc<TrackingRegistry>,
        store: Arc<WorkingCopyStore>,
        transport: Arc<RecordingTransport>,
        analyzer: Arc<EchoAnalyzer>,
        trigger: ReconcileTrigger,
        events: EventReceiver,
        sender: EventSender,
    }

    fn fixture(scope: AnalyzerScope) -> Fixture {
        let storage = MemoryStorage::with_project("/demo");
        storage.put(PATH, "text");
        let (sender, events) = events::channel();
        let registry = Arc::new(TrackingRegistry::new(RecordingWatcher::new(), storage.clone()));
        let store = Arc::new(WorkingCopyStore::new(
            storage,
            &SyncSettings::default(),
            sender.clone(),
        ));
        let transport = RecordingTransport::new();
        let analyzer = EchoAnalyzer::new(".txt", scope);
        let trigger = ReconcileTrigger::new(
            vec![analyzer.clone() as Arc<dyn Analyzer>],
            registry.clone(),
            store.clone(),
            transport.clone(),
        );
        Fixture {
            registry,
            store,
            transport,
            analyzer,
            trigger,
            events,
            sender,
        }
    }

    impl Fixture {
        fn edit(&self, who: &EndpointId, op: &EditOperation) {
            self.store.apply_edit(who, op).expect("edit");
        }

        async fn drain(&mut self) {
            let mut batch = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                batch.push(event);
            }
            self.trigger.process_batch(batch).await;
        }
    }

    #[tokio::test]
    async fn endpoint_scope_answers_the_origin_only() {
        let mut f = fixture(AnalyzerScope::Endpoint);
        let (a, b) = (endpoint("a"), endpoint("b"));
        f.registry.start(&a, PATH);
        f.registry.start(&b, PATH);

        f.edit(&a, &EditOperation::insert(PATH, None, 4, "!"));
        f.drain().await;

        let results = f.transport.reconciles(&a);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_location, PATH);
        assert_eq!(results[0].problems[0].message, "text!");
        assert!(f.transport.reconciles(&b).is_empty());
    }

    #[tokio::test]
    async fn file_scope_broadcasts_to_all_trackers() {
        let mut f = fixture(AnalyzerScope::File);
        let (a, b) = (endpoint("a"), endpoint("b"));
        f.registry.start(&a, PATH);
        f.registry.start(&b, PATH);

        f.edit(&a, &EditOperation::insert(PATH, None, 0, ">"));
        f.drain().await;

        assert_eq!(f.transport.reconciles(&a).len(), 1);
        assert_eq!(f.transport.reconciles(&b).len(), 1);
        let (_, message) = &f.transport.sent()[0];
        assert_eq!(message.method(), "event:reconcile-state-changed");
    }

    #[tokio::test]
    async fn queued_updates_for_one_path_are_coalesced() {
        let mut f = fixture(AnalyzerScope::Endpoint);
        let a = endpoint("a");
        f.registry.start(&a, PATH);
        for text in ["1", "2", "3"] {
            f.edit(&a, &EditOperation::insert(PATH, None, 0, text));
        }
        f.drain().await;

        assert_eq!(f.analyzer.runs(), vec!["321text".to_string()]);
        assert_eq!(f.transport.reconciles(&a).len(), 1);
    }

    #[tokio::test]
    async fn suspended_endpoint_is_deferred_without_affecting_others() {
        let mut f = fixture(AnalyzerScope::File);
        let (a, b) = (endpoint("a"), endpoint("b"));
        f.registry.start(&a, PATH);
        f.registry.start(&b, PATH);
        f.registry.suspend(&b);

        f.edit(&a, &EditOperation::insert(PATH, None, 0, "x"));
        f.drain().await;
        assert_eq!(f.transport.reconciles(&a).len(), 1);
        assert!(f.transport.reconciles(&b).is_empty());

        let deferred = f.registry.resume(&b);
        assert_eq!(deferred, vec![PATH.to_string()]);
        for path in deferred {
            f.sender
                .send(SyncEvent::ReconcileRequested {
                    endpoint: b.clone(),
                    path,
                })
                .expect("send");
        }
        f.drain().await;
        assert_eq!(f.transport.reconciles(&b).len(), 1);
        assert_eq!(f.transport.reconciles(&a).len(), 1);
    }

    #[tokio::test]
    async fn stopped_endpoint_gets_nothing() {
        let mut f = fixture(AnalyzerScope::File);
        let a = endpoint("a");
        f.registry.start(&a, PATH);
        f.edit(&a, &EditOperation::insert(PATH, None, 0, "x"));
        f.registry.stop(&a, PATH);
        f.drain().await;
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn analyzer_failure_is_skipped() {
        let mut f = fixture(AnalyzerScope::Endpoint);
        let a = endpoint("a");
        f.registry.start(&a, PATH);
        f.edit(&a, &EditOperation::replace_all(PATH, None, ""));
        f.drain().await;
        assert_eq!(f.analyzer.runs(), vec![String::new()]);
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn reconcile_now_returns_the_result() {
        let f = fixture(AnalyzerScope::File);
        let a = endpoint("a");
        let result = f.trigger.reconcile_now(&a, PATH).await.expect("reconcile");
        assert_eq!(result.problems[0].message, "text");
        assert!(f.transport.sent().is_empty());

        let err = f
            .trigger
            .reconcile_now(&a, "/demo/pom.xml")
            .await
            .expect_err("no analyzer");
        assert!(matches!(err, SyncError::NotFound(_)));
    }
}
