//! Server state shared by every connection.

use std::sync::Arc;
use std::time::Duration;

use edsync_analysis::PomAnalyzer;
use edsync_core::{Analyzer, EndpointId, FsStorage, SyncService, WatchEvent, WatchService};
use tokio::sync::mpsc::UnboundedReceiver;
use tower_lsp::Client;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::telemetry::{Telemetry, TelemetryEvent};
use crate::transport::ClientRegistry;

pub struct ServerState {
    config: ServerConfig,
    sync: SyncService,
    clients: Arc<ClientRegistry>,
    telemetry: Telemetry,
}

impl ServerState {
    /// Builds the synchronization core over the configured workspace root.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(config: ServerConfig, watcher: Arc<dyn WatchService>) -> Self {
        let clients = Arc::new(ClientRegistry::new());
        let mut analyzers: Vec<Arc<dyn Analyzer>> = Vec::new();
        if config.pom_reconcile {
            analyzers.push(Arc::new(PomAnalyzer));
        }
        let storage = Arc::new(FsStorage::new(config.root.clone()));
        let sync = SyncService::new(&config.sync, storage, watcher, clients.clone(), analyzers);
        let telemetry = Telemetry::new(&config.telemetry);
        Self {
            config,
            sync,
            clients,
            telemetry,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn sync(&self) -> &SyncService {
        &self.sync
    }

    #[cfg(test)]
    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn connect(&self, endpoint: EndpointId, client: Client) {
        info!("{endpoint} connected");
        self.clients.register(endpoint, client);
    }

    /// Releases everything held for a closed connection.
    pub fn disconnect(&self, endpoint: &EndpointId) {
        if !self.clients.is_connected(endpoint) {
            return;
        }
        self.clients.unregister(endpoint);
        self.sync.disconnect(endpoint);
        self.telemetry.flush();
        info!("{endpoint} disconnected");
    }

    pub fn record_telemetry(&self, event: TelemetryEvent, duration: Duration, succeeded: bool) {
        self.telemetry.record(event, duration, succeeded);
    }

    /// Feeds watcher callbacks into the synchronization core until the
    /// watcher goes away.
    pub async fn forward_watch_events(self: Arc<Self>, mut events: UnboundedReceiver<WatchEvent>) {
        while let Some(event) = events.recv().await {
            self.sync.on_watch_event(event);
        }
        debug!("file watcher stopped");
    }
}
