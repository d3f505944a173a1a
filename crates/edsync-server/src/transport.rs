//! Delivery of server → client notifications over tower-lsp connections.

use dashmap::DashMap;
use edsync_core::protocol::{
    FileStateUpdate, ReconcileResult, EVENT_FILE_STATE_CHANGED, EVENT_POM_RECONCILE_STATE_CHANGED,
    EVENT_RECONCILE_STATE_CHANGED,
};
use edsync_core::{EndpointId, Outbound, ReconcileChannel, Transport};
use tokio::sync::mpsc::{self, UnboundedSender};
use tower_lsp::lsp_types::notification::Notification;
use tower_lsp::Client;
use tracing::{debug, trace};

pub enum FileStateChanged {}

impl Notification for FileStateChanged {
    type Params = FileStateUpdate;
    const METHOD: &'static str = EVENT_FILE_STATE_CHANGED;
}

pub enum ReconcileStateChanged {}

impl Notification for ReconcileStateChanged {
    type Params = ReconcileResult;
    const METHOD: &'static str = EVENT_RECONCILE_STATE_CHANGED;
}

pub enum PomReconcileStateChanged {}

impl Notification for PomReconcileStateChanged {
    type Params = ReconcileResult;
    const METHOD: &'static str = EVENT_POM_RECONCILE_STATE_CHANGED;
}

/// Connected endpoints and their outbound queues.
///
/// Each endpoint gets one forwarding task so notifications reach the client
/// in the order they were sent.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<EndpointId, UnboundedSender<Outbound>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes messages for `endpoint` to `client`.
    pub fn register(&self, endpoint: EndpointId, client: Client) {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let label = endpoint.clone();
        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                deliver(&client, message).await;
            }
            trace!("outbound queue of {label} closed");
        });
        self.attach(endpoint, sender);
    }

    /// Routes messages for `endpoint` into an existing queue.
    pub fn attach(&self, endpoint: EndpointId, sender: UnboundedSender<Outbound>) {
        if self.clients.insert(endpoint.clone(), sender).is_some() {
            debug!("replaced outbound queue of {endpoint}");
        }
    }

    pub fn unregister(&self, endpoint: &EndpointId) {
        self.clients.remove(endpoint);
    }

    pub fn is_connected(&self, endpoint: &EndpointId) -> bool {
        self.clients.contains_key(endpoint)
    }
}

impl Transport for ClientRegistry {
    fn send(&self, endpoint: &EndpointId, message: Outbound) {
        let Some(sender) = self.clients.get(endpoint).map(|entry| entry.value().clone()) else {
            debug!("{endpoint} is not connected; dropping {}", message.method());
            return;
        };
        if sender.send(message).is_err() {
            debug!("outbound queue of {endpoint} is closed");
        }
    }
}

async fn deliver(client: &Client, message: Outbound) {
    match message {
        Outbound::FileStateChanged(update) => {
            client.send_notification::<FileStateChanged>(update).await;
        }
        Outbound::ReconcileStateChanged { channel, result } => match channel {
            ReconcileChannel::Generic => {
                client
                    .send_notification::<ReconcileStateChanged>(result)
                    .await;
            }
            ReconcileChannel::Pom => {
                client
                    .send_notification::<PomReconcileStateChanged>(result)
                    .await;
            }
        },
    }
}
