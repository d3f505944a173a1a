//! Internal event channel between the working-copy store and the
//! reconciliation trigger.

use tokio::sync::mpsc;

use crate::edit::EditOperation;
use crate::protocol::EndpointId;

/// Emitted after a successful mutation of a working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentUpdated {
    pub endpoint: EndpointId,
    pub path: String,
    pub project_path: String,
    pub edit: EditOperation,
    pub new_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    ContentUpdated(ContentUpdated),
    /// Reconcile the current content for `endpoint` only (tracking START,
    /// replay of deferred triggers on RESUME).
    ReconcileRequested { endpoint: EndpointId, path: String },
}

pub type EventSender = mpsc::UnboundedSender<SyncEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SyncEvent>;

#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
