//! Outbound side of the request dispatch facade.
//!
//! Every server → client message is one variant of [`Outbound`]; the server
//! binary maps each variant onto its wire method.

use crate::protocol::{
    EndpointId, FileStateUpdate, ReconcileResult, EVENT_FILE_STATE_CHANGED,
    EVENT_POM_RECONCILE_STATE_CHANGED, EVENT_RECONCILE_STATE_CHANGED,
};
use crate::reconcile::ReconcileChannel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    FileStateChanged(FileStateUpdate),
    ReconcileStateChanged {
        channel: ReconcileChannel,
        result: ReconcileResult,
    },
}

impl Outbound {
    /// Wire method carrying this message.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Outbound::FileStateChanged(_) => EVENT_FILE_STATE_CHANGED,
            Outbound::ReconcileStateChanged { channel, .. } => match channel {
                ReconcileChannel::Generic => EVENT_RECONCILE_STATE_CHANGED,
                ReconcileChannel::Pom => EVENT_POM_RECONCILE_STATE_CHANGED,
            },
        }
    }
}

/// Fire-and-forget delivery to one endpoint.
///
/// Implementations must preserve the order of messages sent to the same
/// endpoint.
pub trait Transport: Send + Sync {
    fn send(&self, endpoint: &EndpointId, message: Outbound);
}
