//! Request handlers for the custom `track:*` and `request:*` methods.

mod content;
mod reconcile;
mod tracking;

pub use content::{track_editor_content_changes, working_copy_content};
pub use reconcile::pom_reconcile;
pub use tracking::track_editor_file;

use std::borrow::Cow;

use edsync_core::{EndpointId, SyncError};
use serde_json::json;
use tower_lsp::jsonrpc::{Error, ErrorCode};

/// Structured error reply carrying the fault class and the caller.
pub(crate) fn rpc_error(endpoint: &EndpointId, err: &SyncError) -> Error {
    Error {
        code: ErrorCode::ServerError(err.class().code()),
        message: Cow::Owned(err.to_string()),
        data: Some(json!({ "endpointId": endpoint.as_str() })),
    }
}
