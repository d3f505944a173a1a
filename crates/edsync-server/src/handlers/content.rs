use std::time::Instant;

use edsync_core::protocol::{WorkingCopyContent, WorkingCopyContentParams};
use edsync_core::{EditOperation, EndpointId};
use tower_lsp::jsonrpc::Result;
use tracing::{debug, warn};

use super::rpc_error;
use crate::state::ServerState;
use crate::telemetry::TelemetryEvent;

/// `track:editor-content-changes`
///
/// Synchronous so per-path edit order is the order requests were read off
/// the connection.
pub fn track_editor_content_changes(
    state: &ServerState,
    endpoint: &EndpointId,
    params: EditOperation,
) -> Result<()> {
    let start = Instant::now();
    let result = state.sync().apply_edit(endpoint, &params);
    state.record_telemetry(TelemetryEvent::ContentChange, start.elapsed(), result.is_ok());
    match result {
        Ok(outcome) => {
            if !outcome.changed {
                debug!("{endpoint}: {:?} on {} changed nothing", params.kind, params.file_location);
            }
            Ok(())
        }
        Err(err) => {
            warn!(
                "{endpoint}: {:?} on {} failed: {err}",
                params.kind, params.file_location
            );
            Err(rpc_error(endpoint, &err))
        }
    }
}

/// `request:working-copy-content`
pub fn working_copy_content(
    state: &ServerState,
    endpoint: &EndpointId,
    params: WorkingCopyContentParams,
) -> Result<WorkingCopyContent> {
    let start = Instant::now();
    let result = state.sync().content(&params.path);
    state.record_telemetry(TelemetryEvent::WorkingCopyContent, start.elapsed(), result.is_ok());
    let content = result.map_err(|err| rpc_error(endpoint, &err))?;
    Ok(WorkingCopyContent {
        path: params.path,
        content,
    })
}
