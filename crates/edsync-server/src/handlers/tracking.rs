use std::time::Instant;

use edsync_core::protocol::{FileTrackingOperation, TrackingOperationKind};
use edsync_core::EndpointId;
use tower_lsp::jsonrpc::Result;
use tracing::warn;

use super::rpc_error;
use crate::state::ServerState;
use crate::telemetry::TelemetryEvent;

/// `track:editor-file`
pub fn track_editor_file(
    state: &ServerState,
    endpoint: &EndpointId,
    params: FileTrackingOperation,
) -> Result<()> {
    let start = Instant::now();
    let result = state.sync().track(endpoint, &params);
    state.record_telemetry(telemetry_event(params.kind), start.elapsed(), result.is_ok());
    result.map_err(|err| {
        warn!("{endpoint}: {:?} {} failed: {err}", params.kind, params.path);
        rpc_error(endpoint, &err)
    })
}

fn telemetry_event(kind: TrackingOperationKind) -> TelemetryEvent {
    match kind {
        TrackingOperationKind::Start => TelemetryEvent::TrackStart,
        TrackingOperationKind::Stop => TelemetryEvent::TrackStop,
        TrackingOperationKind::Suspend => TelemetryEvent::TrackSuspend,
        TrackingOperationKind::Resume => TelemetryEvent::TrackResume,
        TrackingOperationKind::Move => TelemetryEvent::TrackMove,
    }
}
