use std::time::Instant;

use edsync_core::protocol::{PomReconcileParams, ReconcileResult};
use edsync_core::EndpointId;
use tower_lsp::jsonrpc::Result;
use tracing::warn;

use super::rpc_error;
use crate::state::ServerState;
use crate::telemetry::TelemetryEvent;

/// `request:pom-reconcile`
pub async fn pom_reconcile(
    state: &ServerState,
    endpoint: &EndpointId,
    params: PomReconcileParams,
) -> Result<ReconcileResult> {
    let start = Instant::now();
    let result = state.sync().reconcile_now(endpoint, &params.pom_path).await;
    state.record_telemetry(TelemetryEvent::PomReconcile, start.elapsed(), result.is_ok());
    result.map_err(|err| {
        warn!("{endpoint}: reconcile of {} failed: {err}", params.pom_path);
        rpc_error(endpoint, &err)
    })
}
