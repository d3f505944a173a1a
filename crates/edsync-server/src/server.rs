//! tower-lsp service exposing the synchronization methods to one endpoint.

use std::sync::Arc;

use edsync_core::protocol::{
    FileTrackingOperation, PomReconcileParams, ReconcileResult, WorkingCopyContent,
    WorkingCopyContentParams, REQUEST_POM_RECONCILE, REQUEST_WORKING_COPY_CONTENT,
    TRACK_EDITOR_CONTENT_CHANGES, TRACK_EDITOR_FILE,
};
use edsync_core::{EditOperation, EndpointId};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::{
    InitializeParams, InitializeResult, InitializedParams, ServerCapabilities, ServerInfo,
};
use tower_lsp::{Client, ClientSocket, LanguageServer, LspService, Server};
use tracing::{debug, info};

use crate::handlers;
use crate::state::ServerState;

/// Connection of one remote editing session.
pub struct EdsyncServer {
    endpoint: EndpointId,
    state: Arc<ServerState>,
}

impl EdsyncServer {
    fn new(client: Client, endpoint: EndpointId, state: Arc<ServerState>) -> Self {
        state.connect(endpoint.clone(), client);
        Self {
            endpoint,
            state,
        }
    }

    async fn track_editor_file(&self, params: FileTrackingOperation) -> Result<()> {
        handlers::track_editor_file(&self.state, &self.endpoint, params)
    }

    /// Edits of one path must apply in arrival order. tower-lsp polls
    /// request futures concurrently (`buffer_unordered`), so this handler
    /// must stay free of await points: it then runs to completion on its
    /// first poll, and first polls follow arrival order.
    async fn track_editor_content_changes(&self, params: EditOperation) -> Result<()> {
        handlers::track_editor_content_changes(&self.state, &self.endpoint, params)
    }

    async fn pom_reconcile(&self, params: PomReconcileParams) -> Result<ReconcileResult> {
        handlers::pom_reconcile(&self.state, &self.endpoint, params).await
    }

    async fn working_copy_content(
        &self,
        params: WorkingCopyContentParams,
    ) -> Result<WorkingCopyContent> {
        handlers::working_copy_content(&self.state, &self.endpoint, params)
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for EdsyncServer {
    async fn initialize(&self, _: InitializeParams) -> Result<InitializeResult> {
        info!("{} initializing", self.endpoint);
        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                experimental: Some(json!({
                    "edsync": {
                        "endpointId": self.endpoint.as_str(),
                        "methods": [
                            TRACK_EDITOR_FILE,
                            TRACK_EDITOR_CONTENT_CHANGES,
                            REQUEST_POM_RECONCILE,
                            REQUEST_WORKING_COPY_CONTENT,
                        ],
                    }
                })),
                ..ServerCapabilities::default()
            },
            server_info: Some(ServerInfo {
                name: "edsync-server".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        debug!("{} initialized", self.endpoint);
    }

    async fn shutdown(&self) -> Result<()> {
        info!("{} shutting down", self.endpoint);
        self.state.disconnect(&self.endpoint);
        Ok(())
    }
}

pub fn build_service(
    state: Arc<ServerState>,
    endpoint: EndpointId,
) -> (LspService<EdsyncServer>, ClientSocket) {
    LspService::build(|client| EdsyncServer::new(client, endpoint, state))
        .custom_method(TRACK_EDITOR_FILE, EdsyncServer::track_editor_file)
        .custom_method(
            TRACK_EDITOR_CONTENT_CHANGES,
            EdsyncServer::track_editor_content_changes,
        )
        .custom_method(REQUEST_POM_RECONCILE, EdsyncServer::pom_reconcile)
        .custom_method(REQUEST_WORKING_COPY_CONTENT, EdsyncServer::working_copy_content)
        .finish()
}

/// Serves one endpoint until its input closes, then releases what it held.
pub async fn serve_connection<I, O>(state: Arc<ServerState>, endpoint: EndpointId, input: I, output: O)
where
    I: AsyncRead + Unpin,
    O: AsyncWrite,
{
    let (service, socket) = build_service(state.clone(), endpoint.clone());
    Server::new(input, output, socket).serve(service).await;
    state.disconnect(&endpoint);
}
