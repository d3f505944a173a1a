//! Test helpers shared across server unit tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use edsync_core::{EndpointId, Outbound};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tower_lsp::{Client, LanguageServer, LspService};

use crate::config::ServerConfig;
use crate::state::ServerState;
use crate::watcher::DisabledWatchService;

pub(crate) fn temp_dir(prefix: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("{prefix}-{stamp}-{seq}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// Server state over a temp workspace holding a `demo` project.
pub(crate) fn test_state(prefix: &str) -> (Arc<ServerState>, PathBuf) {
    let root = temp_dir(prefix);
    std::fs::create_dir_all(root.join("demo")).expect("create project");
    let config = ServerConfig::from_contents(&root, None, "");
    let state = Arc::new(ServerState::new(
        config,
        Arc::new(DisabledWatchService::default()),
    ));
    (state, root)
}

/// Captures everything sent to `endpoint`.
pub(crate) fn attach(state: &ServerState, endpoint: &EndpointId) -> UnboundedReceiver<Outbound> {
    let (sender, receiver) = mpsc::unbounded_channel();
    state.clients().attach(endpoint.clone(), sender);
    receiver
}

pub(crate) fn test_client() -> Client {
    struct DummyServer;

    #[tower_lsp::async_trait]
    impl LanguageServer for DummyServer {
        async fn initialize(
            &self,
            _: tower_lsp::lsp_types::InitializeParams,
        ) -> tower_lsp::jsonrpc::Result<tower_lsp::lsp_types::InitializeResult> {
            Ok(tower_lsp::lsp_types::InitializeResult::default())
        }

        async fn shutdown(&self) -> tower_lsp::jsonrpc::Result<()> {
            Ok(())
        }
    }

    let captured = Arc::new(Mutex::new(None));
    let captured_clone = captured.clone();
    let (_service, socket) = LspService::new(move |client| {
        *captured_clone.lock().expect("lock test client") = Some(client.clone());
        DummyServer
    });
    drop(socket);

    let client = captured
        .lock()
        .expect("lock test client")
        .take()
        .expect("test client");
    client
}
