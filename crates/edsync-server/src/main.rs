//! `edsync-server` - live working-copy synchronization for remote editors.
//!
//! Serves the `track:*` / `request:*` JSON-RPC methods over stdio (one
//! endpoint) or TCP (one endpoint per connection).

mod cli;
mod config;
mod handlers;
mod server;
mod state;
mod telemetry;
#[cfg(test)]
mod test_support;
mod transport;
mod watcher;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use edsync_core::{EndpointId, WatchService};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::Cli;
use crate::config::ServerConfig;
use crate::state::ServerState;
use crate::watcher::{DisabledWatchService, NotifyWatchService};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("workspace root '{}' is not accessible", cli.root.display()))?;
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load_file(&root, path),
        None => ServerConfig::load(&root),
    };
    if let Some(listen) = cli.listen.clone() {
        config.listen = listen;
    }
    info!(
        "Starting edsync-server in {} (config: {})",
        root.display(),
        config
            .config_path
            .as_ref()
            .map_or_else(|| "defaults".to_string(), |path| path.display().to_string())
    );

    let (watch_sender, watch_events) = mpsc::unbounded_channel();
    let watcher: Arc<dyn WatchService> = if config.watch {
        Arc::new(NotifyWatchService::new(&root, watch_sender).context("failed to start file watcher")?)
    } else {
        info!("file watching disabled");
        Arc::new(DisabledWatchService::default())
    };
    let state = Arc::new(ServerState::new(config, watcher));
    tokio::spawn(state.clone().forward_watch_events(watch_events));

    if cli.stdio {
        serve_stdio(state).await;
        return Ok(());
    }
    let listen = state.config().listen.clone();
    tokio::select! {
        result = serve_tcp(state, &listen) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted; shutting down");
            Ok(())
        }
    }
}

async fn serve_stdio(state: Arc<ServerState>) {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    server::serve_connection(state, EndpointId::new("stdio"), stdin, stdout).await;
}

async fn serve_tcp(state: Arc<ServerState>, listen: &str) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to listen on {listen}"))?;
    info!("listening on {}", listener.local_addr()?);
    let mut connections = 0_u64;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("failed to accept connection: {err}");
                continue;
            }
        };
        connections += 1;
        let endpoint = endpoint_id(peer, connections);
        let state = state.clone();
        tokio::spawn(async move {
            let (read, write) = stream.into_split();
            server::serve_connection(state, endpoint, read, write).await;
        });
    }
}

fn endpoint_id(peer: SocketAddr, sequence: u64) -> EndpointId {
    EndpointId::new(format!("{peer}#{sequence}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_ids_are_unique_per_connection() {
        let peer: SocketAddr = "127.0.0.1:50000".parse().expect("addr");
        assert_eq!(endpoint_id(peer, 1).as_str(), "127.0.0.1:50000#1");
        assert_ne!(endpoint_id(peer, 1), endpoint_id(peer, 2));
    }
}
