//! CLI definitions for edsync-server.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "edsync-server",
    version,
    about = "Live working-copy synchronization server for remote editors",
    after_help = "Examples:\n  edsync-server --root ./workspace                 # listen on the configured address\n  edsync-server --root ./workspace --listen 0.0.0.0:4420\n  edsync-server --root ./workspace --stdio         # single editor over stdin/stdout"
)]
pub struct Cli {
    /// Workspace root; the first folder level below it are projects.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub root: PathBuf,
    /// Configuration file (defaults to edsync.toml in the root).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// TCP address to accept editor connections on.
    #[arg(long, value_name = "ADDR", conflicts_with = "stdio")]
    pub listen: Option<String>,
    /// Serve a single editor over stdin/stdout.
    #[arg(long)]
    pub stdio: bool,
}
