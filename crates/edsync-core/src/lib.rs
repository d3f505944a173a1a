//! `edsync-core` - live working-copy synchronization for remote editors.
//!
//! This crate keeps one authoritative in-memory copy of every file that a
//! remote editing session ("endpoint") is working on, and coordinates:
//!
//! - **Tracking**: per-endpoint START/STOP/SUSPEND/RESUME/MOVE sessions
//! - **Working copies**: incremental edit application with shadow persistence
//! - **Change detection**: hash-deduplicated filesystem notifications
//! - **Reconciliation**: analyzer runs on every content update, broadcast back
//! - **Batching**: client-side coalescing of raw editor changes into edits
//!
//! # Architecture
//!
//! Transport, storage, filesystem watching and semantic analysis are external
//! collaborators expressed as traits ([`Transport`], [`Storage`],
//! [`WatchService`], [`Analyzer`]). [`SyncService`] wires the components
//! together; the server binary supplies the concrete implementations.

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod batcher;
pub mod detector;
pub mod edit;
mod error;
pub mod events;
pub mod hash;
pub mod path;
pub mod protocol;
pub mod reconcile;
pub mod registry;
mod service;
mod settings;
pub mod storage;
pub mod transport;
pub mod watch;
pub mod working_copy;

#[cfg(test)]
mod test_support;

pub use edit::{apply_edit, EditKind, EditOperation};
pub use error::{ErrorClass, Result, SyncError};
pub use hash::ContentHash;
pub use protocol::EndpointId;
pub use reconcile::{Analysis, Analyzer, AnalyzerScope, ReconcileChannel};
pub use service::SyncService;
pub use settings::SyncSettings;
pub use storage::{FsStorage, Storage};
pub use transport::{Outbound, Transport};
pub use watch::{WatchEvent, WatchEventKind, WatchHandle, WatchService};
