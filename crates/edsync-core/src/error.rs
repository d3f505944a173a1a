//! Synchronization errors.

use std::io;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Faults raised while tracking, editing or reconciling a file.
///
/// Expected absence (an untracked path, a missing shadow copy) is modelled
/// with `Option` at the call sites; this type is reserved for real faults.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Path or project could not be resolved.
    #[error("'{0}' isn't found")]
    NotFound(String),

    /// Edit offset/length outside the current buffer.
    #[error("edit range {offset}..{end} is outside the buffer of {len} chars")]
    InvalidRange { offset: usize, end: usize, len: usize },

    /// I/O or analyzer failure.
    #[error("{0}")]
    ServerFailure(String),

    /// Concurrent structural change, e.g. project removed mid-edit.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Which side of the wire a [`SyncError`] is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Client,
    Server,
}

impl ErrorClass {
    /// Numeric class carried in error replies.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            ErrorClass::Client => 400,
            ErrorClass::Server => 500,
        }
    }
}

impl SyncError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::NotFound(_) | SyncError::InvalidRange { .. } | SyncError::Conflict(_) => {
                ErrorClass::Client
            }
            SyncError::ServerFailure(_) => ErrorClass::Server,
        }
    }

    pub(crate) fn io(context: impl std::fmt::Display, err: &io::Error) -> Self {
        SyncError::ServerFailure(format!("{context}: {err}"))
    }
}
