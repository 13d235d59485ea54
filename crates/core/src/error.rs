//! Error types for shardsave
//!
//! This module defines the error type shared by every layer.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::types::HostId;
use std::io;
use thiserror::Error;

/// Result type alias for shardsave operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for snapshot coordination
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, fsync, etc.)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Save request rejected before any distributed work
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A registry entry with the same identity already exists
    #[error("Snapshot already registered: start_time={start_time}, host={host_id}")]
    DuplicateSnapshot {
        /// Start time of the conflicting snapshot
        start_time: u64,
        /// Host that registered it
        host_id: HostId,
    },

    /// The host is still draining a previous snapshot
    #[error("Snapshot in progress on host {0}")]
    SnapshotInProgress(HostId),

    /// Snapshot target construction or write failure
    #[error("Target error: {0}")]
    TargetError(String),

    /// A blocking wait was interrupted
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}
