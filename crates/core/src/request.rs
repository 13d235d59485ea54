//! Snapshot save requests
//!
//! A [`SnapshotRequest`] identifies one snapshot attempt cluster-wide. It is
//! built once by the save procedure and handed unchanged to every site.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Characters that delimit fields in snapshot file and digest names.
pub const NONCE_PROHIBITED_CHARS: [char; 2] = ['-', ','];

/// One snapshot attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRequest {
    /// Milliseconds since the epoch when the save was issued
    pub start_time: u64,
    /// Destination directory
    pub path: PathBuf,
    /// Name token (nonce) shared by every file of this snapshot
    pub nonce: String,
    /// Wait for every site to drain its tasks before returning
    pub block: bool,
}

impl SnapshotRequest {
    /// Create a request
    pub fn new(start_time: u64, path: impl Into<PathBuf>, nonce: impl Into<String>, block: bool) -> Self {
        SnapshotRequest {
            start_time,
            path: path.into(),
            nonce: nonce.into(),
            block,
        }
    }

    /// Destination directory
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Save parameter validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Path was empty
    #[error("Provided path was null or the empty string")]
    EmptyPath,

    /// Nonce was empty
    #[error("Provided nonce was null or the empty string")]
    EmptyNonce,

    /// Nonce contained a naming delimiter
    #[error("Provided nonce {0} contains a prohibited character (- or ,)")]
    ProhibitedCharacter(String),
}

/// Validate user-supplied save parameters
///
/// Runs before any distributed work. Path and nonce must be non-empty and
/// the nonce must not contain a naming delimiter.
pub fn validate_save_params(path: &str, nonce: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(ValidationError::EmptyPath);
    }
    if nonce.is_empty() {
        return Err(ValidationError::EmptyNonce);
    }
    if nonce.contains(&NONCE_PROHIBITED_CHARS[..]) {
        return Err(ValidationError::ProhibitedCharacter(nonce.to_string()));
    }
    Ok(())
}
