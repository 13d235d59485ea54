//! Snapshot file naming
//!
//! ```text
//! <path>/
//! ├── <nonce>-host_<host>.digest       # table list recorded by the leader
//! ├── <nonce>-<TABLE>.vpt              # replicated table, written once per host
//! └── <nonce>-<TABLE>-host_<host>.vpt  # partitioned table, one file per host
//! ```
//!
//! `-` separates fields, which is why a nonce may not contain it.

use shardsave_core::{HostId, TableInfo};
use std::path::{Path, PathBuf};

/// Default table file extension
pub const DEFAULT_FILE_EXTENSION: &str = "vpt";
/// Digest file extension
pub const DIGEST_FILE_EXTENSION: &str = "digest";

/// File name for one table of one snapshot on one host
pub fn table_file_name(table: &TableInfo, nonce: &str, host_id: HostId, extension: &str) -> String {
    if table.is_replicated {
        format!("{}-{}.{}", nonce, table.name, extension)
    } else {
        format!("{}-{}-host_{}.{}", nonce, table.name, host_id, extension)
    }
}

/// Full path for one table of one snapshot on one host
pub fn table_file_path(
    dir: &Path,
    table: &TableInfo,
    nonce: &str,
    host_id: HostId,
    extension: &str,
) -> PathBuf {
    dir.join(table_file_name(table, nonce, host_id, extension))
}

/// Full path of the digest written by a host's leader
pub fn digest_file_path(dir: &Path, nonce: &str, host_id: HostId) -> PathBuf {
    dir.join(format!("{}-host_{}.{}", nonce, host_id, DIGEST_FILE_EXTENSION))
}
