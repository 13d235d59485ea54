//! Snapshot table digest
//!
//! Before creating any target the leader records which tables the snapshot
//! covers, so a restore can tell a missing table file from a table that was
//! never part of the snapshot.
//!
//! Layout: `crc32 u32 (LE) | JSON body`. Written with the write-fsync-rename
//! pattern so a digest is either complete or absent.

use crate::naming::digest_file_path;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use shardsave_core::{Error, HostId, Result, TableInfo};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Table list recorded for one snapshot on one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDigest {
    /// Snapshot start time (ms since epoch)
    pub start_time: u64,
    /// Snapshot nonce
    pub nonce: String,
    /// Host that wrote the digest
    pub host_id: u32,
    /// Table names in catalog order
    pub tables: Vec<String>,
}

/// Write the digest for one snapshot on one host
///
/// Fails if a digest for the same nonce and host already exists.
pub fn record_snapshot_table_list(
    dir: &Path,
    start_time: u64,
    nonce: &str,
    host_id: HostId,
    tables: &[TableInfo],
) -> Result<PathBuf> {
    let final_path = digest_file_path(dir, nonce, host_id);
    if final_path.exists() {
        return Err(Error::InvalidOperation(format!(
            "digest {} already exists",
            final_path.display()
        )));
    }

    let digest = SnapshotDigest {
        start_time,
        nonce: nonce.to_string(),
        host_id: host_id.0,
        tables: tables.iter().map(|t| t.name.clone()).collect(),
    };
    let body = serde_json::to_vec(&digest)?;

    let temp_path = dir.join(format!(".{}-host_{}.digest.tmp", nonce, host_id));
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_u32::<LittleEndian>(crc32fast::hash(&body))?;
    file.write_all(&body)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&temp_path, &final_path)?;
    File::open(dir)?.sync_all()?;

    debug!(target: "shardsave::digest", path = %final_path.display(), tables = digest.tables.len(), "Recorded snapshot table list");
    Ok(final_path)
}

/// Read and verify a digest
pub fn read_snapshot_digest(path: &Path) -> Result<SnapshotDigest> {
    let bytes = std::fs::read(path)?;
    let mut cursor = bytes.as_slice();
    let stored = cursor.read_u32::<LittleEndian>()?;
    let actual = crc32fast::hash(cursor);
    if stored != actual {
        return Err(Error::SerializationError(format!(
            "digest {} checksum mismatch: expected {:#010x}, got {:#010x}",
            path.display(),
            stored,
            actual
        )));
    }
    Ok(serde_json::from_slice(cursor)?)
}
