//! Durability layer for shardsave
//!
//! This crate handles everything that touches disk:
//!
//! - Snapshot target abstraction and its file-backed implementation
//! - Table file format (header, CRC-checked row blocks, footer) and reader
//! - Snapshot file naming
//! - Table digest recorded by each host's leader
//! - Feasibility probe run before any target is created
//! - In-memory targets with fault injection for tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod digest;
pub mod feasibility;
pub mod file_target;
pub mod naming;
pub mod target;
pub mod testing;

pub use digest::{read_snapshot_digest, record_snapshot_table_list, SnapshotDigest};
pub use feasibility::{check_table_file, Feasibility};
pub use file_target::{
    FileSnapshotTarget, FileTargetFactory, RowBlock, TableFile, TableFileError, TableFileHeader,
    TableFileReader, TABLE_FILE_MAGIC, TABLE_FILE_VERSION,
};
pub use naming::{
    digest_file_path, table_file_name, table_file_path, DEFAULT_FILE_EXTENSION,
    DIGEST_FILE_EXTENSION,
};
pub use target::{OnCloseHandler, SnapshotTarget, TargetCloseInfo, TargetFactory, TargetSpec};
