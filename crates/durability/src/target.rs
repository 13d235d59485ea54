//! Snapshot target abstraction
//!
//! A target is the per-table write sink of one snapshot on one host. Sites
//! append row blocks for their partition; when the last writer is done the
//! target is closed, which fires its on-close handler exactly once.

use shardsave_core::{HostId, PartitionId, Result, TableInfo};
use std::path::Path;
use std::sync::Arc;

/// Final counters handed to the on-close handler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetCloseInfo {
    /// Total bytes written, header and framing included
    pub bytes_written: u64,
    /// Last write or close error, if any
    pub last_error: Option<String>,
}

/// Callback fired once when a target closes
pub type OnCloseHandler = Box<dyn FnOnce(TargetCloseInfo) + Send>;

/// Per-table write sink
pub trait SnapshotTarget: Send + Sync {
    /// Append one block of rows written by `partition_id`
    ///
    /// Returns the number of bytes the block occupied.
    fn write_rows(&self, partition_id: PartitionId, rows: &[Vec<u8>]) -> Result<u64>;

    /// Bytes written so far
    fn bytes_written(&self) -> u64;

    /// Most recent write error, if any
    fn last_write_error(&self) -> Option<String>;

    /// Install the handler fired on close; replaces any previous handler
    fn set_on_close_handler(&self, handler: OnCloseHandler);

    /// Flush, sync and close
    ///
    /// The on-close handler fires on the first call even if closing fails.
    /// Later calls are no-ops.
    fn close(&self) -> Result<()>;

    /// Location of the target, for messages
    fn path(&self) -> &Path;
}

/// Everything a factory needs to build one table's target
#[derive(Debug, Clone, Copy)]
pub struct TargetSpec<'a> {
    /// File to write
    pub path: &'a Path,
    /// Host writing the file
    pub host_id: HostId,
    /// Cluster name recorded in the header
    pub cluster_name: &'a str,
    /// Database name recorded in the header
    pub database_name: &'a str,
    /// Table being saved
    pub table: &'a TableInfo,
    /// Partition count of the whole cluster
    pub num_partitions: u32,
    /// Partitions hosted locally
    pub partition_ids: &'a [PartitionId],
    /// Snapshot start time (ms since epoch)
    pub created_at: u64,
}

/// Builds targets during leader setup
pub trait TargetFactory: Send + Sync {
    /// Create the target for one table
    fn create_target(&self, spec: &TargetSpec<'_>) -> Result<Arc<dyn SnapshotTarget>>;
}
