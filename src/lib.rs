//! Shardsave - coordinated point-in-time snapshots for partitioned databases
//!
//! A save writes every eligible table of every host to a destination
//! directory, one file per table per host, while the hosts keep serving.
//!
//! # Quick Start
//!
//! ```ignore
//! use shardsave::{LocalCluster, SnapshotSave};
//!
//! let cluster: LocalCluster = build_my_cluster();
//! let save = SnapshotSave::new(cluster);
//!
//! // Probe the destination, then create targets and write (blocking).
//! let result = save.save("/var/backups", "nightly_0412", true);
//! assert!(!result.has_failure());
//! ```
//!
//! # Architecture
//!
//! - `shardsave-core`: identifiers, catalog, request validation, result tables
//! - `shardsave-durability`: snapshot targets, table file format, naming, digest
//! - `shardsave-engine`: leader election, task distribution, registry, save flow

pub use shardsave_core::{
    now_millis, validate_save_params, Catalog, Cell, ColumnInfo, ColumnType, Error, HostId,
    PartitionId, Result, ResultShape, ResultStatus, ResultTable, SiteId, SnapshotRequest, TableId,
    TableInfo, ValidationError, CNAME_ERR_MSG, CNAME_HOSTNAME, CNAME_HOST_ID, CNAME_RESULT,
    CNAME_SITE_ID, CNAME_TABLE,
};
pub use shardsave_durability::{
    read_snapshot_digest, FileTargetFactory, SnapshotDigest, SnapshotTarget, TableFile,
    TableFileReader, TargetFactory,
};
pub use shardsave_engine::{
    FragmentDispatcher, HostSnapshotService, LocalCluster, LocalHost, PartitionData,
    SiteSnapshotProcessor, SnapshotConfig, SnapshotRegistry, SnapshotSave, SnapshotView,
};

/// Lower layers, for callers that need more than the facade
pub mod layers {
    pub use shardsave_core as core;
    pub use shardsave_durability as durability;
    pub use shardsave_engine as engine;
}
