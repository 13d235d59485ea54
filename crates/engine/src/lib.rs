//! Snapshot coordination engine for shardsave
//!
//! This crate orchestrates a save across the sites of every host:
//! - SnapshotSave: validation, feasibility phase, creation phase, aggregation
//! - HostSnapshotService: per-host state and the two fragment handlers
//! - BarrierCoordinator: leader election and task hand-off between sites
//! - Task distribution and target lifetime (last writer closes)
//! - SiteSnapshotProcessor: per-site execution of write tasks
//! - SnapshotRegistry: in-flight and completed snapshot bookkeeping
//!
//! The engine is the only component that knows about:
//! - Which site leads setup on each host
//! - When a host is still snapshotting
//! - How per-site results are merged

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregator;
pub mod barrier;
pub mod cluster;
pub mod config;
pub mod feasibility;
pub mod host;
pub mod initiator;
pub mod registry;
pub mod save;
pub mod site;
pub mod task_table;

pub use aggregator::{aggregate_creation, aggregate_feasibility};
pub use barrier::{BarrierCoordinator, BarrierError, BarrierState, Role};
pub use cluster::{FragmentDispatcher, LocalCluster, LocalHost, SnapshotFragment};
pub use config::{ConfigError, SnapshotConfig, CONFIG_FILE_NAME};
pub use feasibility::SNAPSHOT_IN_PROGRESS;
pub use host::{HostServiceBuilder, HostSnapshotService};
pub use registry::{Snapshot, SnapshotRegistry, SnapshotView, TableStatus, TableUpdate};
pub use save::SnapshotSave;
pub use site::{PartitionData, SiteSnapshotProcessor, DEFAULT_ROWS_PER_BLOCK};
pub use task_table::{distribute_tasks, SnapshottingSites, TargetHandle, TaskQueue, WriteTask};
