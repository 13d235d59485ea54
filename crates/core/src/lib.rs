//! Core types for shardsave
//!
//! This crate defines the foundational types shared by every layer:
//! - HostId / SiteId / PartitionId / TableId: identifiers
//! - TableInfo / Catalog: which tables a snapshot covers
//! - SnapshotRequest: one snapshot attempt, plus save parameter validation
//! - ResultTable: node-, site- and error-shaped result rows
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod request;
pub mod results;
pub mod types;

pub use error::{Error, Result};
pub use request::{validate_save_params, SnapshotRequest, ValidationError, NONCE_PROHIBITED_CHARS};
pub use results::{
    node_result_columns, site_result_columns, Cell, ColumnInfo, ColumnType, ResultShape,
    ResultStatus, ResultTable, CNAME_ERR_MSG, CNAME_HOSTNAME, CNAME_HOST_ID, CNAME_RESULT,
    CNAME_SITE_ID, CNAME_TABLE,
};
pub use types::{now_millis, Catalog, HostId, PartitionId, SiteId, TableId, TableInfo};
