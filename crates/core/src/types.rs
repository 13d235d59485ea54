//! Identifiers and catalog types
//!
//! - HostId / SiteId / PartitionId: where work runs
//! - TableId / TableInfo: what gets written
//! - Catalog: the schema view used to pick eligible tables

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one machine in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostId(pub u32);

/// Identifier of one execution site (worker) on a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiteId(pub u32);

/// Identifier of one data partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId(pub u32);

/// Catalog-relative table index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId(pub u32);

macro_rules! impl_id_display {
    ($($ty:ty),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )*
    };
}

impl_id_display!(HostId, SiteId, PartitionId, TableId);

/// Catalog metadata for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Catalog-relative index
    pub id: TableId,
    /// Table name as it appears in the catalog
    pub name: String,
    /// Full copy on every partition (true) or sharded rows (false)
    pub is_replicated: bool,
    /// Materialized views are derived data and never saved
    #[serde(default)]
    pub is_materialized: bool,
    /// Export-only tables hold no queryable rows
    #[serde(default)]
    pub is_export_only: bool,
}

impl TableInfo {
    /// Create a partitioned table
    pub fn partitioned(id: u32, name: impl Into<String>) -> Self {
        TableInfo {
            id: TableId(id),
            name: name.into(),
            is_replicated: false,
            is_materialized: false,
            is_export_only: false,
        }
    }

    /// Create a replicated table
    pub fn replicated(id: u32, name: impl Into<String>) -> Self {
        TableInfo {
            is_replicated: true,
            ..Self::partitioned(id, name)
        }
    }

    /// Mark as a materialized view
    pub fn materialized(mut self) -> Self {
        self.is_materialized = true;
        self
    }

    /// Mark as export-only
    pub fn export_only(mut self) -> Self {
        self.is_export_only = true;
        self
    }

    /// Whether this table takes part in a snapshot
    pub fn is_snapshot_eligible(&self) -> bool {
        !self.is_materialized && !self.is_export_only
    }
}

/// Schema view of one database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    /// Cluster name recorded in every target header
    pub cluster_name: String,
    /// Database name recorded in every target header
    pub database_name: String,
    /// Tables in catalog iteration order
    pub tables: Vec<TableInfo>,
}

impl Catalog {
    /// Create a catalog
    pub fn new(
        cluster_name: impl Into<String>,
        database_name: impl Into<String>,
        tables: Vec<TableInfo>,
    ) -> Self {
        Catalog {
            cluster_name: cluster_name.into(),
            database_name: database_name.into(),
            tables,
        }
    }

    /// Tables to save, in catalog order
    ///
    /// Skips materialized views and export-only tables.
    pub fn tables_to_save(&self) -> Vec<TableInfo> {
        self.tables
            .iter()
            .filter(|t| t.is_snapshot_eligible())
            .cloned()
            .collect()
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
