//! Shared test utilities for the integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's
//! main.rs.

#![allow(dead_code)]

use shardsave::layers::durability::testing::MemoryTargetFactory;
use shardsave::layers::engine::LocalHost;
use shardsave::{
    Catalog, HostId, HostSnapshotService, LocalCluster, PartitionData, PartitionId, ResultTable,
    SiteId, SiteSnapshotProcessor, SnapshotConfig, SnapshotRegistry, SnapshotSave, TableInfo,
    TargetFactory,
};
use std::path::Path;
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness; set RUST_LOG to see it.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// ORDERS (partitioned), REGIONS (replicated), plus an ineligible view
pub fn mixed_catalog() -> Catalog {
    Catalog::new(
        "test-cluster",
        "test-db",
        vec![
            TableInfo::partitioned(0, "ORDERS"),
            TableInfo::replicated(1, "REGIONS"),
            TableInfo::partitioned(2, "ORDER_TOTALS").materialized(),
        ],
    )
}

/// Partitioned tables only
///
/// Replicated file names carry no host id, so hosts sharing one directory
/// in-process would collide on them.
pub fn partitioned_catalog() -> Catalog {
    Catalog::new(
        "test-cluster",
        "test-db",
        vec![
            TableInfo::partitioned(0, "ORDERS"),
            TableInfo::partitioned(1, "ITEMS"),
            TableInfo::partitioned(2, "PAYMENTS"),
        ],
    )
}

/// Start times are millisecond clocks; two saves in the same millisecond on
/// one host collide in the registry.
pub fn next_millisecond() {
    std::thread::sleep(Duration::from_millis(3));
}

// ============================================================================
// TestCluster - in-process cluster with a temp destination
// ============================================================================

/// In-process cluster plus the directory saves are written to
pub struct TestCluster {
    pub dir: TempDir,
    pub save: SnapshotSave<LocalCluster>,
    pub registry: Arc<SnapshotRegistry>,
}

impl TestCluster {
    pub fn builder() -> TestClusterBuilder {
        TestClusterBuilder {
            hosts: 1,
            sites_per_host: 2,
            catalog: mixed_catalog(),
            factory: None,
            config: SnapshotConfig::default(),
            rows_per_table: 10,
        }
    }

    pub fn cluster(&self) -> &LocalCluster {
        self.save.dispatcher()
    }

    pub fn host(&self, index: usize) -> &Arc<HostSnapshotService> {
        self.cluster().hosts()[index].service()
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn path_str(&self) -> String {
        self.dir.path().to_string_lossy().into_owned()
    }

    pub fn save(&self, nonce: &str, block: bool) -> ResultTable {
        self.save.save(&self.path_str(), nonce, block)
    }

    pub fn drain(&self) -> Vec<String> {
        self.cluster().drain()
    }

    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

pub struct TestClusterBuilder {
    hosts: u32,
    sites_per_host: u32,
    catalog: Catalog,
    factory: Option<Arc<MemoryTargetFactory>>,
    config: SnapshotConfig,
    rows_per_table: usize,
}

impl TestClusterBuilder {
    pub fn hosts(mut self, hosts: u32) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn sites_per_host(mut self, sites: u32) -> Self {
        self.sites_per_host = sites;
        self
    }

    pub fn catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Use in-memory targets instead of table files
    pub fn memory_targets(mut self, factory: Arc<MemoryTargetFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn config(mut self, config: SnapshotConfig) -> Self {
        self.config = config;
        self
    }

    pub fn rows_per_table(mut self, rows: usize) -> Self {
        self.rows_per_table = rows;
        self
    }

    pub fn build(self) -> TestCluster {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(SnapshotRegistry::new(self.config.max_completed_snapshots));
        let num_partitions = self.hosts * self.sites_per_host;

        let hosts = (0..self.hosts)
            .map(|h| {
                let config = self
                    .config
                    .clone()
                    .with_hostname(format!("host-{}", h));
                let mut builder = HostSnapshotService::builder(HostId(h), self.catalog.clone())
                    .config(config)
                    .num_partitions(num_partitions)
                    .registry(Arc::clone(&registry));
                if let Some(factory) = &self.factory {
                    builder = builder.factory(Arc::clone(factory) as Arc<dyn TargetFactory>);
                }

                let mut sites = Vec::new();
                for s in 0..self.sites_per_host {
                    let id = h * self.sites_per_host + s;
                    builder = builder.site(SiteId(id), PartitionId(id));
                    sites.push(Arc::new(SiteSnapshotProcessor::new(
                        SiteId(id),
                        PartitionId(id),
                        self.seed_partition(id),
                    )));
                }
                LocalHost::new(Arc::new(builder.build().unwrap()), sites)
            })
            .collect();

        TestCluster {
            dir,
            save: SnapshotSave::new(LocalCluster::new(hosts)),
            registry,
        }
    }

    fn seed_partition(&self, partition: u32) -> Arc<PartitionData> {
        let data = Arc::new(PartitionData::new());
        for table in &self.catalog.tables {
            data.extend(
                table.id,
                (0..self.rows_per_table)
                    .map(|i| format!("{}-p{}-{}", table.name, partition, i).into_bytes()),
            );
        }
        data
    }
}

/// Row payload seeded for `table` on `partition`
pub fn seeded_row(table: &str, partition: u32, index: usize) -> Vec<u8> {
    format!("{}-p{}-{}", table, partition, index).into_bytes()
}
