//! Per-host snapshot service
//!
//! Holds everything the sites of one host share while saving: the setup
//! barrier, the in-flight counter, the registry and the target factory.
//! The two fragment handlers live next to it in `feasibility.rs` and
//! `initiator.rs`.

use crate::barrier::BarrierCoordinator;
use crate::config::SnapshotConfig;
use crate::registry::SnapshotRegistry;
use crate::task_table::SnapshottingSites;
use shardsave_core::{Catalog, Error, HostId, PartitionId, Result, SiteId};
use shardsave_durability::{FileTargetFactory, TargetFactory};
use std::sync::Arc;

/// Snapshot state shared by the sites of one host
pub struct HostSnapshotService {
    pub(crate) host_id: HostId,
    pub(crate) config: SnapshotConfig,
    pub(crate) catalog: Catalog,
    pub(crate) sites: Vec<(SiteId, PartitionId)>,
    pub(crate) num_partitions: u32,
    pub(crate) barrier: Arc<BarrierCoordinator>,
    pub(crate) registry: Arc<SnapshotRegistry>,
    pub(crate) factory: Arc<dyn TargetFactory>,
    pub(crate) snapshotting: Arc<SnapshottingSites>,
}

impl HostSnapshotService {
    /// Start building the service for `host_id`
    pub fn builder(host_id: HostId, catalog: Catalog) -> HostServiceBuilder {
        HostServiceBuilder {
            host_id,
            catalog,
            config: SnapshotConfig::default(),
            sites: Vec::new(),
            num_partitions: None,
            factory: None,
            registry: None,
            barrier: None,
        }
    }

    /// Host identifier
    pub fn host_id(&self) -> HostId {
        self.host_id
    }

    /// Hostname reported in result rows
    pub fn hostname(&self) -> &str {
        &self.config.hostname
    }

    /// Active configuration
    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Schema used to pick tables
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Local sites and the partition each one writes
    pub fn sites(&self) -> &[(SiteId, PartitionId)] {
        &self.sites
    }

    /// Number of local sites
    pub fn num_local_sites(&self) -> usize {
        self.sites.len()
    }

    /// Lowest local site id; only that site runs the feasibility scan
    pub fn lowest_site_id(&self) -> Option<SiteId> {
        self.sites.iter().map(|(site, _)| *site).min()
    }

    /// Partitions hosted locally
    pub fn local_partitions(&self) -> Vec<PartitionId> {
        self.sites.iter().map(|(_, partition)| *partition).collect()
    }

    /// Setup barrier
    pub fn barrier(&self) -> &Arc<BarrierCoordinator> {
        &self.barrier
    }

    /// Snapshot registry
    pub fn registry(&self) -> &Arc<SnapshotRegistry> {
        &self.registry
    }

    /// Sites still working on the current snapshot
    pub fn snapshotting_sites(&self) -> &Arc<SnapshottingSites> {
        &self.snapshotting
    }

    /// True while a snapshot is in flight on this host
    pub fn is_snapshotting(&self) -> bool {
        self.snapshotting.is_active()
    }
}

/// Builder for [`HostSnapshotService`]
pub struct HostServiceBuilder {
    host_id: HostId,
    catalog: Catalog,
    config: SnapshotConfig,
    sites: Vec<(SiteId, PartitionId)>,
    num_partitions: Option<u32>,
    factory: Option<Arc<dyn TargetFactory>>,
    registry: Option<Arc<SnapshotRegistry>>,
    barrier: Option<Arc<BarrierCoordinator>>,
}

impl HostServiceBuilder {
    /// Use `config` instead of the defaults
    pub fn config(mut self, config: SnapshotConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a local site writing `partition`
    pub fn site(mut self, site: SiteId, partition: PartitionId) -> Self {
        self.sites.push((site, partition));
        self
    }

    /// Cluster-wide partition count; defaults to the local site count
    pub fn num_partitions(mut self, n: u32) -> Self {
        self.num_partitions = Some(n);
        self
    }

    /// Target factory; defaults to [`FileTargetFactory`]
    pub fn factory(mut self, factory: Arc<dyn TargetFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Share an existing registry
    pub fn registry(mut self, registry: Arc<SnapshotRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Share an existing barrier
    pub fn barrier(mut self, barrier: Arc<BarrierCoordinator>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<HostSnapshotService> {
        self.config
            .validate()
            .map_err(|e| Error::InvalidOperation(e.to_string()))?;
        if self.sites.is_empty() {
            return Err(Error::InvalidOperation(format!(
                "host {} has no local sites",
                self.host_id
            )));
        }
        let mut site_ids: Vec<SiteId> = self.sites.iter().map(|(s, _)| *s).collect();
        site_ids.sort();
        site_ids.dedup();
        if site_ids.len() != self.sites.len() {
            return Err(Error::InvalidOperation(format!(
                "host {} lists a site twice",
                self.host_id
            )));
        }

        let num_partitions = self
            .num_partitions
            .unwrap_or(self.sites.len() as u32);
        let registry = self.registry.unwrap_or_else(|| {
            Arc::new(SnapshotRegistry::new(self.config.max_completed_snapshots))
        });

        Ok(HostSnapshotService {
            host_id: self.host_id,
            catalog: self.catalog,
            sites: self.sites,
            num_partitions,
            barrier: self.barrier.unwrap_or_default(),
            registry,
            factory: self
                .factory
                .unwrap_or_else(|| Arc::new(FileTargetFactory)),
            snapshotting: Arc::new(SnapshottingSites::new()),
            config: self.config,
        })
    }
}
