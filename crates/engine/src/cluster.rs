//! Fragment dispatch
//!
//! A save runs two fragments, each executed once on every site of every
//! host. [`FragmentDispatcher`] is the seam to the cluster transport;
//! [`LocalCluster`] runs every site of every host on its own thread in this
//! process.

use crate::host::HostSnapshotService;
use crate::site::SiteSnapshotProcessor;
use shardsave_core::{ResultStatus, ResultTable, SnapshotRequest};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::error;

/// Work sent to every site during a save
#[derive(Debug, Clone)]
pub enum SnapshotFragment {
    /// Phase A: probe the destination
    SaveFeasibility {
        /// Destination directory
        path: PathBuf,
        /// Snapshot nonce
        nonce: String,
    },
    /// Phase B: create targets and start writing
    CreateTargets(SnapshotRequest),
}

/// Runs a fragment on every site and collects one table per site
pub trait FragmentDispatcher: Send + Sync {
    /// Execute `fragment` on every site of every host
    fn dispatch(&self, fragment: &SnapshotFragment) -> Vec<ResultTable>;
}

impl HostSnapshotService {
    /// Execute one fragment on `site`
    pub fn execute_fragment(&self, site: &SiteSnapshotProcessor, fragment: &SnapshotFragment) -> ResultTable {
        match fragment {
            SnapshotFragment::SaveFeasibility { path, nonce } => {
                self.check_save_feasibility(site.site_id(), path, nonce)
            }
            SnapshotFragment::CreateTargets(request) => self.initiate(site, request),
        }
    }
}

/// One host's service and its sites
pub struct LocalHost {
    service: Arc<HostSnapshotService>,
    sites: Vec<Arc<SiteSnapshotProcessor>>,
}

impl LocalHost {
    /// Pair `service` with the processors of its sites
    pub fn new(service: Arc<HostSnapshotService>, sites: Vec<Arc<SiteSnapshotProcessor>>) -> Self {
        LocalHost { service, sites }
    }

    /// Host service
    pub fn service(&self) -> &Arc<HostSnapshotService> {
        &self.service
    }

    /// Site processors
    pub fn sites(&self) -> &[Arc<SiteSnapshotProcessor>] {
        &self.sites
    }
}

/// In-process cluster
#[derive(Default)]
pub struct LocalCluster {
    hosts: Vec<LocalHost>,
}

impl LocalCluster {
    /// Cluster of `hosts`
    pub fn new(hosts: Vec<LocalHost>) -> Self {
        LocalCluster { hosts }
    }

    /// Hosts in the cluster
    pub fn hosts(&self) -> &[LocalHost] {
        &self.hosts
    }

    /// Run every site's pending snapshot work to completion
    ///
    /// Used after a non-blocking save. Returns write failures across all
    /// sites.
    pub fn drain(&self) -> Vec<String> {
        let mut failures = Vec::new();
        for host in &self.hosts {
            for site in &host.sites {
                match site.complete_snapshot_work() {
                    Ok(site_failures) => failures.extend(site_failures),
                    Err(e) => failures.push(e.to_string()),
                }
            }
        }
        failures
    }
}

impl FragmentDispatcher for LocalCluster {
    fn dispatch(&self, fragment: &SnapshotFragment) -> Vec<ResultTable> {
        thread::scope(|scope| {
            let mut handles = Vec::new();
            for host in &self.hosts {
                for site in &host.sites {
                    let service = &host.service;
                    let handle = thread::Builder::new()
                        .name(format!("shardsave-site-{}", site.site_id()))
                        .spawn_scoped(scope, move || service.execute_fragment(site, fragment))
                        .expect("failed to spawn site thread");
                    handles.push((host, site, handle));
                }
            }

            handles
                .into_iter()
                .map(|(host, site, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        error!(
                            target: "shardsave::save",
                            host = %host.service.host_id(),
                            site = %site.site_id(),
                            "Site thread panicked"
                        );
                        if matches!(fragment, SnapshotFragment::CreateTargets(_)) {
                            site.abandon_snapshot_work();
                        }
                        panicked_site_result(&host.service, site, fragment)
                    })
                })
                .collect()
        })
    }
}

/// FAILURE row standing in for a site whose thread panicked
///
/// Matches the shape the site would have returned: site-scoped for a
/// blocking creation fragment, node-scoped otherwise.
fn panicked_site_result(
    service: &HostSnapshotService,
    site: &SiteSnapshotProcessor,
    fragment: &SnapshotFragment,
) -> ResultTable {
    const MESSAGE: &str = "site panicked while executing snapshot fragment";
    match fragment {
        SnapshotFragment::CreateTargets(request) if request.block => {
            let mut failed = ResultTable::site_results();
            failed.add_site_row(
                service.host_id(),
                service.hostname(),
                site.site_id(),
                ResultStatus::Failure,
                MESSAGE,
            );
            failed
        }
        _ => {
            let mut failed = ResultTable::node_results();
            failed.add_node_row(
                service.host_id(),
                service.hostname(),
                "",
                ResultStatus::Failure,
                MESSAGE,
            );
            failed
        }
    }
}
