//! Phase B: target creation and hand-off
//!
//! Every local site calls [`HostSnapshotService::initiate`]. The first one
//! through the barrier runs setup for the host:
//!
//! 1. reject if a snapshot is still in flight
//! 2. record the table digest
//! 3. register the snapshot
//! 4. open one target per table; a table whose target cannot be opened is
//!    reported and marked finished with its error
//! 5. distribute tasks and mark every local site as snapshotting
//!
//! Whatever happens, including a panic, the leader then releases one permit
//! per local site. Each site takes one queue and either returns at once or,
//! for a blocking save, drains its queue first.

use crate::barrier::Role;
use crate::host::HostSnapshotService;
use crate::registry::Snapshot;
use crate::site::SiteSnapshotProcessor;
use crate::task_table::{distribute_tasks, TargetHandle, TaskQueue};
use shardsave_core::{
    now_millis, Error, Result, ResultStatus, ResultTable, SnapshotRequest, TableInfo,
    CNAME_ERR_MSG, CNAME_RESULT,
};
use shardsave_durability::{record_snapshot_table_list, table_file_path, TargetCloseInfo, TargetSpec};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl HostSnapshotService {
    /// Create targets (leader only) and start this site's share of the work
    ///
    /// Non-blocking saves return node-shaped rows: the leader's per-table
    /// creation outcomes, empty for other sites. Blocking saves return one
    /// site-shaped row for this site once its tasks are written.
    pub fn initiate(&self, site: &SiteSnapshotProcessor, request: &SnapshotRequest) -> ResultTable {
        debug!(
            target: "shardsave::setup",
            site = %site.site_id(),
            nonce = %request.nonce,
            "Creating snapshot targets and handing them to sites"
        );
        let mut created = ResultTable::node_results();

        if self.barrier.try_enter_setup() == Role::Leader {
            debug!(target: "shardsave::setup", site = %site.site_id(), "Elected setup leader");
            self.lead_setup(request, &mut created);
        }

        let queue = match self.barrier.await_release(self.config.release_timeout()) {
            Ok(queue) => queue,
            Err(e) => {
                warn!(target: "shardsave::setup", site = %site.site_id(), error = %e, "Site gave up waiting for setup");
                let message = e.to_string();
                if request.block {
                    return self.site_result(site, vec![message]);
                }
                created.add_node_row(
                    self.host_id,
                    self.hostname(),
                    "",
                    ResultStatus::Failure,
                    &message,
                );
                return created;
            }
        };

        if queue.is_empty() {
            debug!(target: "shardsave::setup", site = %site.site_id(), "No snapshot work for site");
        }
        site.initiate_snapshots(queue);

        if !request.block {
            return created;
        }

        match site.complete_snapshot_work() {
            Ok(write_failures) => {
                let mut errors = failure_messages(&created);
                errors.extend(write_failures);
                self.site_result(site, errors)
            }
            Err(e) => self.site_result(site, vec![e.to_string()]),
        }
    }

    fn site_result(&self, site: &SiteSnapshotProcessor, errors: Vec<String>) -> ResultTable {
        let mut result = ResultTable::site_results();
        let (status, message) = if errors.is_empty() {
            (ResultStatus::Success, String::new())
        } else {
            (ResultStatus::Failure, errors.join("; "))
        };
        result.add_site_row(self.host_id, self.hostname(), site.site_id(), status, &message);
        result
    }

    fn lead_setup(&self, request: &SnapshotRequest, created: &mut ResultTable) {
        let num_sites = self.num_local_sites();
        let mut opened: Vec<Arc<TargetHandle>> = Vec::new();
        let mut entry: Option<Arc<Snapshot>> = None;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.build_tasks(request, created, &mut opened, &mut entry)
        }));
        let failure = match outcome {
            Ok(Ok(queues)) => {
                self.barrier.publish(queues);
                None
            }
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };

        if let Some(message) = failure {
            error!(target: "shardsave::setup", nonce = %request.nonce, error = %message, "Snapshot setup failed");
            self.barrier.clear_pending();
            if let Some(entry) = entry.take() {
                self.registry.discard_snapshot(&entry);
            }
            for handle in opened.drain(..) {
                handle.abort();
            }
            created.add_node_row(
                self.host_id,
                self.hostname(),
                "",
                ResultStatus::Failure,
                &format!(
                    "SNAPSHOT INITIATION OF {} {} RESULTED IN: {}",
                    request.path.display(),
                    request.nonce,
                    message
                ),
            );
        }

        self.barrier.release(num_sites);
    }

    fn build_tasks(
        &self,
        request: &SnapshotRequest,
        created: &mut ResultTable,
        opened: &mut Vec<Arc<TargetHandle>>,
        entry: &mut Option<Arc<Snapshot>>,
    ) -> Result<Vec<TaskQueue>> {
        if self.snapshotting.is_active() {
            return Err(Error::SnapshotInProgress(self.host_id));
        }

        let tables = self.catalog.tables_to_save();
        record_snapshot_table_list(
            request.path(),
            request.start_time,
            &request.nonce,
            self.host_id,
            &tables,
        )?;
        let snapshot = self.registry.start_snapshot(
            request.start_time,
            self.host_id,
            request.path(),
            &request.nonce,
            &tables,
        )?;
        *entry = Some(Arc::clone(&snapshot));

        for table in &tables {
            let path = table_file_path(
                request.path(),
                table,
                &request.nonce,
                self.host_id,
                &self.config.file_extension,
            );
            match self.open_target(table, &path, request, &snapshot) {
                Ok(handle) => {
                    opened.push(handle);
                    created.add_node_row(
                        self.host_id,
                        self.hostname(),
                        &table.name,
                        ResultStatus::Success,
                        "",
                    );
                }
                Err(e) => {
                    let message = format!(
                        "SNAPSHOT INITIATION OF {} RESULTED IN: {}",
                        path.display(),
                        e
                    );
                    warn!(target: "shardsave::setup", table = %table.name, error = %e, "Target creation failed");
                    // The table will never close a target; finish it here so
                    // the snapshot can still complete.
                    let failed_at = now_millis();
                    self.registry.update_table(&snapshot, &table.name, |status| {
                        status.completed(0, failed_at, Some(message.clone()))
                    })?;
                    created.add_node_row(
                        self.host_id,
                        self.hostname(),
                        &table.name,
                        ResultStatus::Failure,
                        &message,
                    );
                }
            }
        }

        if opened.is_empty() {
            info!(target: "shardsave::setup", nonce = %request.nonce, "No tables to snapshot on this host");
            self.registry.discard_snapshot(&snapshot);
            *entry = None;
            return Ok(Vec::new());
        }

        let num_sites = self.num_local_sites();
        let mut queues = distribute_tasks(opened, num_sites);
        if !self.snapshotting.begin(num_sites) {
            return Err(Error::SnapshotInProgress(self.host_id));
        }
        for queue in queues.iter_mut() {
            queue.track_completion(Arc::clone(&self.snapshotting));
        }
        debug!(
            target: "shardsave::setup",
            nonce = %request.nonce,
            targets = opened.len(),
            sites = num_sites,
            "Snapshot tasks distributed"
        );
        Ok(queues)
    }

    fn open_target(
        &self,
        table: &TableInfo,
        path: &Path,
        request: &SnapshotRequest,
        snapshot: &Arc<Snapshot>,
    ) -> Result<Arc<TargetHandle>> {
        let partitions = self.local_partitions();
        let spec = TargetSpec {
            path,
            host_id: self.host_id,
            cluster_name: &self.catalog.cluster_name,
            database_name: &self.catalog.database_name,
            table,
            num_partitions: self.num_partitions,
            partition_ids: &partitions,
            created_at: request.start_time,
        };
        let target = self.factory.create_target(&spec)?;

        let registry = Arc::clone(&self.registry);
        let snapshot = Arc::clone(snapshot);
        let table_name = table.name.clone();
        Ok(TargetHandle::new(
            table.clone(),
            target,
            move |info: TargetCloseInfo| {
                let closed_at = now_millis();
                if let Err(e) = registry.update_table(&snapshot, &table_name, |status| {
                    status.completed(info.bytes_written, closed_at, info.last_error.clone())
                }) {
                    warn!(target: "shardsave::registry", table = %table_name, error = %e, "Failed to record table completion");
                }
            },
        ))
    }
}

/// Error messages of every FAILURE row in a node-shaped table
fn failure_messages(table: &ResultTable) -> Vec<String> {
    (0..table.row_count())
        .filter(|&row| table.get_string(row, CNAME_RESULT) == Some(ResultStatus::Failure.as_str()))
        .filter_map(|row| table.get_string(row, CNAME_ERR_MSG).map(str::to_string))
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic during snapshot setup".to_string()
    }
}
