//! Phase A: save feasibility
//!
//! Runs on every site; only the lowest local site id scans, so each host
//! reports each table once. The scan reserves every table file it approves.

use crate::host::HostSnapshotService;
use shardsave_core::{ResultStatus, ResultTable, SiteId};
use shardsave_durability::{check_table_file, table_file_path};
use std::path::Path;
use tracing::{debug, warn};

/// Error message reported while a previous snapshot is still draining
pub const SNAPSHOT_IN_PROGRESS: &str = "SNAPSHOT IN PROGRESS";

impl HostSnapshotService {
    /// Check that every eligible table can be saved under `path` with `nonce`
    ///
    /// Returns a node-shaped table: empty for every site but the lowest, a
    /// single FAILURE row while this host is still snapshotting, otherwise
    /// one row per table.
    pub fn check_save_feasibility(&self, site_id: SiteId, path: &Path, nonce: &str) -> ResultTable {
        let mut result = ResultTable::node_results();
        if self.lowest_site_id() != Some(site_id) {
            return result;
        }

        if self.is_snapshotting() {
            warn!(
                target: "shardsave::save",
                host = %self.host_id,
                sites = self.snapshotting.remaining(),
                "Save rejected while a snapshot is in progress"
            );
            result.add_node_row(
                self.host_id,
                self.hostname(),
                "",
                ResultStatus::Failure,
                SNAPSHOT_IN_PROGRESS,
            );
            return result;
        }

        for table in self.catalog.tables_to_save() {
            let file = table_file_path(
                path,
                &table,
                nonce,
                self.host_id,
                &self.config.file_extension,
            );
            let outcome = check_table_file(&file);
            match outcome.error_message() {
                None => result.add_node_row(
                    self.host_id,
                    self.hostname(),
                    &table.name,
                    ResultStatus::Success,
                    "",
                ),
                Some(message) => {
                    debug!(target: "shardsave::save", table = %table.name, %message, "Table not saveable");
                    result.add_node_row(
                        self.host_id,
                        self.hostname(),
                        &table.name,
                        ResultStatus::Failure,
                        &message,
                    );
                }
            }
        }
        result
    }
}
