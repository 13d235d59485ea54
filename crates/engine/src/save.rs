//! Client-facing save entry point
//!
//! A save is two distributed phases:
//!
//! - **Phase A** probes every host's destination. Any FAILURE row aborts the
//!   save and the Phase A table is returned as is.
//! - **Phase B** elects a leader per host, creates targets and hands tasks
//!   to every site.

use crate::aggregator::{aggregate_creation, aggregate_feasibility};
use crate::cluster::{FragmentDispatcher, SnapshotFragment};
use shardsave_core::{now_millis, validate_save_params, ResultTable, SnapshotRequest};
use std::path::PathBuf;
use tracing::{info, warn};

/// Runs saves through a [`FragmentDispatcher`]
pub struct SnapshotSave<D> {
    dispatcher: D,
}

impl<D: FragmentDispatcher> SnapshotSave<D> {
    /// Save coordinator over `dispatcher`
    pub fn new(dispatcher: D) -> Self {
        SnapshotSave { dispatcher }
    }

    /// Dispatcher in use
    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// Save every eligible table to `path` under `nonce`
    ///
    /// Invalid parameters yield a single-column error table and no
    /// distributed work. With `block` set the call returns once every site
    /// has written its tasks.
    pub fn save(&self, path: &str, nonce: &str, block: bool) -> ResultTable {
        let start_time = now_millis();
        info!(
            target: "shardsave::save",
            "Saving database to path: {}, ID: {} at {}",
            path,
            nonce,
            start_time
        );

        if let Err(e) = validate_save_params(path, nonce) {
            warn!(target: "shardsave::save", error = %e, "Rejected save request");
            return ResultTable::error_message(e.to_string());
        }

        let feasibility = SnapshotFragment::SaveFeasibility {
            path: PathBuf::from(path),
            nonce: nonce.to_string(),
        };
        let checked = match aggregate_feasibility(&self.dispatcher.dispatch(&feasibility)) {
            Ok(table) => table,
            Err(e) => return ResultTable::error_message(e.to_string()),
        };
        if checked.has_failure() {
            warn!(target: "shardsave::save", nonce, "Save is not feasible");
            return checked;
        }

        let request = SnapshotRequest::new(start_time, path, nonce, block);
        let created = match aggregate_creation(
            &self
                .dispatcher
                .dispatch(&SnapshotFragment::CreateTargets(request)),
        ) {
            Ok(table) => table,
            Err(e) => return ResultTable::error_message(e.to_string()),
        };

        info!(
            target: "shardsave::save",
            "Snapshot initiation took {} milliseconds",
            now_millis().saturating_sub(start_time)
        );
        created
    }
}
