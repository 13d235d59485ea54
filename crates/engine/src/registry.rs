//! Snapshot registry
//!
//! Process-wide ledger of in-flight and completed snapshots, keyed by
//! (start time, host). One entry is created by a host's leader during setup
//! and then mutated only through [`SnapshotRegistry::update_table`], called
//! from target close handlers that may run on any site thread.
//!
//! # Finalization
//!
//! Each entry counts its unfinished tables under the entry's lock. The update
//! that moves a table from unfinished to finished decrements the count; the
//! one that observes zero stamps `time_finished`. Exactly one update can do
//! so, and only after every table has reported.

use parking_lot::Mutex;
use shardsave_core::{now_millis, Error, HostId, Result, TableInfo};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Progress of one table within a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStatus {
    /// Table name
    pub name: String,
    /// Bytes written by the table's target
    pub bytes_written: u64,
    /// When the target closed (ms since epoch); `None` while pending
    pub finish_time: Option<u64>,
    /// Last error reported for this table
    pub last_error: Option<String>,
}

impl TableStatus {
    fn pending(name: &str) -> Self {
        TableStatus {
            name: name.to_string(),
            bytes_written: 0,
            finish_time: None,
            last_error: None,
        }
    }

    /// Copy of this status marked finished
    pub fn completed(&self, bytes_written: u64, finish_time: u64, last_error: Option<String>) -> Self {
        TableStatus {
            name: self.name.clone(),
            bytes_written,
            finish_time: Some(finish_time),
            last_error,
        }
    }

    /// True once the table's target has closed
    pub fn is_finished(&self) -> bool {
        self.finish_time.is_some()
    }
}

/// Point-in-time copy of a registry entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotView {
    /// Snapshot start time (ms since epoch)
    pub start_time: u64,
    /// Host the entry belongs to
    pub host_id: HostId,
    /// Destination directory
    pub path: PathBuf,
    /// Snapshot nonce
    pub nonce: String,
    /// When setup began (ms since epoch)
    pub time_started: u64,
    /// When the last table finished; `None` while in progress
    pub time_finished: Option<u64>,
    /// Per-table progress in catalog order
    pub tables: Vec<TableStatus>,
}

impl SnapshotView {
    /// Total bytes across tables
    pub fn total_bytes(&self) -> u64 {
        self.tables.iter().map(|t| t.bytes_written).sum()
    }

    /// True if any table reported an error
    pub fn has_errors(&self) -> bool {
        self.tables.iter().any(|t| t.last_error.is_some())
    }
}

/// Result of one table update
#[derive(Debug, Clone)]
pub struct TableUpdate {
    /// The table's new status
    pub table: TableStatus,
    /// Finalized entry, present only for the update that finished the snapshot
    pub finished: Option<SnapshotView>,
}

struct SnapshotState {
    tables: Vec<TableStatus>,
    remaining: usize,
    time_finished: Option<u64>,
}

/// One registry entry
pub struct Snapshot {
    start_time: u64,
    host_id: HostId,
    path: PathBuf,
    nonce: String,
    state: Mutex<SnapshotState>,
}

impl Snapshot {
    fn new(start_time: u64, host_id: HostId, path: &Path, nonce: &str, tables: &[TableInfo]) -> Self {
        Snapshot {
            start_time,
            host_id,
            path: path.to_path_buf(),
            nonce: nonce.to_string(),
            state: Mutex::new(SnapshotState {
                tables: tables.iter().map(|t| TableStatus::pending(&t.name)).collect(),
                remaining: tables.len(),
                time_finished: None,
            }),
        }
    }

    /// Snapshot start time
    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    /// Host the entry belongs to
    pub fn host_id(&self) -> HostId {
        self.host_id
    }

    /// Snapshot nonce
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// True once every table has finished
    pub fn is_finished(&self) -> bool {
        self.state.lock().time_finished.is_some()
    }

    /// Tables still pending
    pub fn remaining_tables(&self) -> usize {
        self.state.lock().remaining
    }

    /// Consistent copy of the entry
    pub fn view(&self) -> SnapshotView {
        let state = self.state.lock();
        self.view_locked(&state)
    }

    fn view_locked(&self, state: &SnapshotState) -> SnapshotView {
        SnapshotView {
            start_time: self.start_time,
            host_id: self.host_id,
            path: self.path.clone(),
            nonce: self.nonce.clone(),
            time_started: self.start_time,
            time_finished: state.time_finished,
            tables: state.tables.clone(),
        }
    }

    fn update_table<F>(&self, table_name: &str, updater: F) -> Result<TableUpdate>
    where
        F: FnOnce(&TableStatus) -> TableStatus,
    {
        let mut state = self.state.lock();
        let index = state
            .tables
            .iter()
            .position(|t| t.name == table_name)
            .ok_or_else(|| {
                Error::InvalidOperation(format!(
                    "table {} is not part of snapshot {}",
                    table_name, self.nonce
                ))
            })?;

        let was_finished = state.tables[index].is_finished();
        let mut updated = updater(&state.tables[index]);
        updated.name = table_name.to_string();
        if was_finished && !updated.is_finished() {
            return Err(Error::InvalidOperation(format!(
                "table {} of snapshot {} cannot return to pending",
                table_name, self.nonce
            )));
        }
        state.tables[index] = updated.clone();

        let mut finished = None;
        if !was_finished && updated.is_finished() {
            state.remaining -= 1;
            if state.remaining == 0 {
                state.time_finished = Some(now_millis().max(self.start_time));
                finished = Some(self.view_locked(&state));
            }
        }

        Ok(TableUpdate {
            table: updated,
            finished,
        })
    }
}

type SnapshotKey = (u64, HostId);

/// Ledger of snapshots known to this process
///
/// Instantiated per host service and injected, so independent registries
/// can coexist in one process.
pub struct SnapshotRegistry {
    snapshots: Mutex<BTreeMap<SnapshotKey, Arc<Snapshot>>>,
    max_completed: usize,
}

impl SnapshotRegistry {
    /// Create a registry keeping at most `max_completed` finished entries
    pub fn new(max_completed: usize) -> Self {
        SnapshotRegistry {
            snapshots: Mutex::new(BTreeMap::new()),
            max_completed: max_completed.max(1),
        }
    }

    /// Register a new snapshot
    ///
    /// Fails with [`Error::DuplicateSnapshot`] if an entry with the same start
    /// time and host exists; the existing entry is left untouched.
    pub fn start_snapshot(
        &self,
        start_time: u64,
        host_id: HostId,
        path: &Path,
        nonce: &str,
        tables: &[TableInfo],
    ) -> Result<Arc<Snapshot>> {
        let mut snapshots = self.snapshots.lock();
        let key = (start_time, host_id);
        if snapshots.contains_key(&key) {
            warn!(target: "shardsave::registry", start_time, host = %host_id, nonce, "Duplicate snapshot registration");
            return Err(Error::DuplicateSnapshot {
                start_time,
                host_id,
            });
        }
        let snapshot = Arc::new(Snapshot::new(start_time, host_id, path, nonce, tables));
        snapshots.insert(key, Arc::clone(&snapshot));
        debug!(target: "shardsave::registry", start_time, host = %host_id, nonce, tables = tables.len(), "Snapshot registered");
        Ok(snapshot)
    }

    /// Remove an entry that never produced any tasks
    ///
    /// Returns false if the entry was not registered.
    pub fn discard_snapshot(&self, snapshot: &Snapshot) -> bool {
        let removed = self
            .snapshots
            .lock()
            .remove(&(snapshot.start_time, snapshot.host_id))
            .is_some();
        if removed {
            debug!(target: "shardsave::registry", nonce = %snapshot.nonce, "Snapshot discarded");
        }
        removed
    }

    /// Atomically replace one table's status
    ///
    /// The update that finishes the last pending table finalizes the entry and
    /// receives the finalized view in [`TableUpdate::finished`].
    pub fn update_table<F>(&self, snapshot: &Snapshot, table_name: &str, updater: F) -> Result<TableUpdate>
    where
        F: FnOnce(&TableStatus) -> TableStatus,
    {
        let update = snapshot.update_table(table_name, updater)?;
        if let Some(view) = &update.finished {
            let finished_at = view.time_finished.unwrap_or(view.time_started);
            let duration = (finished_at - view.time_started) as f64 / 1000.0;
            info!(
                target: "shardsave::registry",
                nonce = %view.nonce,
                host = %view.host_id,
                bytes = view.total_bytes(),
                "Snapshot {} finished at {} and took {} seconds",
                view.nonce,
                finished_at,
                duration
            );
            self.prune_completed();
        }
        Ok(update)
    }

    /// Look up an entry
    pub fn get(&self, start_time: u64, host_id: HostId) -> Option<Arc<Snapshot>> {
        self.snapshots.lock().get(&(start_time, host_id)).cloned()
    }

    /// Every registered entry, oldest first
    pub fn snapshots(&self) -> Vec<SnapshotView> {
        let entries: Vec<_> = self.snapshots.lock().values().cloned().collect();
        entries.iter().map(|s| s.view()).collect()
    }

    /// Entries still waiting on at least one table
    pub fn in_progress(&self) -> Vec<SnapshotView> {
        self.snapshots()
            .into_iter()
            .filter(|s| s.time_finished.is_none())
            .collect()
    }

    fn prune_completed(&self) {
        let mut snapshots = self.snapshots.lock();
        let completed: Vec<SnapshotKey> = snapshots
            .iter()
            .filter(|(_, s)| s.is_finished())
            .map(|(k, _)| *k)
            .collect();
        if completed.len() > self.max_completed {
            let excess = completed.len() - self.max_completed;
            for key in completed.into_iter().take(excess) {
                snapshots.remove(&key);
            }
        }
    }
}
