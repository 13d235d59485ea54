//! Site-side snapshot execution
//!
//! Each site owns one partition's rows and drains the task queue it took
//! from the barrier, writing its rows into each task's target. Work can be
//! pumped incrementally with [`SiteSnapshotProcessor::do_snapshot_work`]
//! or run to completion with
//! [`SiteSnapshotProcessor::complete_snapshot_work`].

use crate::task_table::{TaskQueue, WriteTask};
use parking_lot::{Mutex, RwLock};
use shardsave_core::{Error, PartitionId, Result, SiteId, TableId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Rows written per block
pub const DEFAULT_ROWS_PER_BLOCK: usize = 512;

/// Rows held by one partition, keyed by table
#[derive(Debug, Default)]
pub struct PartitionData {
    tables: RwLock<HashMap<TableId, Vec<Vec<u8>>>>,
}

impl PartitionData {
    /// Empty partition
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one row to `table`
    pub fn insert(&self, table: TableId, row: impl Into<Vec<u8>>) {
        self.tables.write().entry(table).or_default().push(row.into());
    }

    /// Append many rows to `table`
    pub fn extend<I, R>(&self, table: TableId, rows: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Vec<u8>>,
    {
        self.tables
            .write()
            .entry(table)
            .or_default()
            .extend(rows.into_iter().map(Into::into));
    }

    /// Copy of `table`'s rows
    pub fn rows(&self, table: TableId) -> Vec<Vec<u8>> {
        self.tables.read().get(&table).cloned().unwrap_or_default()
    }

    /// Number of rows in `table`
    pub fn row_count(&self, table: TableId) -> usize {
        self.tables.read().get(&table).map_or(0, Vec::len)
    }
}

/// Snapshot work executor for one site
pub struct SiteSnapshotProcessor {
    site_id: SiteId,
    partition_id: PartitionId,
    data: Arc<PartitionData>,
    rows_per_block: usize,
    pending: Mutex<Option<TaskQueue>>,
    failures: Mutex<Vec<String>>,
    interrupted: AtomicBool,
}

impl SiteSnapshotProcessor {
    /// Processor for `site_id` writing `partition_id`'s rows
    pub fn new(site_id: SiteId, partition_id: PartitionId, data: Arc<PartitionData>) -> Self {
        SiteSnapshotProcessor {
            site_id,
            partition_id,
            data,
            rows_per_block: DEFAULT_ROWS_PER_BLOCK,
            pending: Mutex::new(None),
            failures: Mutex::new(Vec::new()),
            interrupted: AtomicBool::new(false),
        }
    }

    /// Override the block size
    pub fn with_rows_per_block(mut self, rows_per_block: usize) -> Self {
        self.rows_per_block = rows_per_block.max(1);
        self
    }

    /// Site identifier
    pub fn site_id(&self) -> SiteId {
        self.site_id
    }

    /// Partition this site writes
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Partition rows
    pub fn data(&self) -> &Arc<PartitionData> {
        &self.data
    }

    /// Accept the queue taken from the barrier
    pub fn initiate_snapshots(&self, queue: TaskQueue) {
        debug!(
            target: "shardsave::site",
            site = %self.site_id,
            tasks = queue.len(),
            "Initiating snapshot work"
        );
        // An empty queue is finished on arrival; it and any replaced queue
        // are dropped here, outside the lock.
        let (stale, empty) = {
            let mut pending = self.pending.lock();
            let stale = pending.take();
            if queue.is_empty() {
                (stale, Some(queue))
            } else {
                *pending = Some(queue);
                (stale, None)
            }
        };
        if stale.as_ref().map_or(false, |q| !q.is_empty()) {
            warn!(target: "shardsave::site", site = %self.site_id, "Replaced unfinished snapshot work");
        }
        drop(stale);
        drop(empty);
    }

    /// True while tasks remain
    pub fn has_pending_work(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Run up to `max_tasks` tasks; returns how many ran
    pub fn do_snapshot_work(&self, max_tasks: usize) -> usize {
        let mut ran = 0;
        while ran < max_tasks {
            let Some(task) = self.next_task() else {
                break;
            };
            self.write_task(task);
            ran += 1;
        }
        self.finish_if_drained();
        ran
    }

    /// Run every remaining task, then report failures since the last call
    ///
    /// Returns [`Error::Interrupted`] if [`interrupt`](Self::interrupt) was
    /// called; unfinished tasks stay queued.
    pub fn complete_snapshot_work(&self) -> Result<Vec<String>> {
        loop {
            if self.interrupted.swap(false, Ordering::AcqRel) {
                return Err(Error::Interrupted(format!(
                    "site {} interrupted while completing snapshot work",
                    self.site_id
                )));
            }
            if self.do_snapshot_work(1) == 0 && !self.has_pending_work() {
                break;
            }
        }
        Ok(std::mem::take(&mut *self.failures.lock()))
    }

    /// Interrupt the next or current `complete_snapshot_work`
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    /// Drop any queued work without writing it
    ///
    /// Unwritten tasks are reported to their targets as abandoned and the
    /// site counts as finished. Returns true if a queue was dropped.
    pub fn abandon_snapshot_work(&self) -> bool {
        let abandoned = self.pending.lock().take();
        match abandoned {
            Some(queue) => {
                warn!(
                    target: "shardsave::site",
                    site = %self.site_id,
                    tasks = queue.len(),
                    "Abandoning snapshot work"
                );
                drop(queue);
                true
            }
            None => false,
        }
    }

    /// Failures recorded since the last `complete_snapshot_work`
    pub fn take_failures(&self) -> Vec<String> {
        std::mem::take(&mut *self.failures.lock())
    }

    fn next_task(&self) -> Option<WriteTask> {
        self.pending.lock().as_mut().and_then(TaskQueue::pop_front)
    }

    fn finish_if_drained(&self) {
        let finished = {
            let mut pending = self.pending.lock();
            if pending.as_ref().map_or(false, TaskQueue::is_empty) {
                pending.take()
            } else {
                None
            }
        };
        if finished.is_some() {
            debug!(target: "shardsave::site", site = %self.site_id, "Site snapshot work drained");
        }
    }

    fn write_task(&self, task: WriteTask) {
        let rows = self.data.rows(task.table_id());
        let mut written = 0u64;
        for block in rows.chunks(self.rows_per_block) {
            match task.target().write_rows(self.partition_id, block) {
                Ok(bytes) => written += bytes,
                Err(e) => {
                    warn!(
                        target: "shardsave::site",
                        site = %self.site_id,
                        table = task.table_name(),
                        error = %e,
                        "Snapshot write failed"
                    );
                    self.failures
                        .lock()
                        .push(format!("{}: {}", task.table_name(), e));
                    break;
                }
            }
        }
        debug!(
            target: "shardsave::site",
            site = %self.site_id,
            table = task.table_name(),
            rows = rows.len(),
            bytes = written,
            "Wrote table"
        );
        task.complete();
    }
}
