//! Per-site write tasks and their distribution
//!
//! The setup leader opens one target per table and wraps it in a
//! [`TargetHandle`] that counts the sites still writing to it. Tasks are then
//! spread over one [`TaskQueue`] per local site:
//!
//! - partitioned tables: one task per site, every site writes its partition
//! - replicated tables: one task in total, assigned round-robin
//!
//! Dropping a task (completed or not) releases its writer slot; the last
//! slot closes the target. Dropping a queue marks its site done with the
//! snapshot in the host-wide [`SnapshottingSites`] counter.

use parking_lot::Mutex;
use shardsave_core::{TableId, TableInfo};
use shardsave_durability::{SnapshotTarget, TargetCloseInfo};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Host-wide count of sites that have not finished the current snapshot
///
/// Zero means idle. The leader sets it to the local site count before
/// releasing any site; each site's queue decrements it when finished.
#[derive(Debug, Default)]
pub struct SnapshottingSites {
    remaining: AtomicUsize,
}

impl SnapshottingSites {
    /// Idle counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `sites` sites as snapshotting
    ///
    /// Returns false, leaving the counter untouched, if a snapshot is
    /// already in flight.
    pub fn begin(&self, sites: usize) -> bool {
        self.remaining
            .compare_exchange(0, sites, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// One site finished; returns true if it was the last
    pub fn site_finished(&self) -> bool {
        match self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(previous) => previous == 1,
            Err(_) => {
                warn!(target: "shardsave::site", "Site finished while no snapshot was in flight");
                false
            }
        }
    }

    /// Sites still working on the current snapshot
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// True while a snapshot is in flight on this host
    pub fn is_active(&self) -> bool {
        self.remaining() > 0
    }
}

/// Shared ownership of one table's target across its writer sites
pub struct TargetHandle {
    table: TableInfo,
    target: Arc<dyn SnapshotTarget>,
    writers_left: AtomicUsize,
    closed: AtomicBool,
    // Shared with the on-close handler instead of the handle itself, so the
    // target does not keep its own handle alive.
    abandoned: Arc<Mutex<Option<String>>>,
}

impl TargetHandle {
    /// Wrap `target` and install `on_close` as its close handler
    ///
    /// If a writer abandoned its task, `on_close` sees the abandonment as the
    /// last error unless the target recorded a write error of its own.
    pub fn new<F>(table: TableInfo, target: Arc<dyn SnapshotTarget>, on_close: F) -> Arc<Self>
    where
        F: FnOnce(TargetCloseInfo) + Send + 'static,
    {
        let abandoned = Arc::new(Mutex::new(None::<String>));
        let note = Arc::clone(&abandoned);
        target.set_on_close_handler(Box::new(move |mut info: TargetCloseInfo| {
            if info.last_error.is_none() {
                info.last_error = note.lock().take();
            }
            on_close(info);
        }));
        Arc::new(TargetHandle {
            table,
            target,
            writers_left: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            abandoned,
        })
    }

    /// Table this target saves
    pub fn table(&self) -> &TableInfo {
        &self.table
    }

    /// Underlying target
    pub fn target(&self) -> &dyn SnapshotTarget {
        self.target.as_ref()
    }

    /// Writer slots not yet released
    pub fn writers_left(&self) -> usize {
        self.writers_left.load(Ordering::Acquire)
    }

    /// True once the target has been closed through this handle
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn assign_writers(&self, writers: usize) {
        self.writers_left.store(writers, Ordering::Release);
    }

    fn release_writer(&self) {
        let previous = self
            .writers_left
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.close();
        }
    }

    fn note_abandoned(&self, message: String) {
        let mut abandoned = self.abandoned.lock();
        if abandoned.is_none() {
            *abandoned = Some(message);
        }
    }

    /// Close the target now, regardless of outstanding writers
    ///
    /// Used when setup fails after targets were opened. Idempotent.
    pub fn abort(&self) {
        self.close();
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.target.close() {
            Ok(()) => debug!(
                target: "shardsave::site",
                table = %self.table.name,
                bytes = self.target.bytes_written(),
                "Closed snapshot target"
            ),
            Err(e) => warn!(
                target: "shardsave::site",
                table = %self.table.name,
                error = %e,
                "Error closing snapshot target"
            ),
        }
    }
}

/// One table's write work for one site
pub struct WriteTask {
    handle: Arc<TargetHandle>,
    completed: bool,
}

impl WriteTask {
    fn new(handle: Arc<TargetHandle>) -> Self {
        WriteTask {
            handle,
            completed: false,
        }
    }

    /// Table id in the catalog
    pub fn table_id(&self) -> TableId {
        self.handle.table.id
    }

    /// Table name
    pub fn table_name(&self) -> &str {
        &self.handle.table.name
    }

    /// True for a replicated table
    pub fn is_replicated(&self) -> bool {
        self.handle.table.is_replicated
    }

    /// Target to write into
    pub fn target(&self) -> &dyn SnapshotTarget {
        self.handle.target()
    }

    /// Shared handle, for inspection
    pub fn handle(&self) -> &Arc<TargetHandle> {
        &self.handle
    }

    /// Finish the task and release this site's writer slot
    pub fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for WriteTask {
    fn drop(&mut self) {
        if !self.completed {
            self.handle.note_abandoned(format!(
                "snapshot task for table {} was abandoned before completion",
                self.handle.table.name
            ));
        }
        self.handle.release_writer();
    }
}

/// Ordered write tasks handed to one site
#[derive(Default)]
pub struct TaskQueue {
    tasks: VecDeque<WriteTask>,
    sites: Option<Arc<SnapshottingSites>>,
}

impl TaskQueue {
    /// Empty queue that is not tracked by any in-flight counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Report this queue's site as finished to `sites` when the queue drops
    pub fn track_completion(&mut self, sites: Arc<SnapshottingSites>) {
        self.sites = Some(sites);
    }

    /// Append a task
    pub fn push(&mut self, task: WriteTask) {
        self.tasks.push_back(task);
    }

    /// Take the next task
    pub fn pop_front(&mut self) -> Option<WriteTask> {
        self.tasks.pop_front()
    }

    /// Number of tasks left
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when no task is left
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Iterate tasks in order
    pub fn iter(&self) -> impl Iterator<Item = &WriteTask> {
        self.tasks.iter()
    }

    /// Table names in task order
    pub fn table_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.table_name().to_string()).collect()
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("tasks", &self.table_names())
            .field("tracked", &self.sites.is_some())
            .finish()
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        // Tasks go first so their targets close before the site is counted
        // as done.
        self.tasks.clear();
        if let Some(sites) = self.sites.take() {
            if sites.site_finished() {
                debug!(target: "shardsave::site", "Last local site finished snapshot");
            }
        }
    }
}

/// Spread tasks for `targets` over `num_sites` queues
///
/// Partitioned tasks come first in every queue, in `targets` order, followed
/// by this queue's share of replicated tasks. Replicated tables are assigned
/// round-robin starting at queue 0, continuing across tables.
pub fn distribute_tasks(targets: &[Arc<TargetHandle>], num_sites: usize) -> Vec<TaskQueue> {
    let mut queues: Vec<TaskQueue> = (0..num_sites).map(|_| TaskQueue::new()).collect();
    if num_sites == 0 {
        for handle in targets {
            handle.abort();
        }
        return queues;
    }

    for handle in targets.iter().filter(|h| !h.table.is_replicated) {
        handle.assign_writers(num_sites);
        for queue in queues.iter_mut() {
            queue.push(WriteTask::new(Arc::clone(handle)));
        }
    }

    let mut next_site = 0;
    for handle in targets.iter().filter(|h| h.table.is_replicated) {
        handle.assign_writers(1);
        queues[next_site].push(WriteTask::new(Arc::clone(handle)));
        next_site = (next_site + 1) % num_sites;
    }

    queues
}
