use crate::file_target::RowBlock;
use crate::target::{OnCloseHandler, SnapshotTarget, TargetCloseInfo, TargetFactory, TargetSpec};
use parking_lot::Mutex;
use shardsave_core::{Error, PartitionId, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Target that keeps written blocks in memory
pub struct MemoryTarget {
    path: PathBuf,
    blocks: Mutex<Vec<RowBlock>>,
    bytes_written: AtomicU64,
    last_error: Mutex<Option<String>>,
    on_close: Mutex<Option<OnCloseHandler>>,
    close_calls: AtomicUsize,
    closed: Mutex<bool>,
    fault: WriteFault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteFault {
    None,
    Fail,
    Panic,
}

impl MemoryTarget {
    /// Target accepting every write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::build(path.into(), WriteFault::None)
    }

    /// Target rejecting every write with an I/O error
    pub fn failing(path: impl Into<PathBuf>) -> Self {
        Self::build(path.into(), WriteFault::Fail)
    }

    /// Target that panics on the first write
    pub fn panicking(path: impl Into<PathBuf>) -> Self {
        Self::build(path.into(), WriteFault::Panic)
    }

    fn build(path: PathBuf, fault: WriteFault) -> Self {
        MemoryTarget {
            path,
            blocks: Mutex::new(Vec::new()),
            bytes_written: AtomicU64::new(0),
            last_error: Mutex::new(None),
            on_close: Mutex::new(None),
            close_calls: AtomicUsize::new(0),
            closed: Mutex::new(false),
            fault,
        }
    }

    /// Blocks written so far
    pub fn blocks(&self) -> Vec<RowBlock> {
        self.blocks.lock().clone()
    }

    /// Rows written by one partition
    pub fn rows_for(&self, partition_id: PartitionId) -> usize {
        self.blocks
            .lock()
            .iter()
            .filter(|b| b.partition_id == partition_id)
            .map(|b| b.rows.len())
            .sum()
    }

    /// Distinct partitions that wrote at least one block
    pub fn writer_partitions(&self) -> HashSet<PartitionId> {
        self.blocks.lock().iter().map(|b| b.partition_id).collect()
    }

    /// True once `close` has run
    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    /// Number of `close` calls, including no-op repeats
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl SnapshotTarget for MemoryTarget {
    fn write_rows(&self, partition_id: PartitionId, rows: &[Vec<u8>]) -> Result<u64> {
        if *self.closed.lock() {
            return Err(Error::TargetError(format!(
                "write to closed target {}",
                self.path.display()
            )));
        }
        if self.fault == WriteFault::Panic {
            panic!("injected panic writing to {}", self.path.display());
        }
        if self.fault == WriteFault::Fail {
            let message = format!("injected write failure on {}", self.path.display());
            *self.last_error.lock() = Some(message.clone());
            return Err(Error::TargetError(message));
        }
        let size: u64 = rows.iter().map(|r| r.len() as u64).sum();
        self.blocks.lock().push(RowBlock {
            partition_id,
            rows: rows.to_vec(),
        });
        self.bytes_written.fetch_add(size, Ordering::SeqCst);
        Ok(size)
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::SeqCst)
    }

    fn last_write_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn set_on_close_handler(&self, handler: OnCloseHandler) {
        *self.on_close.lock() = Some(handler);
    }

    fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut closed = self.closed.lock();
            if *closed {
                return Ok(());
            }
            *closed = true;
        }
        let handler = self.on_close.lock().take();
        if let Some(handler) = handler {
            handler(TargetCloseInfo {
                bytes_written: self.bytes_written(),
                last_error: self.last_write_error(),
            });
        }
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Factory producing [`MemoryTarget`]s with per-table fault injection
#[derive(Default)]
pub struct MemoryTargetFactory {
    created: Mutex<Vec<(String, Arc<MemoryTarget>)>>,
    fail_create: HashSet<String>,
    fail_writes: HashSet<String>,
    panic_on: HashSet<String>,
    panic_writes: HashSet<String>,
}

impl MemoryTargetFactory {
    /// Factory where every table succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Make target creation fail for `table`
    pub fn fail_create_for(mut self, table: impl Into<String>) -> Self {
        self.fail_create.insert(table.into());
        self
    }

    /// Make every write to `table`'s target fail
    pub fn fail_writes_for(mut self, table: impl Into<String>) -> Self {
        self.fail_writes.insert(table.into());
        self
    }

    /// Panic while creating `table`'s target
    pub fn panic_for(mut self, table: impl Into<String>) -> Self {
        self.panic_on.insert(table.into());
        self
    }

    /// Panic on the first write to `table`'s target
    pub fn panic_writes_for(mut self, table: impl Into<String>) -> Self {
        self.panic_writes.insert(table.into());
        self
    }

    /// Latest target created for `table`
    pub fn target(&self, table: &str) -> Option<Arc<MemoryTarget>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|(name, _)| name == table)
            .map(|(_, target)| Arc::clone(target))
    }

    /// Table names in creation order, across every snapshot
    pub fn created_tables(&self) -> Vec<String> {
        self.created.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Every target created, in creation order
    pub fn targets(&self) -> Vec<Arc<MemoryTarget>> {
        self.created
            .lock()
            .iter()
            .map(|(_, target)| Arc::clone(target))
            .collect()
    }
}

impl TargetFactory for MemoryTargetFactory {
    fn create_target(&self, spec: &TargetSpec<'_>) -> Result<Arc<dyn SnapshotTarget>> {
        let name = &spec.table.name;
        if self.panic_on.contains(name) {
            panic!("injected panic creating target for {}", name);
        }
        if self.fail_create.contains(name) {
            return Err(Error::TargetError(format!(
                "injected creation failure for {}",
                spec.path.display()
            )));
        }
        let target = if self.fail_writes.contains(name) {
            Arc::new(MemoryTarget::failing(spec.path))
        } else if self.panic_writes.contains(name) {
            Arc::new(MemoryTarget::panicking(spec.path))
        } else {
            Arc::new(MemoryTarget::new(spec.path))
        };
        self.created
            .lock()
            .push((name.clone(), Arc::clone(&target)));
        Ok(target)
    }
}
