//! File-backed snapshot target
//!
//! # File Format
//!
//! ```text
//! magic "SSVT" | version u16 | header_len u32 | header (JSON) | header_crc u32
//! block*:  0x01 | partition u32 | row_count u32 | payload_len u32 | payload | crc u32
//! footer:  0xFF | block_count u32 | row_count u64
//! ```
//!
//! All integers are little-endian. Each payload is a sequence of
//! `row_len u32 | row bytes`. The block CRC covers partition, row count,
//! payload length and payload. A file without a footer was never closed.
//!
//! Partitioned tables are written by every local site into one shared file,
//! so blocks from different partitions interleave. Writes are serialized by
//! the target's internal lock.

use crate::target::{OnCloseHandler, SnapshotTarget, TargetCloseInfo, TargetFactory, TargetSpec};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shardsave_core::{Error, PartitionId, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Magic bytes at the start of every table file
pub const TABLE_FILE_MAGIC: [u8; 4] = *b"SSVT";
/// Current table file format version
pub const TABLE_FILE_VERSION: u16 = 1;

const BLOCK_TAG: u8 = 0x01;
const FOOTER_TAG: u8 = 0xFF;

/// Header recorded at the start of every table file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFileHeader {
    /// Host that wrote the file
    pub host_id: u32,
    /// Cluster name
    pub cluster_name: String,
    /// Database name
    pub database_name: String,
    /// Table name
    pub table_name: String,
    /// Partition count of the whole cluster
    pub num_partitions: u32,
    /// Whether the table is replicated
    pub is_replicated: bool,
    /// Partitions hosted by the writing host
    pub partition_ids: Vec<u32>,
    /// Snapshot start time (ms since epoch)
    pub created_at: u64,
}

impl TableFileHeader {
    fn from_spec(spec: &TargetSpec<'_>) -> Self {
        TableFileHeader {
            host_id: spec.host_id.0,
            cluster_name: spec.cluster_name.to_string(),
            database_name: spec.database_name.to_string(),
            table_name: spec.table.name.clone(),
            num_partitions: spec.num_partitions,
            is_replicated: spec.table.is_replicated,
            partition_ids: spec.partition_ids.iter().map(|p| p.0).collect(),
            created_at: spec.created_at,
        }
    }
}

struct WriterState {
    file: Option<BufWriter<File>>,
    block_count: u32,
    row_count: u64,
}

/// Snapshot target writing one table to one file
pub struct FileSnapshotTarget {
    path: PathBuf,
    state: Mutex<WriterState>,
    bytes_written: AtomicU64,
    last_error: Mutex<Option<String>>,
    on_close: Mutex<Option<OnCloseHandler>>,
}

impl FileSnapshotTarget {
    /// Open the target file and write its header
    ///
    /// The file may already exist empty (reserved by the feasibility check);
    /// it is truncated.
    pub fn open(spec: &TargetSpec<'_>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(spec.path)?;
        let mut file = BufWriter::new(file);

        let header = serde_json::to_vec(&TableFileHeader::from_spec(spec))?;
        let mut prefix = Vec::with_capacity(header.len() + 14);
        prefix.extend_from_slice(&TABLE_FILE_MAGIC);
        prefix.write_u16::<LittleEndian>(TABLE_FILE_VERSION)?;
        prefix.write_u32::<LittleEndian>(header.len() as u32)?;
        prefix.extend_from_slice(&header);
        prefix.write_u32::<LittleEndian>(crc32fast::hash(&header))?;
        file.write_all(&prefix)?;

        debug!(target: "shardsave::target", path = %spec.path.display(), table = %spec.table.name, "Opened table file");

        Ok(FileSnapshotTarget {
            path: spec.path.to_path_buf(),
            state: Mutex::new(WriterState {
                file: Some(file),
                block_count: 0,
                row_count: 0,
            }),
            bytes_written: AtomicU64::new(prefix.len() as u64),
            last_error: Mutex::new(None),
            on_close: Mutex::new(None),
        })
    }

    fn record_error(&self, error: &io::Error) {
        warn!(target: "shardsave::target", path = %self.path.display(), error = %error, "Table file write failed");
        *self.last_error.lock() = Some(error.to_string());
    }

    fn encode_block(partition_id: PartitionId, rows: &[Vec<u8>]) -> io::Result<Vec<u8>> {
        let mut payload = Vec::new();
        for row in rows {
            payload.write_u32::<LittleEndian>(row.len() as u32)?;
            payload.extend_from_slice(row);
        }

        let mut covered = Vec::with_capacity(payload.len() + 12);
        covered.write_u32::<LittleEndian>(partition_id.0)?;
        covered.write_u32::<LittleEndian>(rows.len() as u32)?;
        covered.write_u32::<LittleEndian>(payload.len() as u32)?;
        covered.extend_from_slice(&payload);

        let mut block = Vec::with_capacity(covered.len() + 5);
        block.push(BLOCK_TAG);
        block.extend_from_slice(&covered);
        block.write_u32::<LittleEndian>(crc32fast::hash(&covered))?;
        Ok(block)
    }

    fn finish(state: &mut WriterState) -> io::Result<u64> {
        let Some(mut file) = state.file.take() else {
            return Ok(0);
        };
        let mut footer = vec![FOOTER_TAG];
        footer.write_u32::<LittleEndian>(state.block_count)?;
        footer.write_u64::<LittleEndian>(state.row_count)?;
        file.write_all(&footer)?;
        let file = file.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(footer.len() as u64)
    }
}

impl SnapshotTarget for FileSnapshotTarget {
    fn write_rows(&self, partition_id: PartitionId, rows: &[Vec<u8>]) -> Result<u64> {
        let block = Self::encode_block(partition_id, rows)?;
        let mut state = self.state.lock();
        let Some(file) = state.file.as_mut() else {
            return Err(Error::TargetError(format!(
                "write to closed target {}",
                self.path.display()
            )));
        };
        if let Err(e) = file.write_all(&block) {
            self.record_error(&e);
            return Err(e.into());
        }
        state.block_count += 1;
        state.row_count += rows.len() as u64;
        self.bytes_written
            .fetch_add(block.len() as u64, Ordering::Relaxed);
        Ok(block.len() as u64)
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    fn last_write_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn set_on_close_handler(&self, handler: OnCloseHandler) {
        *self.on_close.lock() = Some(handler);
    }

    fn close(&self) -> Result<()> {
        let outcome = {
            let mut state = self.state.lock();
            if state.file.is_none() {
                return Ok(());
            }
            Self::finish(&mut state)
        };

        match &outcome {
            Ok(footer_len) => {
                self.bytes_written.fetch_add(*footer_len, Ordering::Relaxed);
            }
            Err(e) => self.record_error(e),
        }

        // Handler runs without any target lock held.
        let handler = self.on_close.lock().take();
        if let Some(handler) = handler {
            handler(TargetCloseInfo {
                bytes_written: self.bytes_written(),
                last_error: self.last_write_error(),
            });
        }

        outcome.map(|_| ()).map_err(Error::from)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Factory producing [`FileSnapshotTarget`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTargetFactory;

impl TargetFactory for FileTargetFactory {
    fn create_target(&self, spec: &TargetSpec<'_>) -> Result<Arc<dyn SnapshotTarget>> {
        Ok(Arc::new(FileSnapshotTarget::open(spec)?))
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Table file read errors
#[derive(Debug, thiserror::Error)]
pub enum TableFileError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// File does not start with the table file magic
    #[error("Bad magic in {0}")]
    BadMagic(PathBuf),

    /// Format version not understood
    #[error("Unsupported table file version {0}")]
    UnsupportedVersion(u16),

    /// Header or block checksum mismatch
    #[error("Checksum mismatch in {section}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Which part of the file failed
        section: String,
        /// Stored checksum
        expected: u32,
        /// Computed checksum
        actual: u32,
    },

    /// Header JSON could not be parsed
    #[error("Invalid header: {0}")]
    InvalidHeader(#[from] serde_json::Error),

    /// Unknown record tag
    #[error("Unexpected record tag {0:#04x}")]
    UnexpectedTag(u8),
}

/// One block of rows written by one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowBlock {
    /// Partition that wrote the block
    pub partition_id: PartitionId,
    /// Rows in write order
    pub rows: Vec<Vec<u8>>,
}

/// Verified contents of a table file
#[derive(Debug, Clone)]
pub struct TableFile {
    /// File header
    pub header: TableFileHeader,
    /// Row blocks in file order
    pub blocks: Vec<RowBlock>,
    /// True if the footer was present (target closed cleanly)
    pub complete: bool,
}

impl TableFile {
    /// Total rows across blocks
    pub fn row_count(&self) -> usize {
        self.blocks.iter().map(|b| b.rows.len()).sum()
    }

    /// Rows written by one partition
    pub fn rows_for(&self, partition_id: PartitionId) -> Vec<&[u8]> {
        self.blocks
            .iter()
            .filter(|b| b.partition_id == partition_id)
            .flat_map(|b| b.rows.iter().map(Vec::as_slice))
            .collect()
    }
}

/// Reader for table files
pub struct TableFileReader;

impl TableFileReader {
    /// Read and verify a table file
    pub fn read(path: &Path) -> std::result::Result<TableFile, TableFileError> {
        let mut reader = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != TABLE_FILE_MAGIC {
            return Err(TableFileError::BadMagic(path.to_path_buf()));
        }
        let version = reader.read_u16::<LittleEndian>()?;
        if version != TABLE_FILE_VERSION {
            return Err(TableFileError::UnsupportedVersion(version));
        }

        let header_len = reader.read_u32::<LittleEndian>()? as usize;
        let mut header_bytes = vec![0u8; header_len];
        reader.read_exact(&mut header_bytes)?;
        let stored = reader.read_u32::<LittleEndian>()?;
        verify_crc("header", stored, &header_bytes)?;
        let header: TableFileHeader = serde_json::from_slice(&header_bytes)?;

        let mut blocks = Vec::new();
        let mut complete = false;
        loop {
            let tag = match reader.read_u8() {
                Ok(tag) => tag,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };
            match tag {
                BLOCK_TAG => blocks.push(read_block(&mut reader, blocks.len())?),
                FOOTER_TAG => {
                    let _block_count = reader.read_u32::<LittleEndian>()?;
                    let _row_count = reader.read_u64::<LittleEndian>()?;
                    complete = true;
                    break;
                }
                other => return Err(TableFileError::UnexpectedTag(other)),
            }
        }

        Ok(TableFile {
            header,
            blocks,
            complete,
        })
    }
}

fn read_block(
    reader: &mut impl Read,
    index: usize,
) -> std::result::Result<RowBlock, TableFileError> {
    let partition = reader.read_u32::<LittleEndian>()?;
    let row_count = reader.read_u32::<LittleEndian>()?;
    let payload_len = reader.read_u32::<LittleEndian>()?;
    let mut payload = vec![0u8; payload_len as usize];
    reader.read_exact(&mut payload)?;
    let stored = reader.read_u32::<LittleEndian>()?;

    let mut covered = Vec::with_capacity(payload.len() + 12);
    covered.write_u32::<LittleEndian>(partition)?;
    covered.write_u32::<LittleEndian>(row_count)?;
    covered.write_u32::<LittleEndian>(payload_len)?;
    covered.extend_from_slice(&payload);
    verify_crc(&format!("block {}", index), stored, &covered)?;

    let mut cursor = payload.as_slice();
    let mut rows = Vec::with_capacity(row_count as usize);
    for _ in 0..row_count {
        let len = cursor.read_u32::<LittleEndian>()? as usize;
        let mut row = vec![0u8; len];
        cursor.read_exact(&mut row)?;
        rows.push(row);
    }

    Ok(RowBlock {
        partition_id: PartitionId(partition),
        rows,
    })
}

fn verify_crc(section: &str, expected: u32, data: &[u8]) -> std::result::Result<(), TableFileError> {
    let actual = crc32fast::hash(data);
    if actual != expected {
        return Err(TableFileError::ChecksumMismatch {
            section: section.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}
