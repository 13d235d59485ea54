//! Save feasibility probe
//!
//! Checks, per table file, that a snapshot could be written: the file must
//! not exist and its directory must be writable. A passing check creates
//! the empty file, reserving the name for the creation phase.

use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

/// Outcome of probing one table file
#[derive(Debug)]
pub enum Feasibility {
    /// File reserved; the save can proceed
    Ready(PathBuf),
    /// A file already exists at the path
    AlreadyExists(PathBuf),
    /// The parent directory is missing or read-only
    Unwritable(PathBuf),
    /// Reserving the file failed
    CreateFailed {
        /// File that could not be created
        path: PathBuf,
        /// Underlying error
        error: io::Error,
    },
}

impl Feasibility {
    /// True if the save can proceed
    pub fn is_ready(&self) -> bool {
        matches!(self, Feasibility::Ready(_))
    }

    /// Failure message for result rows, `None` when ready
    pub fn error_message(&self) -> Option<String> {
        match self {
            Feasibility::Ready(_) => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Feasibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feasibility::Ready(path) => write!(f, "READY: {}", path.display()),
            Feasibility::AlreadyExists(path) => {
                write!(f, "SAVE FILE ALREADY EXISTS: {}", path.display())
            }
            Feasibility::Unwritable(path) => {
                write!(f, "FILE LOCATION UNWRITABLE: {}", path.display())
            }
            Feasibility::CreateFailed { path, error } => write!(
                f,
                "FILE CREATION OF {} RESULTED IN I/O ERROR: {}",
                path.display(),
                error
            ),
        }
    }
}

/// Probe one table file path
pub fn check_table_file(path: &Path) -> Feasibility {
    if path.exists() {
        return Feasibility::AlreadyExists(path.to_path_buf());
    }
    if !parent_is_writable(path) {
        return Feasibility::Unwritable(path.to_path_buf());
    }
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Feasibility::Ready(path.to_path_buf()),
        Err(error) => Feasibility::CreateFailed {
            path: path.to_path_buf(),
            error,
        },
    }
}

fn parent_is_writable(path: &Path) -> bool {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::metadata(parent)
        .map(|m| m.is_dir() && !m.permissions().readonly())
        .unwrap_or(false)
}
