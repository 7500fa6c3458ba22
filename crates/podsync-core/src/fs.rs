//! File system helpers shared by the codec and the sync engine.
//!
//! Every helper maps `std::io::Error` into the crate's typed
//! [`FileSystemError`] so the caller always learns which path failed.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, FileSystemError, Result};

/// Converts an I/O error for read operations.
pub(crate) fn read_error(path: &Path, e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::NotFound {
        return Error::FileSystem(FileSystemError::NotFound {
            path: path.to_path_buf(),
        });
    }
    Error::FileSystem(FileSystemError::ReadFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Converts an I/O error for write operations, recognising a full volume.
pub(crate) fn write_error(path: &Path, e: io::Error) -> Error {
    if is_disk_full(&e) {
        return Error::FileSystem(FileSystemError::DiskFull {
            path: path.to_path_buf(),
            required_bytes: 0,
            available_bytes: 0,
        });
    }
    Error::FileSystem(FileSystemError::WriteFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Converts an I/O error for directory creation.
pub(crate) fn create_dir_error(path: &Path, e: io::Error) -> Error {
    Error::FileSystem(FileSystemError::CreateDirFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Converts an I/O error for delete operations.
pub(crate) fn delete_error(path: &Path, e: io::Error) -> Error {
    Error::FileSystem(FileSystemError::DeleteFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Converts an I/O error for copy operations.
pub(crate) fn copy_error(src: &Path, dst: &Path, e: io::Error) -> Error {
    if is_disk_full(&e) {
        return Error::FileSystem(FileSystemError::DiskFull {
            path: dst.to_path_buf(),
            required_bytes: 0,
            available_bytes: 0,
        });
    }
    Error::FileSystem(FileSystemError::CopyFailed {
        source_path: src.to_path_buf(),
        destination: dst.to_path_buf(),
        reason: e.to_string(),
    })
}

/// ENOSPC on unix, ERROR_DISK_FULL on windows.
fn is_disk_full(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::StorageFull || matches!(e.raw_os_error(), Some(28 | 112))
}

/// Create a directory and its parents if missing.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|e| create_dir_error(path, e))
}

/// Write `contents` to `path` atomically.
///
/// The bytes go to a temporary file in the same directory which is flushed
/// to disk and then renamed over `path`. On any failure the temporary file
/// is removed and `path` is left exactly as it was.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        Error::FileSystem(FileSystemError::InvalidPath {
            path: path.to_path_buf(),
            reason: "path has no parent directory".to_string(),
        })
    })?;
    ensure_dir(dir)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| write_error(dir, e))?;
    tmp.write_all(contents).map_err(|e| write_error(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| write_error(path, e))?;
    tmp.persist(path).map_err(|e| write_error(path, e.error))?;

    debug!("Atomically wrote {} bytes to {}", contents.len(), path.display());
    Ok(())
}

/// Remove a file, treating "already gone" as success.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(delete_error(path, e)),
    }
}
