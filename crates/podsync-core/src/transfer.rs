//! Single-file copy onto the device.
//!
//! Files are copied in chunks through buffered handles, optionally hashed on
//! the way and re-read for verification, and stamped with the source
//! modification time. A destination that was not completely written is
//! removed before the error is returned.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Error, FileSystemError, Result};
use crate::fs::{copy_error, ensure_dir, read_error, remove_file_if_exists, write_error};

/// Default chunk size for file copies (64 KB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Minimum chunk size allowed (4 KB).
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;

/// Maximum chunk size allowed (1 MB).
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// How a single file is copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyOptions {
    /// Size of chunks for reading/writing files (in bytes).
    pub chunk_size: usize,
    /// Re-read the destination and compare its SHA-256 with the source.
    pub verify: bool,
    /// Copy the source modification time onto the destination.
    pub preserve_timestamps: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            verify: true,
            preserve_timestamps: true,
        }
    }
}

impl CopyOptions {
    /// Validate options and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < MIN_CHUNK_SIZE {
            return Err(Error::Configuration(format!(
                "chunk_size must be at least {MIN_CHUNK_SIZE} bytes"
            )));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Configuration(format!(
                "chunk_size must be at most {MAX_CHUNK_SIZE} bytes"
            )));
        }
        Ok(())
    }
}

/// A finished copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopiedFile {
    /// Bytes written.
    pub bytes: u64,
    /// Hex SHA-256 of the content, when verification ran.
    pub checksum: Option<String>,
}

/// Copy `source` to `destination`, creating parent directories.
///
/// Both handles are closed on every exit path. On failure the partial
/// destination is removed.
pub fn copy_file(source: &Path, destination: &Path, options: &CopyOptions) -> Result<CopiedFile> {
    if let Some(parent) = destination.parent() {
        ensure_dir(parent)?;
    }

    let result = copy_chunks(source, destination, options);
    if result.is_err()
        && let Err(e) = remove_file_if_exists(destination)
    {
        warn!("Could not remove partial copy {}: {}", destination.display(), e);
    }
    let copied = result?;

    if options.preserve_timestamps
        && let Ok(modified) = fs::metadata(source).and_then(|m| m.modified())
        && let Err(e) =
            filetime::set_file_mtime(destination, filetime::FileTime::from_system_time(modified))
    {
        debug!("Could not set mtime on {}: {}", destination.display(), e);
    }

    Ok(copied)
}

fn copy_chunks(source: &Path, destination: &Path, options: &CopyOptions) -> Result<CopiedFile> {
    debug!("Copying: {} -> {}", source.display(), destination.display());

    let source_file = File::open(source).map_err(|e| read_error(source, e))?;
    let mut reader = BufReader::with_capacity(options.chunk_size, source_file);
    let dest_file = File::create(destination).map_err(|e| write_error(destination, e))?;
    let mut writer = BufWriter::with_capacity(options.chunk_size, dest_file);

    let mut hasher = options.verify.then(Sha256::new);
    let mut buffer = vec![0u8; options.chunk_size];
    let mut bytes: u64 = 0;

    loop {
        let read = reader.read(&mut buffer).map_err(|e| read_error(source, e))?;
        if read == 0 {
            break;
        }
        writer
            .write_all(&buffer[..read])
            .map_err(|e| copy_error(source, destination, e))?;
        if let Some(h) = hasher.as_mut() {
            h.update(&buffer[..read]);
        }
        bytes += read as u64;
    }

    let file = writer
        .into_inner()
        .map_err(|e| copy_error(source, destination, e.into_error()))?;
    file.sync_all()
        .map_err(|e| copy_error(source, destination, e))?;
    drop(file);

    let checksum = hasher.map(|h| format!("{:x}", h.finalize()));
    if let Some(expected) = &checksum {
        let actual = file_checksum(destination)?;
        if &actual != expected {
            return Err(Error::FileSystem(FileSystemError::IntegrityCheckFailed {
                path: destination.to_path_buf(),
            }));
        }
    }

    Ok(CopiedFile { bytes, checksum })
}

/// SHA-256 of a whole file, hex encoded.
pub fn file_checksum(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| read_error(path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; DEFAULT_CHUNK_SIZE];

    loop {
        let read = reader.read(&mut buffer).map_err(|e| read_error(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    #[test]
    fn test_copy_options_validate() {
        assert!(CopyOptions::default().validate().is_ok());
        let small = CopyOptions {
            chunk_size: 16,
            ..CopyOptions::default()
        };
        assert!(small.validate().is_err());
        let large = CopyOptions {
            chunk_size: MAX_CHUNK_SIZE + 1,
            ..CopyOptions::default()
        };
        assert!(large.validate().is_err());
    }

    #[test]
    fn test_copy_creates_parents_and_verifies() {
        let dir = TempDir::new().expect("temp dir");
        let source = dir.path().join("song.mp3");
        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&source, &content).unwrap();
        let destination = dir.path().join("Music").join("F03").join("PD000003.mp3");

        let copied = copy_file(&source, &destination, &CopyOptions::default()).unwrap();

        assert_eq!(copied.bytes, content.len() as u64);
        assert_eq!(fs::read(&destination).unwrap(), content);
        assert_eq!(copied.checksum, Some(file_checksum(&source).unwrap()));
    }

    #[test]
    fn test_copy_without_verification() {
        let dir = TempDir::new().expect("temp dir");
        let source = dir.path().join("a.mp3");
        fs::write(&source, b"abc").unwrap();
        let options = CopyOptions {
            verify: false,
            ..CopyOptions::default()
        };

        let copied = copy_file(&source, &dir.path().join("b.mp3"), &options).unwrap();

        assert_eq!(copied.bytes, 3);
        assert!(copied.checksum.is_none());
    }

    #[test]
    fn test_copy_preserves_mtime() {
        let dir = TempDir::new().expect("temp dir");
        let source = dir.path().join("a.mp3");
        fs::write(&source, b"abc").unwrap();
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000);
        filetime::set_file_mtime(&source, filetime::FileTime::from_system_time(stamp)).unwrap();
        let destination = dir.path().join("b.mp3");

        copy_file(&source, &destination, &CopyOptions::default()).unwrap();

        let modified = fs::metadata(&destination).unwrap().modified().unwrap();
        assert_eq!(modified, stamp);
    }

    #[test]
    fn test_missing_source_leaves_no_destination() {
        let dir = TempDir::new().expect("temp dir");
        let destination = dir.path().join("out.mp3");

        let err = copy_file(
            &dir.path().join("missing.mp3"),
            &destination,
            &CopyOptions::default(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            Error::FileSystem(FileSystemError::NotFound { .. })
        ));
        assert!(!destination.exists());
    }

    #[test]
    fn test_checksum_consistent() {
        let dir = TempDir::new().expect("temp dir");
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"same").unwrap();
        fs::write(&b, b"same").unwrap();
        assert_eq!(file_checksum(&a).unwrap(), file_checksum(&b).unwrap());
        assert!(file_checksum(&dir.path().join("c")).is_err());
    }
}
