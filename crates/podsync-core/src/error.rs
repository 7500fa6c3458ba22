//! Error types for Podsync core operations.
//!
//! Errors are grouped by domain. Every variant of the top-level [`Error`]
//! wraps one domain enum (or a std/serde error), so callers can match on the
//! area that failed and still get a readable message through `Display`.
//!
//! ```rust,ignore
//! use podsync_core::{Error, PlaylistError, Result};
//!
//! fn rename(session: &Session, id: u64) -> Result<()> {
//!     match session.rename_playlist(id, "   ") {
//!         Err(Error::Playlist(PlaylistError::EmptyName)) => Ok(()),
//!         other => other,
//!     }
//! }
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while decoding or encoding the iTunesDB image.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The image is structurally invalid.
    #[error("Corrupt iTunesDB image at offset {offset:#x}: {reason}")]
    CorruptImage {
        /// Byte offset where decoding stopped.
        offset: usize,
        /// What was wrong.
        reason: String,
    },

    /// The database header declares a version this codec does not handle.
    #[error("Unsupported iTunesDB version {version:#x}")]
    UnsupportedVersion {
        /// Version field from the database header.
        version: u32,
    },

    /// The mountpoint does not look like an iPod.
    #[error("No iPod_Control directory under {mountpoint}")]
    NotAnIpod {
        /// Mountpoint that was checked.
        mountpoint: PathBuf,
    },

    /// The mountpoint has no database file.
    #[error("No iTunesDB found at {path}")]
    Missing {
        /// Expected database path.
        path: PathBuf,
    },
}

/// File system errors.
#[derive(Debug, Error)]
pub enum FileSystemError {
    /// Path does not exist.
    #[error("Path not found: {path}")]
    NotFound {
        /// Missing path.
        path: PathBuf,
    },

    /// Reading failed.
    #[error("Failed to read {path}: {reason}")]
    ReadFailed {
        /// Path being read.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Writing failed.
    #[error("Failed to write {path}: {reason}")]
    WriteFailed {
        /// Path being written.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Directory creation failed.
    #[error("Failed to create directory {path}: {reason}")]
    CreateDirFailed {
        /// Directory path.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Deletion failed.
    #[error("Failed to delete {path}: {reason}")]
    DeleteFailed {
        /// Path being deleted.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Copying failed.
    #[error("Failed to copy {source_path} to {destination}: {reason}")]
    CopyFailed {
        /// Copy source.
        source_path: PathBuf,
        /// Copy destination.
        destination: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// The path cannot be used for this operation.
    #[error("Invalid path {path}: {reason}")]
    InvalidPath {
        /// Offending path.
        path: PathBuf,
        /// Why it is invalid.
        reason: String,
    },

    /// Out of space on the target volume.
    #[error("Disk full at {path}: {required_bytes} bytes required, {available_bytes} available")]
    DiskFull {
        /// Path being written.
        path: PathBuf,
        /// Bytes needed.
        required_bytes: u64,
        /// Bytes available (0 when unknown).
        available_bytes: u64,
    },

    /// Copied data did not match the source.
    #[error("Integrity check failed for {path}")]
    IntegrityCheckFailed {
        /// Destination file.
        path: PathBuf,
    },
}

/// Track-level errors from the mutation API.
#[derive(Debug, Error)]
pub enum TrackError {
    /// No live track with this ID.
    #[error("Track not found: {id}")]
    NotFound {
        /// Requested track ID.
        id: u32,
    },

    /// The on-device path is already used by a live track.
    #[error("On-device path {path} is already used by track {existing_id}")]
    DuplicatePath {
        /// Colliding on-device path.
        path: String,
        /// Track that owns the path.
        existing_id: u32,
    },

    /// The device cannot play this kind of media.
    #[error("{model} does not support video playback")]
    UnsupportedMedia {
        /// Device model name.
        model: String,
    },
}

/// Playlist-level errors from the mutation API.
#[derive(Debug, Error)]
pub enum PlaylistError {
    /// No playlist with this ID.
    #[error("Playlist not found: {id}")]
    NotFound {
        /// Requested playlist ID.
        id: u64,
    },

    /// Name is empty after trimming.
    #[error("Playlist name cannot be empty")]
    EmptyName,

    /// The master playlist cannot be deleted.
    #[error("Cannot delete the master playlist")]
    CannotDeleteMaster,

    /// The master playlist cannot be renamed or edited directly.
    #[error("Cannot modify the master playlist")]
    CannotModifyMaster,

    /// The podcast playlist cannot be deleted.
    #[error("Cannot delete the podcast playlist")]
    CannotDeletePodcastList,
}

/// Metadata extraction errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The source file's metadata could not be read.
    #[error("Unreadable source file {path}: {reason}")]
    Unreadable {
        /// Source file.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },
}

/// Sync engine errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Writing the database at the end of a sync failed.
    #[error("Commit failed: {reason}")]
    CommitFailed {
        /// Underlying reason.
        reason: String,
    },

    /// The background worker stopped without reporting a result.
    #[error("Sync worker stopped unexpectedly: {reason}")]
    WorkerFailed {
        /// Underlying reason.
        reason: String,
    },
}

/// Errors that can occur in Podsync core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// iTunesDB codec error.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// File system error.
    #[error(transparent)]
    FileSystem(#[from] FileSystemError),

    /// Track error.
    #[error(transparent)]
    Track(#[from] TrackError),

    /// Playlist error.
    #[error(transparent)]
    Playlist(#[from] PlaylistError),

    /// Metadata error.
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// Sync error.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error category for programmatic handling by the control layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Image could not be decoded.
    CorruptImage,
    /// Image version not handled.
    UnsupportedVersion,
    /// Device or database missing.
    DeviceMissing,
    /// Read/write/copy failure.
    Io,
    /// Out of space.
    DiskFull,
    /// Track or playlist does not exist.
    NotFound,
    /// On-device path already in use.
    DuplicatePath,
    /// Empty playlist name.
    EmptyName,
    /// Operation rejected on the master playlist.
    CannotDeleteMaster,
    /// Operation rejected on the podcast playlist.
    CannotDeletePodcastList,
    /// Media type unsupported by the device.
    UnsupportedMedia,
    /// Source file metadata unreadable.
    Unreadable,
    /// Sync commit failure.
    CommitFailed,
    /// Operation cancelled.
    Cancelled,
    /// Bad configuration.
    Configuration,
    /// Anything else.
    Internal,
}

impl Error {
    /// Category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Database(DatabaseError::CorruptImage { .. }) => ErrorKind::CorruptImage,
            Self::Database(DatabaseError::UnsupportedVersion { .. }) => {
                ErrorKind::UnsupportedVersion
            }
            Self::Database(DatabaseError::NotAnIpod { .. } | DatabaseError::Missing { .. }) => {
                ErrorKind::DeviceMissing
            }
            Self::FileSystem(FileSystemError::DiskFull { .. }) => ErrorKind::DiskFull,
            Self::FileSystem(_) | Self::Io(_) => ErrorKind::Io,
            Self::Track(TrackError::NotFound { .. })
            | Self::Playlist(PlaylistError::NotFound { .. }) => ErrorKind::NotFound,
            Self::Track(TrackError::DuplicatePath { .. }) => ErrorKind::DuplicatePath,
            Self::Track(TrackError::UnsupportedMedia { .. }) => ErrorKind::UnsupportedMedia,
            Self::Playlist(PlaylistError::EmptyName) => ErrorKind::EmptyName,
            Self::Playlist(
                PlaylistError::CannotDeleteMaster | PlaylistError::CannotModifyMaster,
            ) => ErrorKind::CannotDeleteMaster,
            Self::Playlist(PlaylistError::CannotDeletePodcastList) => {
                ErrorKind::CannotDeletePodcastList
            }
            Self::Metadata(_) => ErrorKind::Unreadable,
            Self::Sync(SyncError::CommitFailed { .. }) => ErrorKind::CommitFailed,
            Self::Sync(SyncError::WorkerFailed { .. }) => ErrorKind::Internal,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Only transient I/O failures qualify; invariant violations and decode
    /// failures never will.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::FileSystem(
                FileSystemError::ReadFailed { .. }
                    | FileSystemError::WriteFailed { .. }
                    | FileSystemError::CopyFailed { .. }
                    | FileSystemError::IntegrityCheckFailed { .. }
            ) | Self::Io(_)
        )
    }

    /// Build a corrupt-image error.
    pub fn corrupt(offset: usize, reason: impl Into<String>) -> Self {
        Self::Database(DatabaseError::CorruptImage {
            offset,
            reason: reason.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Track(TrackError::NotFound { id: 42 });
        assert_eq!(err.to_string(), "Track not found: 42");
    }

    #[test]
    fn test_playlist_error_display() {
        let err = Error::Playlist(PlaylistError::CannotDeleteMaster);
        assert_eq!(err.to_string(), "Cannot delete the master playlist");
    }

    #[test]
    fn test_corrupt_image_display() {
        let err = Error::corrupt(0x20, "bad tag");
        assert!(err.to_string().contains("0x20"));
        assert!(err.to_string().contains("bad tag"));
        assert_eq!(err.kind(), ErrorKind::CorruptImage);
    }

    #[test]
    fn test_file_system_error_display() {
        let err = Error::FileSystem(FileSystemError::ReadFailed {
            path: PathBuf::from("/test/path"),
            reason: "permission denied".to_string(),
        });
        assert!(err.to_string().contains("/test/path"));
        assert!(err.to_string().contains("permission denied"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_invariant_errors_not_retryable() {
        assert!(!Error::Playlist(PlaylistError::EmptyName).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::corrupt(0, "x").is_retryable());
    }

    #[test]
    fn test_disk_full_kind() {
        let err = Error::FileSystem(FileSystemError::DiskFull {
            path: PathBuf::from("/Volumes/IPOD"),
            required_bytes: 10,
            available_bytes: 1,
        });
        assert_eq!(err.kind(), ErrorKind::DiskFull);
    }
}
