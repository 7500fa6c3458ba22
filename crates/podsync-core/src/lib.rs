//! `Podsync` Core Library
//!
//! This crate reads and writes the iPod `iTunesDB` and syncs local audio
//! files onto the device:
//! - Lossless binary codec for the database image
//! - Session API for adding, removing and editing tracks and playlists
//! - Content-based duplicate detection
//! - Sync planner and executor with progress, cancellation and atomic commit
//! - Device model and storage information
//! - Library browsing, export back to a folder tree and consistency checks
//!
//! # Error Handling
//!
//! Every fallible call returns [`Result`], carrying a typed [`Error`] per
//! domain. See the [`error`] module for details.
//!
//! ```rust,ignore
//! use podsync_core::{Result, Session, SyncEngine, SyncOptions};
//!
//! fn add_and_sync(mountpoint: &Path, song: &Path) -> Result<()> {
//!     let session = Session::open(mountpoint)?;
//!     session.add_track_from_file(song, &Id3Extractor::new())?;
//!     SyncEngine::new().run(&session, &SyncOptions::default(), |_| {})?;
//!     Ok(())
//! }
//! ```

pub mod browse;
pub mod config;
pub mod device;
pub mod error;
pub mod export;
pub mod fs;
pub mod identity;
pub mod integrity;
pub mod itunesdb;
pub mod layout;
pub mod metadata;
pub mod model;
pub mod scan_cache;
pub mod session;
pub mod sync;
pub mod transfer;

pub use browse::{
    AlbumSummary, ArtistSummary, GenreSummary, UNKNOWN_ALBUM, UNKNOWN_ARTIST, UNKNOWN_GENRE,
    album_tracks, albums, artists, genres,
};
pub use config::{MAX_BUCKET_COUNT, PodsyncConfig, default_scan_cache_path};
pub use device::{
    DeviceInfo, SpaceProbe, StorageInfo, SystemSpaceProbe, UNKNOWN_GENERATION, UNKNOWN_MODEL,
    read_device_info, storage_info,
};
pub use error::{
    DatabaseError, Error, ErrorKind, FileSystemError, MetadataError, PlaylistError, Result,
    SyncError, TrackError,
};
pub use export::{
    ExportItem, ExportOptions, ExportOutcome, ExportProgress, ExportSummary, export_library,
    export_tracks, sanitize_filename,
};
pub use identity::{DuplicateResolver, FINGERPRINT_WINDOW, Fingerprint, fingerprint_file};
pub use integrity::{IntegrityIssue, IntegrityReport, check_integrity, remove_orphans};
pub use itunesdb::{read_database, write_database};
pub use layout::{DEFAULT_BUCKET_COUNT, DeviceLayout};
pub use metadata::{Id3Extractor, MetadataExtractor, TrackMetadata};
pub use model::{Document, MediaType, Playlist, PlaylistEntry, Track, TrackStatus};
pub use scan_cache::{JsonScanCache, MemoryScanCache, SCAN_CACHE_FILE, ScanCache, ScanEntry};
pub use session::{Session, has_database};
pub use sync::{
    ItemOutcome, ItemReport, PlannedAdd, PlannedSkip, SyncEngine, SyncEvent, SyncOptions,
    SyncPhase, SyncPlan, SyncProgress, SyncSummary, SyncWorker,
};
pub use transfer::{CopiedFile, CopyOptions, copy_file, file_checksum};
