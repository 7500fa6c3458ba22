//! Open device sessions and the mutation API.
//!
//! A [`Session`] owns the decoded database of one mounted device behind a
//! single mutex. Every mutation, every save and a whole sync run hold that
//! mutex, so no two of them interleave. Cloning a session shares it.
//!
//! Nothing is written until [`Session::save`] or a sync commit; closing a
//! session with unsaved changes discards them.
//!
//! # Example
//!
//! ```rust,ignore
//! use podsync_core::Session;
//!
//! let session = Session::open("/Volumes/IPOD")?;
//! let road_trip = session.create_playlist("Road Trip")?;
//! let track = session.add_track_from_file(Path::new("song.mp3"), &Id3Extractor::new())?;
//! session.add_track_to_playlist(road_trip.id, track.id, None)?;
//! ```
//!
//! Two processes opening the same mountpoint at once is not detected and
//! leads to one overwriting the other's database.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::device::{DeviceInfo, read_device_info};
use crate::error::{Error, FileSystemError, Result, TrackError};
use crate::fs::{ensure_dir, read_error, remove_file_if_exists};
use crate::itunesdb::{self, convert, playcounts};
use crate::layout::{DEFAULT_BUCKET_COUNT, DeviceLayout};
use crate::metadata::{MetadataExtractor, TrackMetadata};
use crate::model::{Document, Playlist, Track};

/// State guarded by the session mutex.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) layout: DeviceLayout,
    pub(crate) document: Document,
    pub(crate) device: DeviceInfo,
    /// A `Play Counts` file was folded into the document and must be removed
    /// once the database is saved.
    pub(crate) play_counts_merged: bool,
}

impl SessionState {
    /// Write the database and clear the dirty flag.
    pub(crate) fn save(&mut self) -> Result<()> {
        itunesdb::write_database(&self.document, &self.layout.database_path())?;
        self.document.dirty = false;

        if self.play_counts_merged {
            let path = self.layout.play_counts_path();
            match remove_file_if_exists(&path) {
                Ok(_) => self.play_counts_merged = false,
                Err(e) => warn!("Could not remove {}: {}", path.display(), e),
            }
        }
        Ok(())
    }
}

/// An open device database.
#[derive(Debug, Clone)]
pub struct Session {
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    /// Open the device mounted at `mountpoint`.
    ///
    /// Fails if there is no `iPod_Control` directory or the database is
    /// missing or cannot be decoded. A `Play Counts` file left by the
    /// firmware is merged in.
    pub fn open(mountpoint: impl Into<PathBuf>) -> Result<Self> {
        let layout = DeviceLayout::new(mountpoint);
        layout.validate()?;
        let mut document = itunesdb::read_database(&layout.database_path())?;
        let play_counts_merged = merge_play_counts(&layout, &mut document);
        let device = read_device_info(layout.mountpoint());

        info!(
            "Opened {} at {} ({} tracks, {} playlists)",
            device,
            layout.mountpoint().display(),
            document.track_count(),
            document.playlists().len()
        );
        Ok(Self::from_state(SessionState {
            layout,
            document,
            device,
            play_counts_merged,
        }))
    }

    /// Open the device at `mountpoint`, writing a fresh empty database first
    /// if it has none.
    ///
    /// The new database holds only the master playlist, named `name`, and
    /// the podcast playlist. The default number of music bucket directories
    /// is created.
    pub fn initialize(mountpoint: impl Into<PathBuf>, name: &str) -> Result<Self> {
        Self::initialize_with_buckets(mountpoint, name, DEFAULT_BUCKET_COUNT)
    }

    /// [`initialize`](Self::initialize) creating `bucket_count` `Fnn`
    /// directories on a device that has none.
    pub fn initialize_with_buckets(
        mountpoint: impl Into<PathBuf>,
        name: &str,
        bucket_count: u32,
    ) -> Result<Self> {
        let layout = DeviceLayout::new(mountpoint);
        layout.validate()?;

        let database = layout.database_path();
        if database.exists() {
            info!("{} already exists; opening it", database.display());
            return Self::open(layout.mountpoint());
        }

        for bucket in 0..layout.bucket_count(bucket_count) {
            ensure_dir(&layout.music_dir().join(format!("F{bucket:02}")))?;
        }
        let document = itunesdb::new_document(name);
        itunesdb::write_database(&document, &database)?;
        info!("Initialized new database at {}", database.display());
        Self::open(layout.mountpoint())
    }

    pub(crate) fn from_state(state: SessionState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Lock the session. A poisoned mutex is recovered; every mutation
    /// validates before it changes state.
    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the session. Unsaved changes are lost.
    pub fn close(self) {
        let state = self.lock();
        if state.document.is_dirty() {
            warn!(
                "Closing {} with unsaved changes",
                state.layout.mountpoint().display()
            );
        } else {
            debug!("Closing {}", state.layout.mountpoint().display());
        }
    }

    /// Write the database to the device.
    ///
    /// The previous database file is left untouched if writing fails.
    pub fn save(&self) -> Result<()> {
        self.lock().save()
    }

    // =========================================================================
    // Read access
    // =========================================================================

    /// Mountpoint of the device.
    pub fn mountpoint(&self) -> PathBuf {
        self.lock().layout.mountpoint().to_path_buf()
    }

    /// Device paths.
    pub fn layout(&self) -> DeviceLayout {
        self.lock().layout.clone()
    }

    /// Device identity read at open time.
    pub fn device_info(&self) -> DeviceInfo {
        self.lock().device.clone()
    }

    /// Snapshot of the current document.
    pub fn document(&self) -> Document {
        self.lock().document.clone()
    }

    /// Run `f` against the document without copying it.
    pub fn with_document<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        f(&self.lock().document)
    }

    /// Whether there are unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.lock().document.is_dirty()
    }

    /// Track by ID.
    pub fn track(&self, id: u32) -> Option<Track> {
        self.lock().document.track(id).cloned()
    }

    /// Playlist by ID.
    pub fn playlist(&self, id: u64) -> Option<Playlist> {
        self.lock().document.playlist(id).cloned()
    }

    // =========================================================================
    // Tracks
    // =========================================================================

    /// Queue `source` for copying to the device as a new track.
    ///
    /// The track is appended to the master playlist right away. Its on-device
    /// path is provisional and its file is copied by the next sync.
    ///
    /// # Errors
    ///
    /// - `FileSystemError::NotFound` if `source` does not exist.
    /// - `TrackError::UnsupportedMedia` for video on a known non-video model.
    /// - `TrackError::DuplicatePath` if the provisional path is taken.
    pub fn add_track(&self, source: &Path, metadata: &TrackMetadata) -> Result<Track> {
        let size = match fs::metadata(source) {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => {
                return Err(Error::FileSystem(FileSystemError::InvalidPath {
                    path: source.to_path_buf(),
                    reason: "not a regular file".to_string(),
                }));
            }
            Err(e) => return Err(read_error(source, e)),
        };

        let mut state = self.lock();
        if metadata.is_video() && !state.device.accepts_video() {
            return Err(TrackError::UnsupportedMedia {
                model: state.device.model_name.clone(),
            }
            .into());
        }

        let id = state.document.allocate_track_id();
        let extension = source
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let buckets = state.layout.bucket_count(DEFAULT_BUCKET_COUNT);
        let location = state.layout.allocate_location(id, &extension, buckets);

        let mut track = Track::pending(id, source.to_path_buf(), metadata, size);
        track.location = Some(location);
        track.date_added = Some(convert::unix_now());
        state.document.insert_track(track.clone())?;

        info!(
            "Queued track {} ({}) from {}",
            id,
            track.display_title(),
            source.display()
        );
        Ok(track)
    }

    /// Extract metadata from `source` with `extractor`, then [`add_track`](Self::add_track).
    pub fn add_track_from_file(
        &self,
        source: &Path,
        extractor: &dyn MetadataExtractor,
    ) -> Result<Track> {
        let metadata = extractor.extract(source)?;
        self.add_track(source, &metadata)
    }

    /// Remove a track from the device and from every playlist.
    ///
    /// Its file is deleted after the next successful sync commit.
    pub fn remove_track(&self, id: u32) -> Result<Track> {
        let track = self.lock().document.remove_track(id)?;
        info!("Removed track {} ({})", id, track.display_title());
        Ok(track)
    }

    /// Remove several tracks. Fails without changing anything if any ID is
    /// unknown.
    pub fn remove_tracks(&self, ids: &[u32]) -> Result<usize> {
        let mut state = self.lock();
        if let Some(missing) = ids.iter().find(|id| state.document.track(**id).is_none()) {
            return Err(TrackError::NotFound { id: *missing }.into());
        }
        let mut removed = 0;
        for id in ids {
            // Repeated IDs in `ids` are already gone on their second pass.
            if state.document.remove_track(*id).is_ok() {
                removed += 1;
            }
        }
        info!("Removed {} track(s)", removed);
        Ok(removed)
    }

    /// Set a track's rating in stars, 0 to 5.
    pub fn set_rating(&self, id: u32, stars: u8) -> Result<()> {
        self.lock().document.set_rating(id, stars)
    }

    /// Overwrite a track's fields with the ones present in `metadata`.
    pub fn update_track_metadata(&self, id: u32, metadata: &TrackMetadata) -> Result<()> {
        self.lock().document.update_track_metadata(id, metadata)
    }

    // =========================================================================
    // Playlists
    // =========================================================================

    /// Create an empty playlist. The name is trimmed; duplicates are allowed.
    pub fn create_playlist(&self, name: &str) -> Result<Playlist> {
        let playlist = self.lock().document.create_playlist(name)?;
        info!("Created playlist {} '{}'", playlist.id, playlist.name);
        Ok(playlist)
    }

    /// Delete a playlist. The master and podcast playlists are protected.
    pub fn delete_playlist(&self, id: u64) -> Result<()> {
        let playlist = self.lock().document.delete_playlist(id)?;
        info!("Deleted playlist {} '{}'", id, playlist.name);
        Ok(())
    }

    /// Rename a playlist.
    pub fn rename_playlist(&self, id: u64, name: &str) -> Result<()> {
        self.lock().document.rename_playlist(id, name)?;
        debug!("Renamed playlist {}", id);
        Ok(())
    }

    /// Insert a track into a playlist at `position`, or at the end.
    /// A track may appear more than once.
    pub fn add_track_to_playlist(
        &self,
        playlist_id: u64,
        track_id: u32,
        position: Option<usize>,
    ) -> Result<()> {
        self.lock()
            .document
            .add_track_to_playlist(playlist_id, track_id, position)
    }

    /// Append several tracks to a playlist. Fails without changing anything
    /// if any track ID is unknown.
    pub fn add_tracks_to_playlist(&self, playlist_id: u64, track_ids: &[u32]) -> Result<()> {
        let mut state = self.lock();
        if let Some(missing) = track_ids
            .iter()
            .find(|id| state.document.track(**id).is_none())
        {
            return Err(TrackError::NotFound { id: *missing }.into());
        }
        for id in track_ids {
            state
                .document
                .add_track_to_playlist(playlist_id, *id, None)?;
        }
        Ok(())
    }

    /// Remove the first occurrence of a track from a playlist.
    pub fn remove_track_from_playlist(&self, playlist_id: u64, track_id: u32) -> Result<()> {
        self.lock()
            .document
            .remove_track_from_playlist(playlist_id, track_id)
    }
}

/// Fold the firmware's `Play Counts` file into `document`.
///
/// Returns whether the file was merged and should be removed after saving.
/// An unreadable file is left alone.
fn merge_play_counts(layout: &DeviceLayout, document: &mut Document) -> bool {
    let path = layout.play_counts_path();
    if !path.is_file() {
        return false;
    }
    let entries = fs::read(&path)
        .map_err(|e| read_error(&path, e))
        .and_then(|bytes| playcounts::parse(&bytes));
    match entries {
        Ok(entries) => {
            let updated = playcounts::merge(document, &entries);
            info!("Merged play counts for {} track(s)", updated);
            true
        }
        Err(e) => {
            warn!("Ignoring unreadable {}: {}", path.display(), e);
            false
        }
    }
}

/// Whether `mountpoint` carries a database file.
pub fn has_database(mountpoint: &Path) -> bool {
    DeviceLayout::new(mountpoint).database_path().is_file()
}
