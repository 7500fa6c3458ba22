//! The in-memory device database.
//!
//! A [`Document`] owns every track and playlist of one iTunesDB image plus the
//! raw structures needed to write it back unchanged. It performs no I/O; the
//! [`Session`](crate::Session) wraps it with locking, file checks and saving.
//!
//! Two invariants hold after every mutation:
//!
//! - the master playlist references exactly the live track set, each track once;
//! - no playlist references a track that is not in the document.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use super::{Playlist, Track, TrackStatus};
use crate::error::{PlaylistError, Result, TrackError};
use crate::itunesdb::{Section, bytes};
use crate::metadata::TrackMetadata;

/// Root aggregate of one device database.
#[derive(Debug, Clone)]
pub struct Document {
    pub(crate) header: Vec<u8>,
    pub(crate) sections: Vec<Section>,
    pub(crate) tracks: BTreeMap<u32, Track>,
    pub(crate) track_order: Vec<u32>,
    /// Master first, then the rest in on-disk order.
    pub(crate) playlists: Vec<Playlist>,
    pub(crate) next_track_id: u32,
    pub(crate) next_playlist_id: u64,
    pub(crate) dirty: bool,
    pub(crate) playlists_changed: bool,
    /// On-device locations whose files go once the next sync commits.
    pub(crate) pending_deletes: Vec<String>,
}

impl Document {
    /// Assemble a document from decoded parts and restore the invariants.
    pub(crate) fn from_parts(
        header: Vec<u8>,
        sections: Vec<Section>,
        tracks: Vec<Track>,
        playlists: Vec<Playlist>,
    ) -> Self {
        let track_order: Vec<u32> = tracks.iter().map(|t| t.id).collect();
        let next_track_id = tracks.iter().map(|t| t.id).max().map_or(1, |id| id.saturating_add(1));
        let next_playlist_id = playlists
            .iter()
            .map(|p| p.id)
            .max()
            .map_or(1, |id| id.saturating_add(1));

        let mut doc = Self {
            header,
            sections,
            tracks: tracks.into_iter().map(|t| (t.id, t)).collect(),
            track_order,
            playlists,
            next_track_id,
            next_playlist_id,
            dirty: false,
            playlists_changed: false,
            pending_deletes: Vec::new(),
        };
        doc.drop_dangling_references();
        if doc.normalize_master() {
            warn!("Master playlist did not match the track list; rebuilt it");
            doc.mark_changed();
        }
        doc
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Database format version from the header.
    pub fn version(&self) -> u32 {
        bytes::field_u32(&self.header, 0x10)
    }

    /// 64-bit database ID from the header.
    pub fn database_id(&self) -> u64 {
        bytes::field_u64(&self.header, 0x18)
    }

    /// All tracks, ordered by ID.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    /// All tracks in on-disk record order, new tracks last.
    pub fn tracks_in_record_order(&self) -> impl Iterator<Item = &Track> {
        self.track_order.iter().filter_map(|id| self.tracks.get(id))
    }

    /// Number of tracks, pending ones included.
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Track by ID.
    pub fn track(&self, id: u32) -> Option<&Track> {
        self.tracks.get(&id)
    }

    /// Playlists, master first.
    pub fn playlists(&self) -> &[Playlist] {
        &self.playlists
    }

    /// Playlist by ID.
    pub fn playlist(&self, id: u64) -> Option<&Playlist> {
        self.playlists.iter().find(|p| p.id == id)
    }

    /// The master playlist.
    pub fn master_playlist(&self) -> &Playlist {
        &self.playlists[0]
    }

    /// The podcast playlist, if the image has one.
    pub fn podcast_playlist(&self) -> Option<&Playlist> {
        self.playlists.iter().find(|p| p.is_podcast)
    }

    /// Whether there are unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Tracks still waiting for their file copy, in record order.
    pub fn pending_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks_in_record_order()
            .filter(|t| t.status == TrackStatus::Pending)
    }

    /// On-device locations scheduled for deletion at the next sync.
    pub fn pending_deletes(&self) -> &[String] {
        &self.pending_deletes
    }

    /// Live track owning `location`, compared case-insensitively.
    pub fn track_by_location(&self, location: &str) -> Option<&Track> {
        self.tracks.values().find(|t| {
            t.location
                .as_deref()
                .is_some_and(|l| l.eq_ignore_ascii_case(location))
        })
    }

    // =========================================================================
    // Track mutations
    // =========================================================================

    /// Reserve the next track ID.
    pub(crate) fn allocate_track_id(&mut self) -> u32 {
        let id = self.next_track_id;
        self.next_track_id = self.next_track_id.saturating_add(1);
        id
    }

    /// Insert a new track and append it to the master playlist.
    pub(crate) fn insert_track(&mut self, track: Track) -> Result<()> {
        if let Some(location) = track.location.as_deref()
            && let Some(existing) = self.track_by_location(location)
        {
            return Err(TrackError::DuplicatePath {
                path: location.to_string(),
                existing_id: existing.id,
            }
            .into());
        }

        let id = track.id;
        self.track_order.push(id);
        self.tracks.insert(id, track);
        self.playlists[0].insert(id, None);
        self.mark_changed();
        debug!("Inserted track {}", id);
        Ok(())
    }

    /// Remove a track and every playlist reference to it.
    ///
    /// The backing file of an on-device track is scheduled for deletion.
    pub(crate) fn remove_track(&mut self, id: u32) -> Result<Track> {
        let track = self
            .tracks
            .remove(&id)
            .ok_or(TrackError::NotFound { id })?;
        self.track_order.retain(|t| *t != id);
        let mut references = 0;
        for playlist in &mut self.playlists {
            references += playlist.remove_all(id);
        }
        if track.status == TrackStatus::OnDevice
            && let Some(location) = &track.location
        {
            self.pending_deletes.push(location.clone());
        }
        self.mark_changed();
        debug!("Removed track {} and {} playlist reference(s)", id, references);
        Ok(track)
    }

    /// Remove a pending track that will never be copied.
    pub(crate) fn discard_pending(&mut self, id: u32) {
        if self
            .tracks
            .get(&id)
            .is_some_and(|t| t.status == TrackStatus::Pending)
        {
            // A pending track never has a backing file to schedule.
            let _ = self.remove_track(id);
        }
    }

    /// Mark a pending track as copied.
    pub(crate) fn finalize_track(&mut self, id: u32, location: String, size: u64) -> Result<()> {
        let track = self
            .tracks
            .get_mut(&id)
            .ok_or(TrackError::NotFound { id })?;
        track.location = Some(location);
        track.size = size;
        track.status = TrackStatus::OnDevice;
        self.dirty = true;
        Ok(())
    }

    /// Point every reference to `from` at `to`, then drop `from`.
    pub(crate) fn merge_into(&mut self, from: u32, to: u32) {
        for playlist in self.playlists.iter_mut().skip(1) {
            playlist.redirect(from, to);
        }
        self.discard_pending(from);
    }

    /// Set a track's rating in stars (clamped to 5).
    pub(crate) fn set_rating(&mut self, id: u32, stars: u8) -> Result<()> {
        let track = self
            .tracks
            .get_mut(&id)
            .ok_or(TrackError::NotFound { id })?;
        track.rating = stars.min(5);
        self.dirty = true;
        Ok(())
    }

    /// Overwrite the fields present in `metadata`.
    pub(crate) fn update_track_metadata(&mut self, id: u32, metadata: &TrackMetadata) -> Result<()> {
        let track = self
            .tracks
            .get_mut(&id)
            .ok_or(TrackError::NotFound { id })?;
        track.apply_metadata(metadata);
        self.dirty = true;
        Ok(())
    }

    // =========================================================================
    // Playlist mutations
    // =========================================================================

    /// Create an empty playlist. Duplicate names are allowed.
    pub(crate) fn create_playlist(&mut self, name: &str) -> Result<Playlist> {
        let name = validate_name(name)?;
        let id = self.next_playlist_id;
        self.next_playlist_id = self.next_playlist_id.saturating_add(1);
        let playlist = Playlist::new(id, name);
        self.playlists.push(playlist.clone());
        self.mark_changed();
        Ok(playlist)
    }

    /// Delete a playlist other than the master or podcast list.
    pub(crate) fn delete_playlist(&mut self, id: u64) -> Result<Playlist> {
        let index = self.playlist_index(id)?;
        let playlist = &self.playlists[index];
        if playlist.is_master {
            return Err(PlaylistError::CannotDeleteMaster.into());
        }
        if playlist.is_podcast {
            return Err(PlaylistError::CannotDeletePodcastList.into());
        }
        let removed = self.playlists.remove(index);
        self.mark_changed();
        Ok(removed)
    }

    /// Rename a playlist other than the master.
    pub(crate) fn rename_playlist(&mut self, id: u64, name: &str) -> Result<()> {
        let index = self.playlist_index(id)?;
        let name = validate_name(name)?;
        let playlist = &mut self.playlists[index];
        if playlist.is_master {
            return Err(PlaylistError::CannotModifyMaster.into());
        }
        playlist.name = name;
        self.mark_changed();
        Ok(())
    }

    /// Insert a track reference at `position` (default: end).
    pub(crate) fn add_track_to_playlist(
        &mut self,
        playlist_id: u64,
        track_id: u32,
        position: Option<usize>,
    ) -> Result<()> {
        let index = self.editable_playlist_index(playlist_id)?;
        if !self.tracks.contains_key(&track_id) {
            return Err(TrackError::NotFound { id: track_id }.into());
        }
        self.playlists[index].insert(track_id, position);
        self.mark_changed();
        Ok(())
    }

    /// Remove the first reference to a track.
    pub(crate) fn remove_track_from_playlist(&mut self, playlist_id: u64, track_id: u32) -> Result<()> {
        let index = self.editable_playlist_index(playlist_id)?;
        if !self.playlists[index].remove_first(track_id) {
            return Err(TrackError::NotFound { id: track_id }.into());
        }
        self.mark_changed();
        Ok(())
    }

    fn playlist_index(&self, id: u64) -> Result<usize> {
        self.playlists
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| PlaylistError::NotFound { id }.into())
    }

    fn editable_playlist_index(&self, id: u64) -> Result<usize> {
        let index = self.playlist_index(id)?;
        if self.playlists[index].is_master {
            return Err(PlaylistError::CannotModifyMaster.into());
        }
        Ok(index)
    }

    // =========================================================================
    // Invariants
    // =========================================================================

    pub(crate) fn mark_changed(&mut self) {
        self.dirty = true;
        self.playlists_changed = true;
    }

    /// Make the master reference each live track exactly once.
    ///
    /// Existing entries keep their order; missing tracks are appended in
    /// record order. Returns whether anything changed.
    pub(crate) fn normalize_master(&mut self) -> bool {
        let master = &mut self.playlists[0];
        let before = master.entries.len();
        let mut seen = HashSet::with_capacity(self.tracks.len());
        master
            .entries
            .retain(|e| self.tracks.contains_key(&e.track_id) && seen.insert(e.track_id));
        let retained = master.entries.len();
        for id in &self.track_order {
            if seen.insert(*id) {
                master.insert(*id, None);
            }
        }
        retained != before || master.entries.len() != retained
    }

    /// Drop references to unknown tracks from every non-master playlist.
    fn drop_dangling_references(&mut self) {
        let mut dropped = 0;
        for playlist in self.playlists.iter_mut().skip(1) {
            let before = playlist.entries.len();
            playlist
                .entries
                .retain(|e| self.tracks.contains_key(&e.track_id));
            let removed = before - playlist.entries.len();
            if removed > 0 {
                warn!(
                    "Playlist '{}' referenced {} unknown track(s); dropped them",
                    playlist.name, removed
                );
                dropped += removed;
            }
        }
        if dropped > 0 {
            self.mark_changed();
        }
    }
}

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(PlaylistError::EmptyName.into());
    }
    Ok(trimmed.to_string())
}
