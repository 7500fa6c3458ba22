//! Playlists and their entries.

use serde::{Deserialize, Serialize};

use crate::itunesdb::RawPlaylist;

/// One reference from a playlist to a track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistEntry {
    /// Referenced track.
    pub track_id: u32,
    /// Original `mhip` bytes, re-emitted while the entry exists.
    #[serde(skip)]
    pub(crate) raw: Option<Vec<u8>>,
}

impl PlaylistEntry {
    /// A new entry for `track_id`.
    pub const fn new(track_id: u32) -> Self {
        Self { track_id, raw: None }
    }
}

impl PartialEq for PlaylistEntry {
    fn eq(&self, other: &Self) -> bool {
        self.track_id == other.track_id
    }
}

/// A named, ordered collection of track references.
///
/// The same track may appear more than once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    /// Device-local ID.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Ordered track references.
    pub entries: Vec<PlaylistEntry>,
    /// The implicit "all tracks" playlist.
    pub is_master: bool,
    /// The implicit podcast playlist.
    pub is_podcast: bool,
    /// Rule-based playlist. Rules are carried through untouched.
    pub is_smart: bool,
    #[serde(skip)]
    pub(crate) raw: Option<RawPlaylist>,
}

impl Playlist {
    /// A new, empty regular playlist.
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            entries: Vec::new(),
            is_master: false,
            is_podcast: false,
            is_smart: false,
            raw: None,
        }
    }

    /// A new master playlist.
    pub(crate) fn new_master(id: u64, name: impl Into<String>) -> Self {
        Self {
            is_master: true,
            ..Self::new(id, name)
        }
    }

    /// A new podcast playlist.
    pub(crate) fn new_podcast(id: u64) -> Self {
        Self {
            is_podcast: true,
            ..Self::new(id, "Podcasts")
        }
    }

    /// Track IDs in playlist order.
    pub fn track_ids(&self) -> Vec<u32> {
        self.entries.iter().map(|e| e.track_id).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the playlist has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the playlist references `track_id`.
    pub fn contains(&self, track_id: u32) -> bool {
        self.entries.iter().any(|e| e.track_id == track_id)
    }

    /// Insert a reference at `position`, or at the end.
    pub(crate) fn insert(&mut self, track_id: u32, position: Option<usize>) {
        let at = position.map_or(self.entries.len(), |p| p.min(self.entries.len()));
        self.entries.insert(at, PlaylistEntry::new(track_id));
    }

    /// Remove the first reference to `track_id`.
    pub(crate) fn remove_first(&mut self, track_id: u32) -> bool {
        if let Some(index) = self.entries.iter().position(|e| e.track_id == track_id) {
            self.entries.remove(index);
            true
        } else {
            false
        }
    }

    /// Remove every reference to `track_id`. Returns how many were removed.
    pub(crate) fn remove_all(&mut self, track_id: u32) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.track_id != track_id);
        before - self.entries.len()
    }

    /// Replace every reference to `from` with `to`.
    pub(crate) fn redirect(&mut self, from: u32, to: u32) {
        for entry in self.entries.iter_mut().filter(|e| e.track_id == from) {
            entry.track_id = to;
            entry.raw = None;
        }
    }
}
