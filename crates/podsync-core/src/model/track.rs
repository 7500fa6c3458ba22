//! Track records.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::itunesdb::RawTrack;
use crate::metadata::TrackMetadata;

/// Kind of media a track holds, as stored in the track record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    /// Music.
    Audio,
    /// Music video or movie.
    Video,
    /// Audio podcast episode.
    Podcast,
    /// Video podcast episode.
    VideoPodcast,
    /// Audiobook.
    Audiobook,
    /// Any value this library does not name, kept as-is.
    Other(u32),
}

impl MediaType {
    /// Decode the on-disk media type. 0 is written by old firmware for audio.
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            0 | 1 => Self::Audio,
            2 => Self::Video,
            4 => Self::Podcast,
            6 => Self::VideoPodcast,
            8 => Self::Audiobook,
            other => Self::Other(other),
        }
    }

    /// On-disk value.
    pub const fn to_raw(self) -> u32 {
        match self {
            Self::Audio => 1,
            Self::Video => 2,
            Self::Podcast => 4,
            Self::VideoPodcast => 6,
            Self::Audiobook => 8,
            Self::Other(raw) => raw,
        }
    }

    /// Whether playback needs a video-capable device.
    pub const fn is_video(self) -> bool {
        matches!(self, Self::Video | Self::VideoPodcast)
    }

    /// Whether the track belongs to a podcast.
    pub const fn is_podcast(self) -> bool {
        matches!(self, Self::Podcast | Self::VideoPodcast)
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audio => write!(f, "Audio"),
            Self::Video => write!(f, "Video"),
            Self::Podcast => write!(f, "Podcast"),
            Self::VideoPodcast => write!(f, "Video Podcast"),
            Self::Audiobook => write!(f, "Audiobook"),
            Self::Other(raw) => write!(f, "Other({raw:#x})"),
        }
    }
}

/// Whether a track's backing file is on the device yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackStatus {
    /// Added in this session; the copy happens at the next sync.
    Pending,
    /// The backing file exists on the device.
    OnDevice,
}

/// One audio or video item in the device database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    /// Device-local ID, unique within the database.
    pub id: u32,
    /// 64-bit database ID.
    pub dbid: u64,
    /// Track title.
    pub title: Option<String>,
    /// Performing artist.
    pub artist: Option<String>,
    /// Album name.
    pub album: Option<String>,
    /// Album artist.
    pub album_artist: Option<String>,
    /// Genre.
    pub genre: Option<String>,
    /// Composer.
    pub composer: Option<String>,
    /// Free-form comment.
    pub comment: Option<String>,
    /// File type description, e.g. "MPEG audio file".
    pub filetype: Option<String>,
    /// On-device path in colon form, e.g. `:iPod_Control:Music:F07:PD000007.mp3`.
    /// Provisional while the track is pending.
    pub location: Option<String>,
    /// Track number on the disc.
    pub track_number: u32,
    /// Tracks on the disc.
    pub track_count: u32,
    /// Disc number.
    pub disc_number: u32,
    /// Discs in the set.
    pub disc_count: u32,
    /// Release year.
    pub year: u32,
    /// Length in milliseconds.
    pub duration_ms: u32,
    /// Bitrate in kbps.
    pub bitrate: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Size of the backing file in bytes.
    pub size: u64,
    /// Times played.
    pub play_count: u32,
    /// Rating in stars, 0 to 5.
    pub rating: u8,
    /// Media kind.
    pub media_type: MediaType,
    /// Part of a compilation.
    pub compilation: bool,
    /// Skip this track when shuffling.
    pub skip_when_shuffling: bool,
    /// Resume playback where it was left off.
    pub remember_position: bool,
    /// When the track was added (Unix seconds).
    pub date_added: Option<i64>,
    /// When the file was last modified (Unix seconds).
    pub date_modified: Option<i64>,
    /// When the track was last played (Unix seconds).
    pub last_played: Option<i64>,
    /// Whether the backing file has been copied.
    pub status: TrackStatus,
    /// File the track was added from in this session.
    pub source_path: Option<PathBuf>,
    #[serde(skip)]
    pub(crate) raw: Option<RawTrack>,
}

impl Track {
    /// An empty on-device track with the given ID.
    pub(crate) fn empty(id: u32) -> Self {
        Self {
            id,
            dbid: 0,
            title: None,
            artist: None,
            album: None,
            album_artist: None,
            genre: None,
            composer: None,
            comment: None,
            filetype: None,
            location: None,
            track_number: 0,
            track_count: 0,
            disc_number: 0,
            disc_count: 0,
            year: 0,
            duration_ms: 0,
            bitrate: 0,
            sample_rate: 0,
            size: 0,
            play_count: 0,
            rating: 0,
            media_type: MediaType::Audio,
            compilation: false,
            skip_when_shuffling: false,
            remember_position: false,
            date_added: None,
            date_modified: None,
            last_played: None,
            status: TrackStatus::OnDevice,
            source_path: None,
            raw: None,
        }
    }

    /// A pending track built from extracted metadata.
    pub(crate) fn pending(id: u32, source: PathBuf, metadata: &TrackMetadata, size: u64) -> Self {
        let mut track = Self::empty(id);
        track.apply_metadata(metadata);
        if track.title.is_none() {
            track.title = source
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned());
        }
        track.size = size;
        track.status = TrackStatus::Pending;
        track.source_path = Some(source);
        track
    }

    /// Copy every field present in `metadata` onto this track.
    pub(crate) fn apply_metadata(&mut self, metadata: &TrackMetadata) {
        let set = |dst: &mut Option<String>, src: &Option<String>| {
            if src.is_some() {
                dst.clone_from(src);
            }
        };
        set(&mut self.title, &metadata.title);
        set(&mut self.artist, &metadata.artist);
        set(&mut self.album, &metadata.album);
        set(&mut self.album_artist, &metadata.album_artist);
        set(&mut self.genre, &metadata.genre);
        set(&mut self.composer, &metadata.composer);
        set(&mut self.comment, &metadata.comment);
        set(&mut self.filetype, &metadata.filetype);

        if let Some(n) = metadata.track_number {
            self.track_number = n;
        }
        if let Some(n) = metadata.track_count {
            self.track_count = n;
        }
        if let Some(n) = metadata.disc_number {
            self.disc_number = n;
        }
        if let Some(n) = metadata.disc_count {
            self.disc_count = n;
        }
        if let Some(year) = metadata.year {
            self.year = u32::try_from(year).unwrap_or(0);
        }
        if let Some(ms) = metadata.duration_ms {
            self.duration_ms = ms;
        }
        if let Some(kbps) = metadata.bitrate_kbps {
            self.bitrate = kbps;
        }
        if let Some(hz) = metadata.sample_rate {
            self.sample_rate = hz;
        }
        if let Some(media_type) = metadata.media_type {
            self.media_type = media_type;
        }
    }

    /// Whether the backing file is on the device.
    pub fn is_on_device(&self) -> bool {
        self.status == TrackStatus::OnDevice
    }

    /// Title for display, falling back to the file name of the location.
    pub fn display_title(&self) -> String {
        if let Some(title) = self.title.as_deref().filter(|t| !t.trim().is_empty()) {
            return title.to_string();
        }
        self.location
            .as_deref()
            .and_then(|loc| loc.rsplit(':').next())
            .filter(|name| !name.is_empty())
            .map_or_else(|| format!("Track {}", self.id), str::to_string)
    }

    /// The descriptive fields of this track.
    pub fn metadata(&self) -> TrackMetadata {
        let nonzero = |n: u32| (n != 0).then_some(n);
        TrackMetadata {
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: self.album.clone(),
            album_artist: self.album_artist.clone(),
            genre: self.genre.clone(),
            composer: self.composer.clone(),
            comment: self.comment.clone(),
            filetype: self.filetype.clone(),
            track_number: nonzero(self.track_number),
            track_count: nonzero(self.track_count),
            disc_number: nonzero(self.disc_number),
            disc_count: nonzero(self.disc_count),
            year: nonzero(self.year).and_then(|y| i32::try_from(y).ok()),
            duration_ms: nonzero(self.duration_ms),
            bitrate_kbps: nonzero(self.bitrate),
            sample_rate: nonzero(self.sample_rate),
            media_type: Some(self.media_type),
        }
    }

    /// Lowercased file extension of the location, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.location.as_deref()?.rsplit(':').next()?;
        let (_, ext) = name.rsplit_once('.')?;
        (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_raw_values() {
        assert_eq!(MediaType::from_raw(0), MediaType::Audio);
        assert_eq!(MediaType::from_raw(2), MediaType::Video);
        assert_eq!(MediaType::from_raw(0x20), MediaType::Other(0x20));
        assert_eq!(MediaType::Other(0x20).to_raw(), 0x20);
        assert!(MediaType::VideoPodcast.is_video());
        assert!(MediaType::VideoPodcast.is_podcast());
        assert!(!MediaType::Audiobook.is_video());
    }

    #[test]
    fn test_pending_track_uses_file_stem_without_title() {
        let track = Track::pending(
            7,
            PathBuf::from("/music/Some Song.mp3"),
            &TrackMetadata::default(),
            1234,
        );
        assert_eq!(track.title.as_deref(), Some("Some Song"));
        assert_eq!(track.status, TrackStatus::Pending);
        assert_eq!(track.size, 1234);
    }

    #[test]
    fn test_apply_metadata_keeps_missing_fields() {
        let mut track = Track::empty(1);
        track.artist = Some("Kept".to_string());
        let metadata = TrackMetadata {
            title: Some("New".to_string()),
            track_number: Some(3),
            ..TrackMetadata::default()
        };
        track.apply_metadata(&metadata);
        assert_eq!(track.title.as_deref(), Some("New"));
        assert_eq!(track.artist.as_deref(), Some("Kept"));
        assert_eq!(track.track_number, 3);
    }

    #[test]
    fn test_display_title_and_extension() {
        let mut track = Track::empty(9);
        track.location = Some(":iPod_Control:Music:F09:PD000009.MP3".to_string());
        assert_eq!(track.display_title(), "PD000009.MP3");
        assert_eq!(track.extension().as_deref(), Some("mp3"));
        track.title = Some("Title".to_string());
        assert_eq!(track.display_title(), "Title");
    }

    #[test]
    fn test_metadata_round_trips_through_apply() {
        let mut track = Track::empty(2);
        track.title = Some("Song".to_string());
        track.year = 1999;
        track.media_type = MediaType::Podcast;

        let metadata = track.metadata();
        assert_eq!(metadata.year, Some(1999));
        assert_eq!(metadata.track_number, None);

        let mut copy = Track::empty(3);
        copy.apply_metadata(&metadata);
        assert_eq!(copy.title, track.title);
        assert_eq!(copy.media_type, MediaType::Podcast);
    }
}
