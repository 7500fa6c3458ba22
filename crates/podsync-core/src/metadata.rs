//! Source file metadata extraction.
//!
//! Adding a track needs its tags up front. The [`MetadataExtractor`] trait is
//! the seam; [`Id3Extractor`] reads ID3v1/ID3v2 tags and falls back to what
//! the file name and extension reveal when a file carries no tag.
//!
//! # Example
//!
//! ```rust,ignore
//! use podsync_core::metadata::{Id3Extractor, MetadataExtractor};
//! use std::path::Path;
//!
//! let metadata = Id3Extractor::new().extract(Path::new("song.mp3"))?;
//! println!("Title: {:?}", metadata.title);
//! ```

use std::path::Path;

use id3::{Tag, TagLike};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, FileSystemError, MetadataError, Result};
use crate::model::MediaType;

/// Metadata for a file about to be added.
///
/// All fields are optional; tags may be missing or partial.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackMetadata {
    /// Track title.
    pub title: Option<String>,
    /// Artist.
    pub artist: Option<String>,
    /// Album.
    pub album: Option<String>,
    /// Album artist (may differ from track artist for compilations).
    pub album_artist: Option<String>,
    /// Genre.
    pub genre: Option<String>,
    /// Composer.
    pub composer: Option<String>,
    /// Comment.
    pub comment: Option<String>,
    /// File type description.
    pub filetype: Option<String>,
    /// Track number within the disc.
    pub track_number: Option<u32>,
    /// Total tracks on the disc.
    pub track_count: Option<u32>,
    /// Disc number.
    pub disc_number: Option<u32>,
    /// Total discs.
    pub disc_count: Option<u32>,
    /// Release year.
    pub year: Option<i32>,
    /// Duration in milliseconds.
    pub duration_ms: Option<u32>,
    /// Bitrate in kbps.
    pub bitrate_kbps: Option<u32>,
    /// Sample rate in Hz.
    pub sample_rate: Option<u32>,
    /// Media kind, when the file reveals it.
    pub media_type: Option<MediaType>,
}

impl TrackMetadata {
    /// Check if the metadata has any descriptive content.
    #[must_use]
    pub const fn has_content(&self) -> bool {
        self.title.is_some() || self.artist.is_some() || self.album.is_some()
    }

    /// Whether the file needs a video-capable device.
    #[must_use]
    pub fn is_video(&self) -> bool {
        self.media_type.is_some_and(MediaType::is_video)
    }
}

/// Reads metadata from a source file.
#[cfg_attr(test, mockall::automock)]
pub trait MetadataExtractor: Send + Sync {
    /// Extract metadata from `path`.
    ///
    /// # Errors
    ///
    /// Fails with `FileSystemError::NotFound` when the file does not exist and
    /// `MetadataError::Unreadable` when it cannot be read.
    fn extract(&self, path: &Path) -> Result<TrackMetadata>;
}

/// ID3 tag based extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct Id3Extractor;

impl Id3Extractor {
    /// Create a new extractor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl MetadataExtractor for Id3Extractor {
    fn extract(&self, path: &Path) -> Result<TrackMetadata> {
        if !path.exists() {
            return Err(Error::FileSystem(FileSystemError::NotFound {
                path: path.to_path_buf(),
            }));
        }

        debug!("Extracting metadata from: {}", path.display());
        let mut metadata = from_extension(path);

        let tag = match Tag::read_from_path(path) {
            Ok(tag) => tag,
            Err(id3::Error {
                kind: id3::ErrorKind::NoTag,
                ..
            }) => {
                debug!("No ID3 tag found in: {}", path.display());
                return Ok(metadata);
            }
            Err(id3::Error {
                kind: id3::ErrorKind::Io(e),
                ..
            }) => {
                return Err(MetadataError::Unreadable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }
                .into());
            }
            Err(e) => {
                warn!("Ignoring malformed ID3 tag in {}: {}", path.display(), e);
                return Ok(metadata);
            }
        };

        metadata.title = tag.title().map(String::from);
        metadata.artist = tag.artist().map(String::from);
        metadata.album = tag.album().map(String::from);
        metadata.album_artist = tag.album_artist().map(String::from);
        metadata.genre = tag.genre_parsed().map(|g| g.to_string());
        metadata.composer = tag
            .get("TCOM")
            .and_then(|frame| frame.content().text())
            .map(String::from);
        metadata.comment = tag.comments().next().map(|c| c.text.clone());
        metadata.track_number = tag.track();
        metadata.track_count = tag.total_tracks();
        metadata.disc_number = tag.disc();
        metadata.disc_count = tag.total_discs();
        metadata.year = tag.year();
        metadata.duration_ms = tag.duration();

        debug!(
            "Extracted metadata - title: {:?}, artist: {:?}, album: {:?}",
            metadata.title, metadata.artist, metadata.album
        );
        Ok(metadata)
    }
}

/// What the extension alone says about a file.
fn from_extension(path: &Path) -> TrackMetadata {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let (filetype, media_type) = match ext.as_str() {
        "mp3" => ("MPEG audio file", MediaType::Audio),
        "m4a" | "aac" => ("AAC audio file", MediaType::Audio),
        "m4b" => ("AAC audio book file", MediaType::Audiobook),
        "wav" => ("WAV audio file", MediaType::Audio),
        "aif" | "aiff" => ("AIFF audio file", MediaType::Audio),
        "m4v" | "mp4" | "mov" => ("MPEG-4 video file", MediaType::Video),
        _ => return TrackMetadata::default(),
    };
    TrackMetadata {
        filetype: Some(filetype.to_string()),
        media_type: Some(media_type),
        ..TrackMetadata::default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_extract_missing_file() {
        let result = Id3Extractor::new().extract(Path::new("/nonexistent/file.mp3"));
        assert!(matches!(
            result,
            Err(Error::FileSystem(FileSystemError::NotFound { .. }))
        ));
    }

    #[test]
    fn test_extract_untagged_file_uses_extension() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("clip.m4v");
        fs::write(&path, b"not really a video").unwrap();

        let metadata = Id3Extractor::new().extract(&path).unwrap();

        assert!(!metadata.has_content());
        assert!(metadata.is_video());
        assert_eq!(metadata.filetype.as_deref(), Some("MPEG-4 video file"));
    }

    #[test]
    fn test_extract_id3_tag() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("song.mp3");
        fs::write(&path, vec![0u8; 512]).unwrap();

        let mut tag = Tag::new();
        tag.set_title("Title");
        tag.set_artist("Artist");
        tag.set_album("Album");
        tag.set_track(3);
        tag.set_total_tracks(12);
        tag.set_year(2004);
        tag.write_to_path(&path, id3::Version::Id3v24).unwrap();

        let metadata = Id3Extractor::new().extract(&path).unwrap();

        assert_eq!(metadata.title.as_deref(), Some("Title"));
        assert_eq!(metadata.artist.as_deref(), Some("Artist"));
        assert_eq!(metadata.track_number, Some(3));
        assert_eq!(metadata.track_count, Some(12));
        assert_eq!(metadata.year, Some(2004));
        assert_eq!(metadata.media_type, Some(MediaType::Audio));
    }

    #[test]
    fn test_metadata_serialization() {
        let metadata = TrackMetadata {
            title: Some("Test Song".to_string()),
            duration_ms: Some(180_000),
            media_type: Some(MediaType::Podcast),
            ..Default::default()
        };
        let json = serde_json::to_string(&metadata).expect("serialize");
        let back: TrackMetadata = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(metadata, back);
    }

    #[test]
    fn test_mock_extractor() {
        let mut mock = MockMetadataExtractor::new();
        mock.expect_extract().returning(|path| {
            Err(MetadataError::Unreadable {
                path: path.to_path_buf(),
                reason: "locked".to_string(),
            }
            .into())
        });
        assert!(mock.extract(Path::new("/a.mp3")).is_err());
    }
}
