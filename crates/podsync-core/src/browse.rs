//! Library views over a document: albums, artists and genres.
//!
//! Tracks without a tag fall under "Unknown Album", "Unknown Artist" or
//! "Unknown Genre". Names are grouped and sorted case-insensitively; the
//! spelling of the first track seen wins.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::{Document, Track};

/// Album name shown for untagged tracks.
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Artist name shown for untagged tracks.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Genre shown for untagged tracks.
pub const UNKNOWN_GENRE: &str = "Unknown Genre";

/// An album and the tracks on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumSummary {
    /// Album name.
    pub name: String,
    /// Album artist, or the track artist when none is set.
    pub artist: String,
    /// Number of tracks.
    pub track_count: usize,
    /// Combined length in milliseconds.
    pub total_duration_ms: u64,
    /// Release year, if any track carries one.
    pub year: Option<u32>,
}

/// An artist and how much of the library is theirs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistSummary {
    /// Artist name.
    pub name: String,
    /// Distinct albums.
    pub album_count: usize,
    /// Number of tracks.
    pub track_count: usize,
}

/// A genre and its track count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenreSummary {
    /// Genre name.
    pub name: String,
    /// Number of tracks.
    pub track_count: usize,
}

fn tag_or<'a>(value: Option<&'a str>, fallback: &'a str) -> &'a str {
    value.map(str::trim).filter(|v| !v.is_empty()).unwrap_or(fallback)
}

fn album_of(track: &Track) -> &str {
    tag_or(track.album.as_deref(), UNKNOWN_ALBUM)
}

fn artist_of(track: &Track) -> &str {
    tag_or(track.artist.as_deref(), UNKNOWN_ARTIST)
}

/// Album artist, falling back to the track artist.
fn album_artist_of(track: &Track) -> &str {
    match track.album_artist.as_deref().map(str::trim) {
        Some(artist) if !artist.is_empty() => artist,
        _ => artist_of(track),
    }
}

fn genre_of(track: &Track) -> &str {
    tag_or(track.genre.as_deref(), UNKNOWN_GENRE)
}

fn key(name: &str) -> String {
    name.to_lowercase()
}

/// Every album, sorted by name then artist.
pub fn albums(document: &Document) -> Vec<AlbumSummary> {
    let mut grouped: BTreeMap<(String, String), AlbumSummary> = BTreeMap::new();
    for track in document.tracks() {
        let (album, artist) = (album_of(track), album_artist_of(track));
        let summary = grouped
            .entry((key(album), key(artist)))
            .or_insert_with(|| AlbumSummary {
                name: album.to_string(),
                artist: artist.to_string(),
                track_count: 0,
                total_duration_ms: 0,
                year: None,
            });
        summary.track_count += 1;
        summary.total_duration_ms += u64::from(track.duration_ms);
        if summary.year.is_none() && track.year != 0 {
            summary.year = Some(track.year);
        }
    }
    grouped.into_values().collect()
}

/// Every artist, sorted by name.
pub fn artists(document: &Document) -> Vec<ArtistSummary> {
    let mut grouped: BTreeMap<String, (ArtistSummary, BTreeSet<String>)> = BTreeMap::new();
    for track in document.tracks() {
        let artist = artist_of(track);
        let (summary, albums) = grouped.entry(key(artist)).or_insert_with(|| {
            (
                ArtistSummary {
                    name: artist.to_string(),
                    album_count: 0,
                    track_count: 0,
                },
                BTreeSet::new(),
            )
        });
        summary.track_count += 1;
        albums.insert(key(album_of(track)));
    }
    grouped
        .into_values()
        .map(|(mut summary, albums)| {
            summary.album_count = albums.len();
            summary
        })
        .collect()
}

/// Every genre, sorted by name.
pub fn genres(document: &Document) -> Vec<GenreSummary> {
    let mut grouped: BTreeMap<String, GenreSummary> = BTreeMap::new();
    for track in document.tracks() {
        let genre = genre_of(track);
        grouped
            .entry(key(genre))
            .or_insert_with(|| GenreSummary {
                name: genre.to_string(),
                track_count: 0,
            })
            .track_count += 1;
    }
    grouped.into_values().collect()
}

/// Tracks of `album`, optionally restricted to one album artist, in disc then
/// track order.
///
/// Pass [`UNKNOWN_ALBUM`] for untagged tracks.
pub fn album_tracks<'a>(document: &'a Document, album: &str, artist: Option<&str>) -> Vec<&'a Track> {
    let album = key(album);
    let artist = artist.map(key);
    let mut tracks: Vec<&Track> = document
        .tracks()
        .filter(|t| key(album_of(t)) == album)
        .filter(|t| artist.as_ref().is_none_or(|a| key(album_artist_of(t)) == *a))
        .collect();
    tracks.sort_by(|a, b| {
        a.disc_number
            .cmp(&b.disc_number)
            .then(a.track_number.cmp(&b.track_number))
            .then_with(|| key(&a.display_title()).cmp(&key(&b.display_title())))
    });
    tracks
}
