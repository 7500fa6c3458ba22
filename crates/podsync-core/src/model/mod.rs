//! Document model: tracks, playlists and the database aggregate.

mod document;
mod playlist;
mod track;

pub use document::Document;
pub use playlist::{Playlist, PlaylistEntry};
pub use track::{MediaType, Track, TrackStatus};
