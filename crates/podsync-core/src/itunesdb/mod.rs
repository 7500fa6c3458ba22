//! iTunesDB binary codec.
//!
//! The image is a tree of little-endian records:
//!
//! ```text
//! mhbd                      database header
//!   mhsd type 1             tracks
//!     mhlt                  track list
//!       mhit                track, followed by its mhod strings
//!   mhsd type 2             playlists
//!     mhlp                  playlist list
//!       mhyp                playlist, its mhods and mhip items
//!   mhsd type 3             podcast playlists
//!   mhsd (other)            kept as opaque bytes
//! ```
//!
//! Decoding is eager: every record is parsed into model values up front, and
//! everything the codec does not model is kept byte-for-byte so an untouched
//! image encodes back to exactly the bytes it came from.
//!
//! # Example
//!
//! ```rust,ignore
//! use podsync_core::itunesdb;
//!
//! let doc = itunesdb::read_database(&layout.database_path())?;
//! assert_eq!(itunesdb::encode(&doc)?, std::fs::read(layout.database_path())?);
//! ```

pub(crate) mod bytes;
pub mod convert;
mod database;
mod mhit;
mod mhod;
mod mhyp;
pub mod playcounts;

use std::fs;
use std::path::Path;

use tracing::info;

pub use database::{SUPPORTED_VERSIONS, decode, encode, new_document};
pub(crate) use database::Section;
pub(crate) use mhit::RawTrack;
pub(crate) use mhyp::RawPlaylist;

use crate::error::{DatabaseError, Result};
use crate::fs::{atomic_write, read_error};
use crate::model::Document;

/// Read and decode the database at `path`.
pub fn read_database(path: &Path) -> Result<Document> {
    if !path.is_file() {
        return Err(DatabaseError::Missing {
            path: path.to_path_buf(),
        }
        .into());
    }
    let bytes = fs::read(path).map_err(|e| read_error(path, e))?;
    let doc = decode(&bytes)?;
    info!(
        "Loaded iTunesDB from {} ({} bytes, {} tracks, {} playlists)",
        path.display(),
        bytes.len(),
        doc.track_count(),
        doc.playlists().len()
    );
    Ok(doc)
}

/// Encode `doc` and atomically replace the database at `path`.
///
/// On failure the previous file is left untouched.
pub fn write_database(doc: &Document, path: &Path) -> Result<()> {
    let bytes = encode(doc)?;
    atomic_write(path, &bytes)?;
    info!("Wrote iTunesDB to {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}
