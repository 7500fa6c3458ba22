//! Content fingerprints and duplicate detection.
//!
//! A fingerprint is a SHA-256 digest over the file size followed by the first
//! 16 KiB of the file. Two files are the same content when their digests and
//! exact sizes match. Hashing a prefix keeps large libraries fast at the cost
//! of missing files that differ only after the first 16 KiB.
//!
//! # Example
//!
//! ```rust,ignore
//! use podsync_core::identity::DuplicateResolver;
//!
//! let mut resolver = DuplicateResolver::new(&layout);
//! if let Some(existing) = resolver.is_duplicate(Path::new("song.mp3"), doc.tracks()) {
//!     println!("Already on the device as track {}", existing.id);
//! }
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::Result;
use crate::fs::read_error;
use crate::layout::DeviceLayout;
use crate::model::{Track, TrackStatus};
use crate::scan_cache::ScanCache;

/// Bytes of file content covered by a fingerprint.
pub const FINGERPRINT_WINDOW: u64 = 16 * 1024;

/// Content fingerprint of a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Hex SHA-256 digest.
    pub digest: String,
    /// Exact file size in bytes.
    pub size: u64,
}

/// Fingerprint the file at `path`. Files shorter than the window are hashed
/// in full.
pub fn fingerprint_file(path: &Path) -> Result<Fingerprint> {
    let file = File::open(path).map_err(|e| read_error(path, e))?;
    let size = file.metadata().map_err(|e| read_error(path, e))?.len();

    let mut prefix = Vec::with_capacity(FINGERPRINT_WINDOW as usize);
    file.take(FINGERPRINT_WINDOW)
        .read_to_end(&mut prefix)
        .map_err(|e| read_error(path, e))?;

    let mut hasher = Sha256::new();
    hasher.update((size as u32).to_le_bytes());
    hasher.update(&prefix);
    Ok(Fingerprint {
        digest: format!("{:x}", hasher.finalize()),
        size,
    })
}

/// Absolute, lexically normalized, lowercased form of a path for
/// case-insensitive comparison.
pub fn normalize_path(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut parts: Vec<String> = Vec::new();
    let mut prefix = String::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(p) => prefix = p.as_os_str().to_string_lossy().to_lowercase(),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                parts.pop();
            }
            Component::Normal(part) => parts.push(part.to_string_lossy().to_lowercase()),
        }
    }
    format!("{prefix}/{}", parts.join("/"))
}

/// Finds an existing track with the same content as a candidate file.
///
/// Fingerprints of existing tracks are computed lazily, only for tracks whose
/// size matches a candidate, and cached for the resolver's lifetime.
pub struct DuplicateResolver<'a> {
    layout: &'a DeviceLayout,
    scan_cache: Option<&'a dyn ScanCache>,
    fingerprints: HashMap<u32, Option<Fingerprint>>,
}

impl<'a> DuplicateResolver<'a> {
    /// Resolver reading on-device files through `layout`.
    pub fn new(layout: &'a DeviceLayout) -> Self {
        Self {
            layout,
            scan_cache: None,
            fingerprints: HashMap::new(),
        }
    }

    /// Consult `cache` for candidates that cannot be read.
    #[must_use]
    pub fn with_scan_cache(mut self, cache: &'a dyn ScanCache) -> Self {
        self.scan_cache = Some(cache);
        self
    }

    /// The track in `existing` holding the same content as `candidate`, if any.
    ///
    /// When `candidate` cannot be read, falls back to the path each track was
    /// added from (case-insensitive), then to the fingerprint the scan cache
    /// recorded for `candidate`.
    pub fn is_duplicate<'t>(
        &mut self,
        candidate: &Path,
        existing: impl IntoIterator<Item = &'t Track>,
    ) -> Option<&'t Track> {
        let existing: Vec<&Track> = existing.into_iter().collect();

        match fingerprint_file(candidate) {
            Ok(fingerprint) => self.find_by_fingerprint(&fingerprint, &existing),
            Err(e) => {
                debug!(
                    "Cannot fingerprint {} ({}); matching by source path",
                    candidate.display(),
                    e
                );
                let key = normalize_path(candidate);
                if let Some(track) = existing.iter().copied().find(|t| {
                    t.source_path
                        .as_deref()
                        .is_some_and(|p| normalize_path(p) == key)
                }) {
                    return Some(track);
                }
                let cached = self.scan_cache.and_then(|c| c.fingerprint(candidate))?;
                self.find_by_fingerprint(&cached, &existing)
            }
        }
    }

    fn find_by_fingerprint<'t>(
        &mut self,
        fingerprint: &Fingerprint,
        existing: &[&'t Track],
    ) -> Option<&'t Track> {
        existing
            .iter()
            .copied()
            .filter(|t| t.size == fingerprint.size)
            .find(|t| self.track_fingerprint(t).as_ref() == Some(fingerprint))
    }

    /// Fingerprint of a track's file: the on-device copy once finalized, the
    /// source file while pending.
    fn track_fingerprint(&mut self, track: &Track) -> Option<Fingerprint> {
        if let Some(cached) = self.fingerprints.get(&track.id) {
            return cached.clone();
        }
        let path = self.track_file(track);
        let fingerprint = path.and_then(|p| match fingerprint_file(&p) {
            Ok(fp) => Some(fp),
            Err(e) => {
                debug!("Cannot fingerprint track {}: {}", track.id, e);
                None
            }
        });
        self.fingerprints.insert(track.id, fingerprint.clone());
        fingerprint
    }

    fn track_file(&self, track: &Track) -> Option<PathBuf> {
        match track.status {
            TrackStatus::OnDevice => track
                .location
                .as_deref()
                .map(|l| self.layout.location_to_path(l)),
            TrackStatus::Pending => track.source_path.clone(),
        }
    }
}
