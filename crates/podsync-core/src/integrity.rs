//! Device consistency check.
//!
//! Compares the tracks in a document with the files under
//! `iPod_Control/Music`:
//! - tracks whose backing file is missing or has the wrong size
//! - files no track references (orphans), e.g. copies left by a failed commit
//! - locations shared by more than one track
//!
//! Device filesystems are case-insensitive, so locations are compared
//! case-insensitively.
//!
//! # Example
//!
//! ```rust,ignore
//! use podsync_core::integrity::check_integrity;
//!
//! let report = session.with_document(|doc| check_integrity(&session.mountpoint(), doc))?;
//! println!("{}", report.summary());
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::Result;
use crate::fs::{read_error, remove_file_if_exists};
use crate::layout::DeviceLayout;
use crate::model::Document;

// =============================================================================
// Issues
// =============================================================================

/// One inconsistency between the database and the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrityIssue {
    /// A track's backing file does not exist.
    MissingFile {
        /// Track ID.
        track_id: u32,
        /// Location recorded in the database.
        location: String,
    },
    /// A track's backing file differs in size from the record.
    SizeMismatch {
        /// Track ID.
        track_id: u32,
        /// Location recorded in the database.
        location: String,
        /// Size in the database.
        expected: u64,
        /// Size on disk.
        actual: u64,
    },
    /// A file under the music directory that no track references.
    Orphan {
        /// Filesystem path.
        path: PathBuf,
        /// Size in bytes.
        size: u64,
    },
    /// Several tracks recorded with the same location.
    DuplicatePath {
        /// Shared location.
        location: String,
        /// Tracks using it.
        track_ids: Vec<u32>,
    },
}

impl std::fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingFile { track_id, location } => {
                write!(f, "track {track_id}: missing file {location}")
            }
            Self::SizeMismatch {
                track_id,
                location,
                expected,
                actual,
            } => write!(
                f,
                "track {track_id}: {location} is {actual} bytes, expected {expected}"
            ),
            Self::Orphan { path, size } => {
                write!(f, "orphan file {} ({size} bytes)", path.display())
            }
            Self::DuplicatePath {
                location,
                track_ids,
            } => write!(f, "{location} shared by tracks {track_ids:?}"),
        }
    }
}

// =============================================================================
// Report
// =============================================================================

/// Result of [`check_integrity`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// On-device tracks checked.
    pub tracks_checked: usize,
    /// Files found under the music directory.
    pub files_scanned: usize,
    /// Tracks without a backing file.
    pub missing: usize,
    /// Tracks whose file has the wrong size.
    pub size_mismatches: usize,
    /// Unreferenced files.
    pub orphans: usize,
    /// Bytes held by unreferenced files.
    pub orphan_bytes: u64,
    /// Locations used by more than one track.
    pub duplicates: usize,
    /// Every issue found.
    pub issues: Vec<IntegrityIssue>,
    /// Duration of the check in seconds.
    pub duration_secs: f64,
}

impl IntegrityReport {
    fn push(&mut self, issue: IntegrityIssue) {
        match &issue {
            IntegrityIssue::MissingFile { .. } => self.missing += 1,
            IntegrityIssue::SizeMismatch { .. } => self.size_mismatches += 1,
            IntegrityIssue::Orphan { size, .. } => {
                self.orphans += 1;
                self.orphan_bytes += size;
            }
            IntegrityIssue::DuplicatePath { .. } => self.duplicates += 1,
        }
        self.issues.push(issue);
    }

    /// Whether nothing was found.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Paths of unreferenced files.
    pub fn orphan_paths(&self) -> impl Iterator<Item = &Path> {
        self.issues.iter().filter_map(|issue| match issue {
            IntegrityIssue::Orphan { path, .. } => Some(path.as_path()),
            _ => None,
        })
    }

    /// Get a one-line summary of the check.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_clean() {
            format!(
                "Device consistent: {} tracks, {} files",
                self.tracks_checked, self.files_scanned
            )
        } else {
            format!(
                "{} issue(s): {} missing, {} size mismatch(es), {} orphan(s) ({} bytes), {} shared path(s)",
                self.issues.len(),
                self.missing,
                self.size_mismatches,
                self.orphans,
                self.orphan_bytes,
                self.duplicates
            )
        }
    }
}

// =============================================================================
// Check
// =============================================================================

/// Check `document` against the device mounted at `mountpoint`.
///
/// Pending tracks are ignored; their locations are provisional.
///
/// # Errors
///
/// Only fails when a file's metadata cannot be read. A missing music
/// directory reports every on-device track as missing.
pub fn check_integrity(mountpoint: &Path, document: &Document) -> Result<IntegrityReport> {
    let start = Instant::now();
    let layout = DeviceLayout::new(mountpoint);
    let mut report = IntegrityReport::default();

    let mut referenced: BTreeMap<String, Vec<u32>> = BTreeMap::new();
    for track in document.tracks().filter(|t| t.is_on_device()) {
        report.tracks_checked += 1;
        let Some(location) = track.location.as_deref() else {
            report.push(IntegrityIssue::MissingFile {
                track_id: track.id,
                location: String::new(),
            });
            continue;
        };
        referenced
            .entry(location.to_lowercase())
            .or_default()
            .push(track.id);

        let path = layout.location_to_path(location);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {
                if track.size != 0 && meta.len() != track.size {
                    report.push(IntegrityIssue::SizeMismatch {
                        track_id: track.id,
                        location: location.to_string(),
                        expected: track.size,
                        actual: meta.len(),
                    });
                }
            }
            _ => report.push(IntegrityIssue::MissingFile {
                track_id: track.id,
                location: location.to_string(),
            }),
        }
    }

    for (location, track_ids) in &referenced {
        if track_ids.len() > 1 {
            let shown = document
                .track(track_ids[0])
                .and_then(|t| t.location.clone())
                .unwrap_or_else(|| location.clone());
            report.push(IntegrityIssue::DuplicatePath {
                location: shown,
                track_ids: track_ids.clone(),
            });
        }
    }

    // Pending tracks may already have files from an interrupted sync; those
    // are still orphans until committed.
    let known: HashSet<&str> = referenced.keys().map(String::as_str).collect();
    let music_dir = layout.music_dir();
    if music_dir.is_dir() {
        for entry in WalkDir::new(&music_dir).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", music_dir.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || is_hidden(entry.path()) {
                continue;
            }
            report.files_scanned += 1;

            let Some(location) = layout.path_to_location(entry.path()) else {
                continue;
            };
            if known.contains(location.to_lowercase().as_str()) {
                continue;
            }
            let size = entry
                .metadata()
                .map_err(|e| read_error(entry.path(), e.into()))?
                .len();
            debug!("Orphan: {}", entry.path().display());
            report.push(IntegrityIssue::Orphan {
                path: entry.path().to_path_buf(),
                size,
            });
        }
    }

    report.duration_secs = start.elapsed().as_secs_f64();
    info!("Integrity check: {}", report.summary());
    Ok(report)
}

/// Delete the orphan files listed in `report`. Returns how many were removed.
pub fn remove_orphans(report: &IntegrityReport) -> Result<usize> {
    let mut removed = 0;
    for path in report.orphan_paths() {
        if remove_file_if_exists(path)? {
            removed += 1;
        }
    }
    info!("Removed {} orphan file(s)", removed);
    Ok(removed)
}

/// Dot files such as `._PD000001.mp3` written by macOS.
fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}
