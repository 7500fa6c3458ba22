//! Copy tracks off the device into a browsable folder tree.
//!
//! Each on-device track lands at `dest/Artist/Album/Title.ext`. A file that
//! already exists there with the same size is taken to be the same track and
//! skipped; a different file at that name gets a numbered suffix instead.
//!
//! # Example
//!
//! ```rust,ignore
//! use podsync_core::export::{ExportOptions, export_library};
//!
//! let summary = session.with_document(|doc| {
//!     export_library(&session.mountpoint(), doc, Path::new("/tmp/music"), &ExportOptions::default(), |p| {
//!         println!("{}/{} {}", p.current_index, p.total_count, p.current_item_name);
//!     })
//! })?;
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::browse::{UNKNOWN_ALBUM, UNKNOWN_ARTIST};
use crate::error::{Error, FileSystemError, Result};
use crate::fs::ensure_dir;
use crate::layout::DeviceLayout;
use crate::model::{Document, Track};
use crate::transfer::{CopyOptions, copy_file};

/// Longest file or directory name produced, in characters.
pub const MAX_NAME_LEN: usize = 200;

static INVALID_CHARS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).ok());

/// Make `name` safe as a single path component on FAT and NTFS volumes.
///
/// Reserved characters become `_`, surrounding whitespace and dots are
/// trimmed, and the result is cut to [`MAX_NAME_LEN`] characters. An empty
/// result becomes "Unknown".
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let replaced = match INVALID_CHARS.as_ref() {
        Some(re) => re.replace_all(name, "_").into_owned(),
        None => name.to_string(),
    };
    let trimmed = replaced.trim().trim_matches('.').trim();
    let limited: String = trimmed.chars().take(MAX_NAME_LEN).collect();
    let limited = limited.trim_end();
    if limited.is_empty() {
        "Unknown".to_string()
    } else {
        limited.to_string()
    }
}

// =============================================================================
// Options and reports
// =============================================================================

/// Export settings.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// How each file is copied.
    pub copy: CopyOptions,
    /// Stops the export before the next file when set.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl ExportOptions {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

/// Progress of an export, reported after each track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportProgress {
    /// Tracks handled so far.
    pub current_index: usize,
    /// Tracks to export.
    pub total_count: usize,
    /// Title of the track just handled.
    pub current_item_name: String,
    /// Bytes written so far.
    pub bytes_exported: u64,
}

/// What happened to one track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportOutcome {
    /// Copied to `path`.
    Exported {
        /// Destination file.
        path: PathBuf,
        /// Bytes written.
        bytes: u64,
    },
    /// An identical file already existed at `path`.
    Skipped {
        /// Existing file.
        path: PathBuf,
    },
    /// The copy failed.
    Errored {
        /// Why.
        reason: String,
    },
}

/// Outcome for one track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportItem {
    /// Track ID.
    pub track_id: u32,
    /// What happened.
    pub outcome: ExportOutcome,
}

/// Result of an export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportSummary {
    /// Tracks copied.
    pub exported: usize,
    /// Tracks already present.
    pub skipped: usize,
    /// Tracks that failed.
    pub errors: usize,
    /// Bytes written.
    pub bytes_exported: u64,
    /// Whether the export stopped early.
    pub was_cancelled: bool,
    /// Per-track outcomes.
    pub items: Vec<ExportItem>,
    /// Duration in seconds.
    pub duration_secs: f64,
}

impl ExportSummary {
    fn record(&mut self, track_id: u32, outcome: ExportOutcome) {
        match &outcome {
            ExportOutcome::Exported { bytes, .. } => {
                self.exported += 1;
                self.bytes_exported += bytes;
            }
            ExportOutcome::Skipped { .. } => self.skipped += 1,
            ExportOutcome::Errored { .. } => self.errors += 1,
        }
        self.items.push(ExportItem { track_id, outcome });
    }

    /// Get a one-line summary of the export.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Export {}: {} exported, {} skipped, {} failed ({} bytes) in {:.2}s",
            if self.was_cancelled { "cancelled" } else { "completed" },
            self.exported,
            self.skipped,
            self.errors,
            self.bytes_exported,
            self.duration_secs
        )
    }
}

// =============================================================================
// Export
// =============================================================================

/// Export every on-device track of `document`.
pub fn export_library<F>(
    mountpoint: &Path,
    document: &Document,
    destination: &Path,
    options: &ExportOptions,
    on_progress: F,
) -> Result<ExportSummary>
where
    F: FnMut(&ExportProgress),
{
    let tracks: Vec<&Track> = document.tracks().filter(|t| t.is_on_device()).collect();
    export_tracks(mountpoint, &tracks, destination, options, on_progress)
}

/// Export `tracks` from the device mounted at `mountpoint` into `destination`.
///
/// Per-track failures are recorded in the summary. Fails only when
/// `destination` cannot be created.
pub fn export_tracks<F>(
    mountpoint: &Path,
    tracks: &[&Track],
    destination: &Path,
    options: &ExportOptions,
    mut on_progress: F,
) -> Result<ExportSummary>
where
    F: FnMut(&ExportProgress),
{
    options.copy.validate()?;
    ensure_dir(destination)?;

    let start = Instant::now();
    let layout = DeviceLayout::new(mountpoint);
    let mut summary = ExportSummary::default();
    let mut claimed: HashSet<PathBuf> = HashSet::new();
    info!(
        "Exporting {} track(s) to {}",
        tracks.len(),
        destination.display()
    );

    for (index, track) in tracks.iter().enumerate() {
        if options.is_cancelled() {
            info!("Export cancelled after {} track(s)", index);
            summary.was_cancelled = true;
            break;
        }

        let outcome = match export_track(&layout, track, destination, &mut claimed, &options.copy) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Failed to export track {}: {}", track.id, e);
                ExportOutcome::Errored {
                    reason: e.to_string(),
                }
            }
        };
        summary.record(track.id, outcome);

        on_progress(&ExportProgress {
            current_index: index + 1,
            total_count: tracks.len(),
            current_item_name: track.display_title(),
            bytes_exported: summary.bytes_exported,
        });
    }

    summary.duration_secs = start.elapsed().as_secs_f64();
    info!("{}", summary.summary());
    Ok(summary)
}

fn export_track(
    layout: &DeviceLayout,
    track: &Track,
    destination: &Path,
    claimed: &mut HashSet<PathBuf>,
    options: &CopyOptions,
) -> Result<ExportOutcome> {
    let location = track.location.as_deref().ok_or_else(|| {
        Error::FileSystem(FileSystemError::InvalidPath {
            path: PathBuf::new(),
            reason: format!("track {} has no location", track.id),
        })
    })?;
    let source = layout.location_to_path(location);
    let size = fs::metadata(&source)
        .map_err(|_| {
            Error::FileSystem(FileSystemError::NotFound {
                path: source.clone(),
            })
        })?
        .len();

    let artist = track
        .album_artist
        .as_deref()
        .or(track.artist.as_deref())
        .unwrap_or(UNKNOWN_ARTIST);
    let album = track.album.as_deref().unwrap_or(UNKNOWN_ALBUM);
    let dir = destination
        .join(sanitize_filename(artist))
        .join(sanitize_filename(album));
    let stem = sanitize_filename(&track.display_title());
    let ext = track.extension().unwrap_or_else(|| "mp3".to_string());

    let mut suffix = 0;
    let target = loop {
        let name = if suffix == 0 {
            format!("{stem}.{ext}")
        } else {
            format!("{stem} ({suffix}).{ext}")
        };
        let candidate = dir.join(name);
        suffix += 1;

        if claimed.contains(&candidate) {
            continue;
        }
        match fs::metadata(&candidate) {
            Ok(existing) if existing.len() == size => {
                debug!("Already exported: {}", candidate.display());
                claimed.insert(candidate.clone());
                return Ok(ExportOutcome::Skipped { path: candidate });
            }
            Ok(_) => {}
            Err(_) => break candidate,
        }
    };

    let copied = copy_file(&source, &target, options)?;
    claimed.insert(target.clone());
    debug!("Exported {} -> {}", location, target.display());
    Ok(ExportOutcome::Exported {
        path: target,
        bytes: copied.bytes,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn device_track(mount: &Path, id: u32, title: &str, content: &[u8]) -> Track {
        let mut track = Track::empty(id);
        track.title = Some(title.to_string());
        track.artist = Some("AC/DC".to_string());
        track.album = Some("Live: 1992".to_string());
        let location = format!(":iPod_Control:Music:F00:PD{id:06X}.mp3");
        let path = DeviceLayout::new(mount).location_to_path(&location);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        track.location = Some(location);
        track.size = content.len() as u64;
        track
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("AC/DC"), "AC_DC");
        assert_eq!(sanitize_filename(r#"a<b>c:d"e\f|g?h*"#), "a_b_c_d_e_f_g_h_");
        assert_eq!(sanitize_filename("  .hidden.  "), "hidden");
        assert_eq!(sanitize_filename("   "), "Unknown");
        assert_eq!(sanitize_filename(&"x".repeat(300)).chars().count(), MAX_NAME_LEN);
        assert_eq!(sanitize_filename("Björk"), "Björk");
    }

    #[test]
    fn test_export_layout_and_skip() {
        let mount = TempDir::new().expect("temp dir");
        let dest = TempDir::new().expect("temp dir");
        let track = device_track(mount.path(), 1, "Song?", b"audio");

        let mut progress = Vec::new();
        let summary = export_tracks(
            mount.path(),
            &[&track],
            dest.path(),
            &ExportOptions::default(),
            |p| progress.push(p.clone()),
        )
        .unwrap();

        let expected = dest.path().join("AC_DC").join("Live_ 1992").join("Song_.mp3");
        assert_eq!(summary.exported, 1);
        assert_eq!(fs::read(&expected).unwrap(), b"audio");
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].total_count, 1);

        let again = export_tracks(
            mount.path(),
            &[&track],
            dest.path(),
            &ExportOptions::default(),
            |_| {},
        )
        .unwrap();
        assert_eq!(again.skipped, 1);
        assert_eq!(again.exported, 0);
    }

    #[test]
    fn test_name_clash_gets_suffix() {
        let mount = TempDir::new().expect("temp dir");
        let dest = TempDir::new().expect("temp dir");
        let a = device_track(mount.path(), 1, "Intro", b"first");
        let b = device_track(mount.path(), 2, "Intro", b"other");

        let summary = export_tracks(
            mount.path(),
            &[&a, &b],
            dest.path(),
            &ExportOptions::default(),
            |_| {},
        )
        .unwrap();

        let dir = dest.path().join("AC_DC").join("Live_ 1992");
        assert_eq!(summary.exported, 2);
        assert_eq!(fs::read(dir.join("Intro.mp3")).unwrap(), b"first");
        assert_eq!(fs::read(dir.join("Intro (1).mp3")).unwrap(), b"other");
    }

    #[test]
    fn test_missing_file_recorded_and_cancel() {
        let mount = TempDir::new().expect("temp dir");
        let dest = TempDir::new().expect("temp dir");
        let good = device_track(mount.path(), 1, "Good", b"ok");
        let mut gone = device_track(mount.path(), 2, "Gone", b"x");
        gone.location = Some(":iPod_Control:Music:F00:MISSING.mp3".to_string());

        let summary = export_tracks(
            mount.path(),
            &[&gone, &good],
            dest.path(),
            &ExportOptions::default(),
            |_| {},
        )
        .unwrap();
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.exported, 1);

        let cancel = Arc::new(AtomicBool::new(true));
        let options = ExportOptions {
            cancel: Some(cancel),
            ..ExportOptions::default()
        };
        let cancelled = export_tracks(mount.path(), &[&good], dest.path(), &options, |_| {}).unwrap();
        assert!(cancelled.was_cancelled);
        assert!(cancelled.items.is_empty());
    }
}
