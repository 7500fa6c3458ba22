//! Command implementations.
//!
//! Each command opens its own [`Session`], applies its edits and commits
//! through the sync engine so removed files are deleted only after the
//! database is written.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use podsync_core::{
    ExportOptions, Id3Extractor, ItemOutcome, JsonScanCache, PlaylistError, PodsyncConfig, Result,
    Session, SyncEngine, SyncEvent, SyncPhase, SyncSummary, SyncWorker, Track, album_tracks,
    albums, artists, check_integrity, export_library, genres, remove_orphans, storage_info,
};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Shared inputs of every command.
#[derive(Debug)]
pub struct Context {
    /// Device mountpoint.
    pub mountpoint: PathBuf,
    /// Loaded configuration.
    pub config: PodsyncConfig,
    /// Print listings as JSON.
    pub json: bool,
}

impl Context {
    fn open(&self) -> Result<Session> {
        Session::open(&self.mountpoint)
    }

    fn engine(&self) -> SyncEngine {
        match JsonScanCache::open(&self.config.scan_cache_path) {
            Ok(cache) => SyncEngine::new().with_scan_cache(Arc::new(cache)),
            Err(e) => {
                warn!("Scan cache unavailable, continuing without it: {}", e);
                SyncEngine::new()
            }
        }
    }

    fn print<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human(value);
        }
        Ok(())
    }
}

// =============================================================================
// Device
// =============================================================================

/// Write an empty database to a device that has none.
pub fn init(ctx: &Context, name: &str) -> Result<()> {
    let session =
        Session::initialize_with_buckets(&ctx.mountpoint, name, ctx.config.bucket_count)?;
    println!(
        "Database ready at {} ({} tracks)",
        session.mountpoint().display(),
        session.document().track_count()
    );
    Ok(())
}

#[derive(Serialize)]
struct InfoReport {
    device: podsync_core::DeviceInfo,
    storage: podsync_core::StorageInfo,
    database_version: u32,
    tracks: usize,
    playlists: usize,
}

/// Print the device model, storage and database summary.
pub fn info(ctx: &Context) -> Result<()> {
    let session = ctx.open()?;
    let document = session.document();
    let report = InfoReport {
        device: session.device_info(),
        storage: storage_info(&ctx.mountpoint),
        database_version: document.version(),
        tracks: document.track_count(),
        playlists: document.playlists().len(),
    };
    ctx.print(&report, |r| {
        println!("Model:     {} ({})", r.device.model_name, r.device.generation);
        if let Some(ref serial) = r.device.serial_number {
            println!("Serial:    {serial}");
        }
        println!(
            "Storage:   {} of {} used ({:.1}%)",
            format_bytes(r.storage.used_bytes()),
            format_bytes(r.storage.total_bytes),
            r.storage.usage_percentage()
        );
        println!("Database:  version {:#x}", r.database_version);
        println!("Tracks:    {}", r.tracks);
        println!("Playlists: {}", r.playlists);
    })
}

// =============================================================================
// Listings
// =============================================================================

/// List every track.
pub fn tracks(ctx: &Context) -> Result<()> {
    let session = ctx.open()?;
    let document = session.document();
    let tracks: Vec<&Track> = document.tracks().collect();
    ctx.print(&tracks, |tracks| {
        for track in tracks {
            print_track(track);
        }
    })
}

/// List playlists with their sizes.
pub fn playlists(ctx: &Context) -> Result<()> {
    let session = ctx.open()?;
    let document = session.document();
    ctx.print(&document.playlists(), |playlists| {
        for playlist in *playlists {
            let marker = if playlist.is_master {
                " (master)"
            } else if playlist.is_podcast {
                " (podcasts)"
            } else {
                ""
            };
            println!("{:>20}  {}{}  [{} tracks]", playlist.id, playlist.name, marker, playlist.len());
        }
    })
}

/// Print the tracks of one playlist in order.
pub fn show_playlist(ctx: &Context, id: u64) -> Result<()> {
    let session = ctx.open()?;
    let document = session.document();
    let playlist = document
        .playlist(id)
        .ok_or(PlaylistError::NotFound { id })?;
    let tracks: Vec<&Track> = playlist
        .track_ids()
        .into_iter()
        .filter_map(|track_id| document.track(track_id))
        .collect();
    ctx.print(&tracks, |tracks| {
        println!("{}", playlist.name);
        for track in tracks {
            print_track(track);
        }
    })
}

/// What to group the library by.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum BrowseBy {
    /// Albums with their artist.
    Albums,
    /// Artists with album and track counts.
    Artists,
    /// Genres with track counts.
    Genres,
}

/// Print the library grouped by album, artist or genre.
pub fn browse(ctx: &Context, by: BrowseBy) -> Result<()> {
    let session = ctx.open()?;
    let document = session.document();
    match by {
        BrowseBy::Albums => ctx.print(&albums(&document), |albums| {
            for album in albums {
                println!("{} - {}  [{} tracks]", album.artist, album.name, album.track_count);
            }
        }),
        BrowseBy::Artists => ctx.print(&artists(&document), |artists| {
            for artist in artists {
                println!(
                    "{}  [{} albums, {} tracks]",
                    artist.name, artist.album_count, artist.track_count
                );
            }
        }),
        BrowseBy::Genres => ctx.print(&genres(&document), |genres| {
            for genre in genres {
                println!("{}  [{} tracks]", genre.name, genre.track_count);
            }
        }),
    }
}

/// Print the tracks of one album in disc and track order.
pub fn album(ctx: &Context, name: &str, artist: Option<&str>) -> Result<()> {
    let session = ctx.open()?;
    let document = session.document();
    let tracks = album_tracks(&document, name, artist);
    ctx.print(&tracks, |tracks| {
        for track in tracks {
            print_track(track);
        }
    })
}

// =============================================================================
// Edits
// =============================================================================

/// Queue local files and sync them, optionally appending them to a playlist.
pub async fn add(ctx: &Context, files: &[PathBuf], playlist: Option<u64>) -> Result<()> {
    let session = ctx.open()?;
    let extractor = Id3Extractor::new();

    let mut queued = Vec::with_capacity(files.len());
    for file in files {
        match session.add_track_from_file(file, &extractor) {
            Ok(track) => {
                debug!("Queued {} as track {}", file.display(), track.id);
                queued.push(track.id);
            }
            Err(e) => {
                warn!("Skipping {}: {}", file.display(), e);
                eprintln!("skipped {}: {e}", file.display());
            }
        }
    }
    if let Some(playlist_id) = playlist {
        session.add_tracks_to_playlist(playlist_id, &queued)?;
    }

    info!("Queued {} of {} files", queued.len(), files.len());
    sync(ctx, &session).await.map(|_| ())
}

/// Remove tracks and delete their files.
pub async fn remove(ctx: &Context, ids: &[u32]) -> Result<()> {
    let session = ctx.open()?;
    let removed = session.remove_tracks(ids)?;
    println!("Removed {removed} tracks");
    sync(ctx, &session).await.map(|_| ())
}

/// Set a track's rating in stars.
pub async fn rate(ctx: &Context, id: u32, stars: u8) -> Result<()> {
    let session = ctx.open()?;
    session.set_rating(id, stars)?;
    sync(ctx, &session).await.map(|_| ())
}

/// Playlist edits.
#[derive(Debug, Clone)]
pub enum PlaylistEdit {
    /// Create a playlist.
    Create(String),
    /// Rename a playlist.
    Rename(u64, String),
    /// Delete a playlist.
    Delete(u64),
    /// Append tracks.
    Add(u64, Vec<u32>),
    /// Remove the first occurrence of a track.
    Remove(u64, u32),
}

/// Apply one playlist edit and commit it.
pub async fn edit_playlist(ctx: &Context, edit: PlaylistEdit) -> Result<()> {
    let session = ctx.open()?;
    match edit {
        PlaylistEdit::Create(name) => {
            let playlist = session.create_playlist(&name)?;
            println!("Created playlist {} ({})", playlist.name, playlist.id);
        }
        PlaylistEdit::Rename(id, name) => session.rename_playlist(id, &name)?,
        PlaylistEdit::Delete(id) => session.delete_playlist(id)?,
        PlaylistEdit::Add(id, tracks) => session.add_tracks_to_playlist(id, &tracks)?,
        PlaylistEdit::Remove(id, track) => session.remove_track_from_playlist(id, track)?,
    }
    sync(ctx, &session).await.map(|_| ())
}

// =============================================================================
// Sync
// =============================================================================

/// Run a sync in the background, rendering progress and cancelling on
/// Ctrl-C.
async fn sync(ctx: &Context, session: &Session) -> Result<SyncSummary> {
    let (worker, mut events) =
        SyncWorker::spawn(ctx.engine(), session.clone(), ctx.config.sync_options());
    let mut cancelling = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SyncEvent::Progress(progress)) => {
                    if progress.phase == SyncPhase::Copying {
                        if let Some(ref name) = progress.current_item_name {
                            eprintln!(
                                "[{}/{}] {name} ({:.0}%)",
                                progress.current_index,
                                progress.total_count,
                                progress.percent()
                            );
                        }
                    } else {
                        debug!("{}: {}", progress.phase, progress.message);
                    }
                }
                Some(SyncEvent::Finished(summary)) => println!("{}", summary.summary()),
                Some(SyncEvent::Failed { message, .. }) => eprintln!("Sync failed: {message}"),
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancelling => {
                warn!("Interrupted; stopping after the current file");
                worker.cancel();
                cancelling = true;
            }
        }
    }

    let summary = worker.join().await?;
    for item in &summary.items {
        if let ItemOutcome::Errored { ref reason } = item.outcome {
            eprintln!("  {}: {reason}", item.source.display());
        }
    }
    summary.into_result()
}

// =============================================================================
// Export and checks
// =============================================================================

/// Copy the device library into `destination` as Artist/Album/Title files.
pub fn export(ctx: &Context, destination: &Path) -> Result<()> {
    let session = ctx.open()?;
    let document = session.document();
    let options = ExportOptions {
        copy: ctx.config.copy_options(),
        cancel: None,
    };
    let summary = export_library(&ctx.mountpoint, &document, destination, &options, |p| {
        debug!(
            "Exporting {}/{}: {}",
            p.current_index,
            p.total_count,
            p.current_item_name
        );
    })?;
    ctx.print(&summary, |s| println!("{}", s.summary()))
}

/// Compare the database with the files on the device.
///
/// Returns whether the device is consistent once `fix` has been applied.
pub fn check(ctx: &Context, fix: bool) -> Result<bool> {
    let session = ctx.open()?;
    let report = check_integrity(&ctx.mountpoint, &session.document())?;
    ctx.print(&report, |r| {
        for issue in &r.issues {
            println!("{issue}");
        }
        println!("{}", r.summary());
    })?;

    if fix && report.orphans > 0 {
        let removed = remove_orphans(&report)?;
        println!("Removed {removed} orphaned files");
    }
    let unfixable = report.missing + report.size_mismatches + report.duplicates;
    Ok(unfixable == 0 && (fix || report.orphans == 0))
}

// =============================================================================
// Formatting
// =============================================================================

fn print_track(track: &Track) {
    println!(
        "{:>6}  {}  {} - {}  [{}]",
        track.id,
        stars(track.rating),
        track.artist.as_deref().unwrap_or("Unknown Artist"),
        track.display_title(),
        track.album.as_deref().unwrap_or("")
    );
}

fn stars(rating: u8) -> String {
    let filled = usize::from(rating.min(5));
    format!("{}{}", "*".repeat(filled), ".".repeat(5 - filled))
}

/// Format bytes into a human-readable string.
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stars() {
        assert_eq!(stars(0), ".....");
        assert_eq!(stars(3), "***..");
        assert_eq!(stars(9), "*****");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.00 GB");
    }
}
