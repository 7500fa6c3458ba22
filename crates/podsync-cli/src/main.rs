//! Podsync - manage and sync the music database of an iPod.
//!
//! Every command works on a mounted device given with `--device`.

mod commands;
mod logging;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use commands::{BrowseBy, Context, PlaylistEdit};
use podsync_core::PodsyncConfig;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "podsync")]
#[command(about = "Manage and sync the music database of an iPod", long_about = None)]
#[command(version)]
struct Cli {
    /// Mountpoint of the device
    #[arg(short, long)]
    device: PathBuf,
    /// Configuration file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print listings as JSON
    #[arg(long)]
    json: bool,
    /// More console logging; repeat for debug output
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Directory for log files
    #[arg(long)]
    log_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an empty database on a device that has none
    Init {
        /// Name shown for the device
        #[arg(default_value = "iPod")]
        name: String,
    },
    /// Show device model, storage and database summary
    Info,
    /// List all tracks
    Tracks,
    /// List all playlists
    Playlists,
    /// Group the library by album, artist or genre
    Browse {
        /// Grouping
        #[arg(value_enum)]
        by: BrowseBy,
    },
    /// List the tracks of one album
    Album {
        /// Album name
        name: String,
        /// Restrict to one album artist
        #[arg(long)]
        artist: Option<String>,
    },
    /// Copy local audio files onto the device
    Add {
        /// Files to add
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Also append them to this playlist
        #[arg(long)]
        playlist: Option<u64>,
    },
    /// Remove tracks and delete their files
    Rm {
        /// Track IDs
        #[arg(required = true)]
        ids: Vec<u32>,
    },
    /// Set a track's rating
    Rate {
        /// Track ID
        id: u32,
        /// Stars, 0 to 5
        #[arg(value_parser = clap::value_parser!(u8).range(0..=5))]
        stars: u8,
    },
    /// Create, edit or show playlists
    Playlist {
        #[command(subcommand)]
        command: PlaylistCommand,
    },
    /// Copy the device library into a folder tree
    Export {
        /// Destination directory
        destination: PathBuf,
    },
    /// Compare the database with the files on the device
    Check {
        /// Delete files no track refers to
        #[arg(long)]
        fix: bool,
    },
}

#[derive(Subcommand)]
enum PlaylistCommand {
    /// Show a playlist's tracks in order
    Show {
        /// Playlist ID
        id: u64,
    },
    /// Create an empty playlist
    Create {
        /// Playlist name
        name: String,
    },
    /// Rename a playlist
    Rename {
        /// Playlist ID
        id: u64,
        /// New name
        name: String,
    },
    /// Delete a playlist (its tracks stay on the device)
    Delete {
        /// Playlist ID
        id: u64,
    },
    /// Append tracks to a playlist
    Add {
        /// Playlist ID
        id: u64,
        /// Track IDs
        #[arg(required = true)]
        tracks: Vec<u32>,
    },
    /// Remove the first occurrence of a track from a playlist
    Remove {
        /// Playlist ID
        id: u64,
        /// Track ID
        track: u32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_config = logging::LoggingConfig::for_verbosity(cli.verbose)
        .with_ansi(std::io::stderr().is_terminal());
    if let Some(dir) = cli.log_dir.clone() {
        log_config = log_config.with_log_directory(dir);
    }
    let _guard = match logging::init(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("warning: file logging disabled: {e}");
            None
        }
    };

    let config = match cli.config.as_deref() {
        Some(path) => PodsyncConfig::load_from(path),
        None => PodsyncConfig::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let ctx = Context {
        mountpoint: cli.device,
        config,
        json: cli.json,
    };
    info!(
        "Using device at {} (log: {})",
        ctx.mountpoint.display(),
        logging::current_log_path(&log_config).display()
    );

    let result = match cli.command {
        Command::Init { name } => commands::init(&ctx, &name),
        Command::Info => commands::info(&ctx),
        Command::Tracks => commands::tracks(&ctx),
        Command::Playlists => commands::playlists(&ctx),
        Command::Browse { by } => commands::browse(&ctx, by),
        Command::Album { name, artist } => commands::album(&ctx, &name, artist.as_deref()),
        Command::Add { files, playlist } => commands::add(&ctx, &files, playlist).await,
        Command::Rm { ids } => commands::remove(&ctx, &ids).await,
        Command::Rate { id, stars } => commands::rate(&ctx, id, stars).await,
        Command::Playlist { command } => match command {
            PlaylistCommand::Show { id } => commands::show_playlist(&ctx, id),
            PlaylistCommand::Create { name } => {
                commands::edit_playlist(&ctx, PlaylistEdit::Create(name)).await
            }
            PlaylistCommand::Rename { id, name } => {
                commands::edit_playlist(&ctx, PlaylistEdit::Rename(id, name)).await
            }
            PlaylistCommand::Delete { id } => {
                commands::edit_playlist(&ctx, PlaylistEdit::Delete(id)).await
            }
            PlaylistCommand::Add { id, tracks } => {
                commands::edit_playlist(&ctx, PlaylistEdit::Add(id, tracks)).await
            }
            PlaylistCommand::Remove { id, track } => {
                commands::edit_playlist(&ctx, PlaylistEdit::Remove(id, track)).await
            }
        },
        Command::Export { destination } => commands::export(&ctx, &destination),
        Command::Check { fix } => match commands::check(&ctx, fix) {
            Ok(true) => Ok(()),
            Ok(false) => return ExitCode::from(2),
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(kind = ?e.kind(), "Command failed: {}", e);
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
