//! Paths on a mounted iPod.
//!
//! ```text
//! <mount>/iPod_Control/
//!     iTunes/iTunesDB
//!     iTunes/Play Counts
//!     Device/SysInfo
//!     Device/SysInfoExtended
//!     Music/F00 .. F19/      hashed buckets holding the media files
//! ```
//!
//! Track records refer to their files with colon-separated paths relative to
//! the mountpoint, e.g. `:iPod_Control:Music:F07:PD000007.mp3`.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{DatabaseError, Result};

/// Buckets created on a device that has none.
pub const DEFAULT_BUCKET_COUNT: u32 = 20;

const CONTROL_DIR: &str = "iPod_Control";

/// Resolves the fixed paths of one mounted device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLayout {
    mountpoint: PathBuf,
}

impl DeviceLayout {
    /// Layout for a device mounted at `mountpoint`. Does not touch the disk.
    pub fn new(mountpoint: impl Into<PathBuf>) -> Self {
        Self {
            mountpoint: mountpoint.into(),
        }
    }

    /// Check that `mountpoint` has an `iPod_Control` directory.
    pub fn validate(&self) -> Result<()> {
        if self.control_dir().is_dir() {
            Ok(())
        } else {
            Err(DatabaseError::NotAnIpod {
                mountpoint: self.mountpoint.clone(),
            }
            .into())
        }
    }

    /// Mountpoint of the device.
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// `iPod_Control`.
    pub fn control_dir(&self) -> PathBuf {
        self.mountpoint.join(CONTROL_DIR)
    }

    /// `iPod_Control/iTunes`.
    pub fn itunes_dir(&self) -> PathBuf {
        self.control_dir().join("iTunes")
    }

    /// `iPod_Control/iTunes/iTunesDB`.
    pub fn database_path(&self) -> PathBuf {
        self.itunes_dir().join("iTunesDB")
    }

    /// `iPod_Control/iTunes/Play Counts`.
    pub fn play_counts_path(&self) -> PathBuf {
        self.itunes_dir().join("Play Counts")
    }

    /// `iPod_Control/Device`.
    pub fn device_dir(&self) -> PathBuf {
        self.control_dir().join("Device")
    }

    /// `iPod_Control/Device/SysInfo`.
    pub fn sysinfo_path(&self) -> PathBuf {
        self.device_dir().join("SysInfo")
    }

    /// `iPod_Control/Device/SysInfoExtended`.
    pub fn sysinfo_extended_path(&self) -> PathBuf {
        self.device_dir().join("SysInfoExtended")
    }

    /// `iPod_Control/Music`.
    pub fn music_dir(&self) -> PathBuf {
        self.control_dir().join("Music")
    }

    /// Number of `Fnn` bucket directories on the device, or `default` if none.
    pub fn bucket_count(&self, default: u32) -> u32 {
        let Ok(entries) = fs::read_dir(self.music_dir()) else {
            return default.max(1);
        };
        let count = entries
            .filter_map(std::result::Result::ok)
            .filter(|e| e.path().is_dir())
            .filter(|e| is_bucket_name(&e.file_name().to_string_lossy()))
            .count() as u32;
        if count == 0 { default.max(1) } else { count }
    }

    /// Convert a colon path from a track record to a filesystem path.
    pub fn location_to_path(&self, location: &str) -> PathBuf {
        let mut path = self.mountpoint.clone();
        for part in location.split(':').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path
    }

    /// Convert a filesystem path under the mountpoint to a colon path.
    pub fn path_to_location(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.mountpoint).ok()?;
        let mut location = String::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    location.push(':');
                    location.push_str(&part.to_string_lossy());
                }
                Component::CurDir => {}
                _ => return None,
            }
        }
        (!location.is_empty()).then_some(location)
    }

    /// Provisional location for a new track: `:iPod_Control:Music:Fnn:PDxxxxxx.ext`.
    ///
    /// The bucket is the track ID modulo `buckets`. If a file already sits at
    /// that name on disk, numbered suffixes are tried.
    pub fn allocate_location(&self, track_id: u32, extension: &str, buckets: u32) -> String {
        self.allocate_unique_location(track_id, extension, buckets, |_| false)
    }

    /// Like [`allocate_location`](Self::allocate_location), also skipping
    /// names for which `taken` returns true.
    pub fn allocate_unique_location(
        &self,
        track_id: u32,
        extension: &str,
        buckets: u32,
        taken: impl Fn(&str) -> bool,
    ) -> String {
        let bucket = track_id % buckets.max(1);
        let ext = if extension.is_empty() {
            "mp3".to_string()
        } else {
            extension.to_ascii_lowercase()
        };
        let base = format!(":{CONTROL_DIR}:Music:F{bucket:02}:PD{track_id:06X}");

        let mut location = format!("{base}.{ext}");
        let mut suffix = 1;
        while taken(&location) || self.location_to_path(&location).exists() {
            location = format!("{base}_{suffix}.{ext}");
            suffix += 1;
        }
        location
    }
}

fn is_bucket_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() == 3
        && bytes[0].eq_ignore_ascii_case(&b'f')
        && bytes[1].is_ascii_digit()
        && bytes[2].is_ascii_digit()
}
