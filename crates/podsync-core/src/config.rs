//! Application configuration management.
//!
//! Handles loading and saving the settings that shape a sync: copy
//! verification, bucket layout for fresh devices, cancellation behaviour and
//! where the scan cache lives.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::fs::{atomic_write, read_error};
use crate::layout::DEFAULT_BUCKET_COUNT;
use crate::scan_cache::SCAN_CACHE_FILE;
use crate::sync::SyncOptions;
use crate::transfer::{CopyOptions, DEFAULT_CHUNK_SIZE};

/// Largest bucket count accepted.
pub const MAX_BUCKET_COUNT: u32 = 100;

const fn default_true() -> bool {
    true
}

const fn default_bucket_count() -> u32 {
    DEFAULT_BUCKET_COUNT
}

const fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodsyncConfig {
    /// `Fnn` directories created on a device that has none.
    #[serde(default = "default_bucket_count")]
    pub bucket_count: u32,
    /// Verify every copy with SHA-256.
    #[serde(default = "default_true")]
    pub verify_copies: bool,
    /// Keep source modification times on copied files.
    #[serde(default = "default_true")]
    pub preserve_timestamps: bool,
    /// Copy chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Write the database when a sync is cancelled.
    #[serde(default = "default_true")]
    pub commit_on_cancel: bool,
    /// JSON scan cache file.
    #[serde(default = "default_scan_cache_path")]
    pub scan_cache_path: PathBuf,
}

impl Default for PodsyncConfig {
    fn default() -> Self {
        Self {
            bucket_count: DEFAULT_BUCKET_COUNT,
            verify_copies: true,
            preserve_timestamps: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            commit_on_cancel: true,
            scan_cache_path: default_scan_cache_path(),
        }
    }
}

impl PodsyncConfig {
    /// Load configuration from the platform config directory, or create the
    /// default if not found.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from `path`, writing defaults there if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or
    /// validated.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found, using defaults");
            let config = Self::default();
            if let Err(e) = config.save_to(path) {
                warn!("Failed to save default config: {}", e);
            }
            return Ok(config);
        }

        let content = fs::read_to_string(path).map_err(|e| read_error(path, e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {e}")))?;
        config.validate()?;

        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save configuration to the platform config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        atomic_write(path, content.as_bytes())?;
        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.bucket_count == 0 || self.bucket_count > MAX_BUCKET_COUNT {
            return Err(Error::Configuration(format!(
                "bucket_count must be between 1 and {MAX_BUCKET_COUNT}"
            )));
        }
        self.copy_options().validate()
    }

    /// Copy settings for the transfer layer.
    #[must_use]
    pub const fn copy_options(&self) -> CopyOptions {
        CopyOptions {
            chunk_size: self.chunk_size,
            verify: self.verify_copies,
            preserve_timestamps: self.preserve_timestamps,
        }
    }

    /// Sync settings derived from this configuration.
    #[must_use]
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            copy: self.copy_options(),
            default_bucket_count: self.bucket_count,
            commit_on_cancel: self.commit_on_cancel,
            ..SyncOptions::default()
        }
    }

    /// Get the path to the config file.
    #[must_use]
    pub fn config_file_path() -> PathBuf {
        config_file_path()
    }
}

/// Default location of the JSON scan cache.
#[must_use]
pub fn default_scan_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("podsync")
        .join(SCAN_CACHE_FILE)
}

fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("podsync")
        .join("config.json")
}
