//! Metadata scan cache.
//!
//! Remembers, per source file path, the metadata extracted from it and its
//! content fingerprint. The duplicate resolver reads the cache when a
//! candidate file can no longer be opened; the sync engine records every file
//! it copies.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::fs::{atomic_write, read_error};
use crate::identity::{Fingerprint, normalize_path};
use crate::metadata::TrackMetadata;

/// File name of the JSON cache inside its directory.
pub const SCAN_CACHE_FILE: &str = "scan_cache.json";

/// Path-keyed store of scanned file metadata.
#[cfg_attr(test, mockall::automock)]
pub trait ScanCache: Send + Sync {
    /// Metadata recorded for `path`.
    fn lookup_by_path(&self, path: &Path) -> Option<TrackMetadata>;

    /// Fingerprint recorded for `path`.
    fn fingerprint(&self, path: &Path) -> Option<Fingerprint>;

    /// Record metadata and fingerprint for `path`, replacing any entry.
    fn upsert(&self, path: &Path, metadata: &TrackMetadata, fingerprint: &Fingerprint)
    -> Result<()>;

    /// Every recorded path.
    fn all_paths(&self) -> Vec<PathBuf>;
}

/// One cached file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanEntry {
    /// Path as given when recorded.
    pub path: PathBuf,
    /// Extracted metadata.
    pub metadata: TrackMetadata,
    /// Content fingerprint.
    pub fingerprint: Fingerprint,
}

/// Entries keyed by normalized path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ScanIndex {
    entries: HashMap<String, ScanEntry>,
}

impl ScanIndex {
    fn get(&self, path: &Path) -> Option<&ScanEntry> {
        self.entries.get(&normalize_path(path))
    }

    fn insert(&mut self, path: &Path, metadata: &TrackMetadata, fingerprint: &Fingerprint) {
        self.entries.insert(
            normalize_path(path),
            ScanEntry {
                path: path.to_path_buf(),
                metadata: metadata.clone(),
                fingerprint: fingerprint.clone(),
            },
        );
    }

    fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.entries.values().map(|e| e.path.clone()).collect();
        paths.sort();
        paths
    }
}

/// In-memory cache, lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryScanCache {
    index: Mutex<ScanIndex>,
}

impl MemoryScanCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScanCache for MemoryScanCache {
    fn lookup_by_path(&self, path: &Path) -> Option<TrackMetadata> {
        let index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        index.get(path).map(|e| e.metadata.clone())
    }

    fn fingerprint(&self, path: &Path) -> Option<Fingerprint> {
        let index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        index.get(path).map(|e| e.fingerprint.clone())
    }

    fn upsert(&self, path: &Path, metadata: &TrackMetadata, fingerprint: &Fingerprint) -> Result<()> {
        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        index.insert(path, metadata, fingerprint);
        Ok(())
    }

    fn all_paths(&self) -> Vec<PathBuf> {
        let index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        index.paths()
    }
}

/// Cache persisted as a JSON file, rewritten on every upsert.
#[derive(Debug)]
pub struct JsonScanCache {
    path: PathBuf,
    index: Mutex<ScanIndex>,
}

impl JsonScanCache {
    /// Open the cache stored at `path`, starting empty if the file is missing
    /// or unparseable.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let index = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| read_error(&path, e))?;
            match serde_json::from_str(&content) {
                Ok(index) => {
                    debug!("Loaded scan cache from {}", path.display());
                    index
                }
                Err(e) => {
                    warn!("Failed to parse scan cache, starting empty: {}", e);
                    ScanIndex::default()
                }
            }
        } else {
            ScanIndex::default()
        };
        Ok(Self {
            path,
            index: Mutex::new(index),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, index: &ScanIndex) -> Result<()> {
        let content = serde_json::to_string_pretty(index)?;
        atomic_write(&self.path, content.as_bytes())
    }
}

impl ScanCache for JsonScanCache {
    fn lookup_by_path(&self, path: &Path) -> Option<TrackMetadata> {
        let index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        index.get(path).map(|e| e.metadata.clone())
    }

    fn fingerprint(&self, path: &Path) -> Option<Fingerprint> {
        let index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        index.get(path).map(|e| e.fingerprint.clone())
    }

    fn upsert(&self, path: &Path, metadata: &TrackMetadata, fingerprint: &Fingerprint) -> Result<()> {
        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        index.insert(path, metadata, fingerprint);
        self.save(&index)
    }

    fn all_paths(&self) -> Vec<PathBuf> {
        let index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        index.paths()
    }
}
