//! Sync planner and executor.
//!
//! A sync turns the pending changes of a [`Session`] into device state:
//!
//! 1. **Planning**: every pending track is checked against the tracks already
//!    on the device (and those accepted earlier in the same plan). Duplicates
//!    are dropped and their playlist references redirected to the existing
//!    track. The free space on the volume is checked against the bytes to copy.
//! 2. **Copying**: files are copied one by one into the hashed `Fnn` buckets.
//!    Each success finalizes its track; a failure drops that track and the run
//!    moves on. Progress is reported after every file and cancellation is
//!    honoured between files.
//! 3. **Committing**: the database is written atomically. Copied files are
//!    never rolled back; a failed commit leaves the previous database intact
//!    and the copies as orphans. Files of removed tracks are deleted only
//!    after a successful commit.
//!
//! The session mutex is held for the whole run.
//!
//! # Example
//!
//! ```rust,ignore
//! use podsync_core::sync::{SyncEngine, SyncOptions};
//!
//! let engine = SyncEngine::new();
//! let summary = engine.run(&session, &SyncOptions::default(), |progress| {
//!     println!("{}: {}/{}", progress.phase, progress.current_index, progress.total_count);
//! })?;
//! println!("{}", summary.summary());
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::device::{SpaceProbe, SystemSpaceProbe};
use crate::error::{Error, ErrorKind, FileSystemError, Result, SyncError};
use crate::fs::remove_file_if_exists;
use crate::identity::{DuplicateResolver, fingerprint_file};
use crate::layout::{DEFAULT_BUCKET_COUNT, DeviceLayout};
use crate::model::Document;
use crate::scan_cache::ScanCache;
use crate::session::{Session, SessionState};
use crate::transfer::{CopyOptions, MAX_CHUNK_SIZE, copy_file};

// =============================================================================
// Sync Phase Definitions
// =============================================================================

/// Current phase of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    /// No sync running.
    Idle,
    /// Resolving duplicates and sizing the work.
    Planning,
    /// Copying files to the device.
    Copying,
    /// Writing the database.
    Committing,
    /// Finished and committed.
    Completed,
    /// Stopped by an unrecoverable error.
    Failed,
    /// Stopped on request between files.
    Cancelled,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Planning => write!(f, "Planning"),
            Self::Copying => write!(f, "Copying"),
            Self::Committing => write!(f, "Committing"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

// =============================================================================
// Sync Options
// =============================================================================

/// Configuration options for a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// How each file is copied.
    pub copy: CopyOptions,
    /// `Fnn` directories to spread files over when the device has none.
    pub default_bucket_count: u32,
    /// Commit the tracks copied so far when the run is cancelled.
    pub commit_on_cancel: bool,
    /// Refuse to start copying when the volume lacks space.
    pub check_free_space: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            copy: CopyOptions::default(),
            default_bucket_count: DEFAULT_BUCKET_COUNT,
            commit_on_cancel: true,
            check_free_space: true,
        }
    }
}

impl SyncOptions {
    /// Create options optimized for speed.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            copy: CopyOptions {
                chunk_size: MAX_CHUNK_SIZE,
                verify: false,
                preserve_timestamps: false,
            },
            ..Self::default()
        }
    }

    /// Create options optimized for reliability.
    #[must_use]
    pub fn reliable() -> Self {
        Self {
            copy: CopyOptions {
                verify: true,
                ..CopyOptions::default()
            },
            ..Self::default()
        }
    }

    /// Set the copy options.
    #[must_use]
    pub const fn with_copy_options(mut self, options: CopyOptions) -> Self {
        self.copy = options;
        self
    }

    /// Set whether a cancelled run commits what it copied.
    #[must_use]
    pub const fn with_commit_on_cancel(mut self, commit: bool) -> Self {
        self.commit_on_cancel = commit;
        self
    }

    /// Set the bucket count used on devices without buckets.
    #[must_use]
    pub const fn with_default_bucket_count(mut self, buckets: u32) -> Self {
        self.default_bucket_count = buckets;
        self
    }
}

// =============================================================================
// Sync Progress
// =============================================================================

/// Progress of a sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Current phase.
    pub phase: SyncPhase,
    /// Files handled so far (1-based while copying).
    pub current_index: usize,
    /// Files to copy.
    pub total_count: usize,
    /// Title of the file just handled.
    pub current_item_name: Option<String>,
    /// Bytes copied so far.
    pub bytes_copied: u64,
    /// Bytes to copy.
    pub total_bytes: u64,
    /// Elapsed time in seconds.
    pub elapsed_secs: f64,
    /// Status message.
    pub message: String,
}

impl SyncProgress {
    fn planning() -> Self {
        Self {
            phase: SyncPhase::Planning,
            current_index: 0,
            total_count: 0,
            current_item_name: None,
            bytes_copied: 0,
            total_bytes: 0,
            elapsed_secs: 0.0,
            message: "Planning sync...".to_string(),
        }
    }

    /// Overall progress percentage (0.0 - 100.0), by bytes.
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return if self.phase == SyncPhase::Completed {
                100.0
            } else {
                0.0
            };
        }
        (self.bytes_copied as f64 / self.total_bytes as f64) * 100.0
    }
}

// =============================================================================
// Sync Plan
// =============================================================================

/// A pending track that will be copied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAdd {
    /// Pending track.
    pub track_id: u32,
    /// File to copy.
    pub source: PathBuf,
    /// Display title.
    pub name: String,
    /// Source size in bytes.
    pub bytes: u64,
}

/// A pending track dropped because its content is already present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedSkip {
    /// Dropped pending track.
    pub track_id: u32,
    /// Track holding the same content.
    pub existing_id: u32,
    /// File that was not copied.
    pub source: PathBuf,
}

/// What a sync run will do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    /// Copies, in order.
    pub additions: Vec<PlannedAdd>,
    /// On-device files deleted after commit.
    pub removals: Vec<String>,
    /// Duplicates dropped from the run.
    pub skipped: Vec<PlannedSkip>,
    /// Bytes to copy.
    pub total_bytes: u64,
}

impl SyncPlan {
    /// Files to copy.
    pub fn item_count(&self) -> usize {
        self.additions.len()
    }

    /// Whether the plan copies, removes and skips nothing.
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty() && self.skipped.is_empty()
    }
}

// =============================================================================
// Sync Summary
// =============================================================================

/// What happened to one pending track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemOutcome {
    /// Copied and finalized.
    Added {
        /// Final on-device path.
        location: String,
        /// Bytes copied.
        bytes: u64,
    },
    /// Dropped as a duplicate.
    SkippedDuplicate {
        /// Track holding the same content.
        existing_id: u32,
    },
    /// Copy failed; the track was dropped.
    Errored {
        /// Why.
        reason: String,
    },
}

/// Outcome of one pending track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    /// Pending track ID.
    pub track_id: u32,
    /// Source file.
    pub source: PathBuf,
    /// What happened.
    pub outcome: ItemOutcome,
}

/// Terminal report of a sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Phase the run ended in.
    pub final_phase: SyncPhase,
    /// Per-item outcomes, in plan order (skips first).
    pub items: Vec<ItemReport>,
    /// Tracks copied.
    pub added: usize,
    /// Duplicates dropped.
    pub skipped_duplicates: usize,
    /// Copies that failed.
    pub errors: usize,
    /// Bytes copied.
    pub total_bytes_copied: u64,
    /// Files of removed tracks deleted after the commit.
    pub files_deleted: usize,
    /// Whether the run was cancelled.
    pub was_cancelled: bool,
    /// Whether the database was written.
    pub committed: bool,
    /// Why the commit failed, if it did.
    pub commit_error: Option<String>,
    /// Total duration in seconds.
    pub duration_secs: f64,
}

impl SyncSummary {
    fn empty() -> Self {
        Self {
            final_phase: SyncPhase::Idle,
            items: Vec::new(),
            added: 0,
            skipped_duplicates: 0,
            errors: 0,
            total_bytes_copied: 0,
            files_deleted: 0,
            was_cancelled: false,
            committed: false,
            commit_error: None,
            duration_secs: 0.0,
        }
    }

    fn record(&mut self, report: ItemReport) {
        match &report.outcome {
            ItemOutcome::Added { bytes, .. } => {
                self.added += 1;
                self.total_bytes_copied += bytes;
            }
            ItemOutcome::SkippedDuplicate { .. } => self.skipped_duplicates += 1,
            ItemOutcome::Errored { .. } => self.errors += 1,
        }
        self.items.push(report);
    }

    /// Whether everything was copied and committed.
    pub fn is_success(&self) -> bool {
        self.final_phase == SyncPhase::Completed && self.errors == 0
    }

    /// Get a one-line summary of the run.
    #[must_use]
    pub fn summary(&self) -> String {
        if let Some(ref error) = self.commit_error {
            format!(
                "Sync failed at commit: {error} ({} files copied and left uncommitted)",
                self.added
            )
        } else if self.was_cancelled {
            format!(
                "Sync cancelled: {} files added before cancellation{}",
                self.added,
                if self.committed { "" } else { ", not committed" }
            )
        } else {
            format!(
                "Sync completed: {} added, {} skipped as duplicates, {} failed, {} removed in {:.2}s",
                self.added,
                self.skipped_duplicates,
                self.errors,
                self.files_deleted,
                self.duration_secs
            )
        }
    }

    /// Turn a failed commit into an error.
    pub fn into_result(self) -> Result<Self> {
        match self.commit_error {
            Some(reason) => Err(SyncError::CommitFailed { reason }.into()),
            None => Ok(self),
        }
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Runs syncs against a session.
#[derive(Clone)]
pub struct SyncEngine {
    cancelled: Arc<AtomicBool>,
    scan_cache: Option<Arc<dyn ScanCache>>,
    space: Arc<dyn SpaceProbe>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("cancelled", &self.is_cancelled())
            .field("scan_cache", &self.scan_cache.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncEngine {
    /// Create an engine using the system volume list for space checks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            scan_cache: None,
            space: Arc::new(SystemSpaceProbe),
        }
    }

    /// Consult and update `cache` during runs.
    #[must_use]
    pub fn with_scan_cache(mut self, cache: Arc<dyn ScanCache>) -> Self {
        self.scan_cache = Some(cache);
        self
    }

    /// Use `probe` for the free-space check.
    #[must_use]
    pub fn with_space_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.space = probe;
        self
    }

    /// Request cancellation. Takes effect before the next file.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Get a cancellation token that can be shared across threads.
    #[must_use]
    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Compute the plan for `session` without changing anything.
    pub fn plan(&self, session: &Session) -> Result<SyncPlan> {
        let state = session.lock();
        Ok(self.build_plan(&state.layout, &state.document))
    }

    /// Run a sync.
    ///
    /// Returns `Err` only when nothing was changed: a planning failure such as
    /// `DiskFull`, or invalid options. Copy failures and commit failures are
    /// reported in the summary.
    pub fn run<F>(&self, session: &Session, options: &SyncOptions, mut on_progress: F) -> Result<SyncSummary>
    where
        F: FnMut(&SyncProgress),
    {
        options.copy.validate()?;
        let start = Instant::now();
        let mut state = session.lock();
        let mut summary = SyncSummary::empty();
        let mut progress = SyncProgress::planning();

        // Phase 1: Planning
        info!("Phase 1: Planning sync to {}", state.layout.mountpoint().display());
        on_progress(&progress);

        let plan = self.build_plan(&state.layout, &state.document);
        if let Err(e) = self.check_space(&state.layout, &plan, options) {
            error!("Sync aborted during planning: {}", e);
            progress.phase = SyncPhase::Failed;
            progress.message = e.to_string();
            on_progress(&progress);
            return Err(e);
        }
        for skip in &plan.skipped {
            info!(
                "Skipping {}: same content as track {}",
                skip.source.display(),
                skip.existing_id
            );
            state.document.merge_into(skip.track_id, skip.existing_id);
            summary.record(ItemReport {
                track_id: skip.track_id,
                source: skip.source.clone(),
                outcome: ItemOutcome::SkippedDuplicate {
                    existing_id: skip.existing_id,
                },
            });
        }
        info!(
            "Plan: {} to copy ({} bytes), {} duplicate(s), {} removal(s)",
            plan.item_count(),
            plan.total_bytes,
            plan.skipped.len(),
            plan.removals.len()
        );

        // Phase 2: Copying
        progress.phase = SyncPhase::Copying;
        progress.total_count = plan.item_count();
        progress.total_bytes = plan.total_bytes;
        progress.message = format!("Copying {} file(s)...", plan.item_count());
        on_progress(&progress);

        let buckets = state.layout.bucket_count(options.default_bucket_count);
        for (index, item) in plan.additions.iter().enumerate() {
            if self.is_cancelled() {
                info!("Sync cancelled after {} of {} file(s)", index, plan.item_count());
                summary.was_cancelled = true;
                break;
            }

            let report = self.copy_item(&mut state, item, buckets, options);
            if let ItemOutcome::Added { bytes, .. } = &report.outcome {
                progress.bytes_copied += bytes;
            }
            summary.record(report);

            progress.current_index = index + 1;
            progress.current_item_name = Some(item.name.clone());
            progress.elapsed_secs = start.elapsed().as_secs_f64();
            progress.message = format!("Copied {}/{}", index + 1, plan.item_count());
            on_progress(&progress);
        }

        // Phase 3: Committing
        let commit = !summary.was_cancelled || options.commit_on_cancel;
        if commit {
            progress.phase = SyncPhase::Committing;
            progress.message = "Writing database...".to_string();
            on_progress(&progress);
            self.commit(&mut state, &mut summary);
        } else {
            info!("Cancelled sync left uncommitted; copied tracks reach the database at the next save");
        }

        summary.final_phase = if summary.commit_error.is_some() {
            SyncPhase::Failed
        } else if summary.was_cancelled {
            SyncPhase::Cancelled
        } else {
            SyncPhase::Completed
        };
        summary.duration_secs = start.elapsed().as_secs_f64();

        progress.phase = summary.final_phase;
        progress.elapsed_secs = summary.duration_secs;
        progress.message = summary.summary();
        on_progress(&progress);

        info!("{}", summary.summary());
        Ok(summary)
    }

    fn build_plan(&self, layout: &DeviceLayout, document: &Document) -> SyncPlan {
        let mut resolver = DuplicateResolver::new(layout);
        if let Some(cache) = self.scan_cache.as_deref() {
            resolver = resolver.with_scan_cache(cache);
        }

        let mut plan = SyncPlan {
            removals: document.pending_deletes().to_vec(),
            ..SyncPlan::default()
        };
        let mut accepted: HashSet<u32> = HashSet::new();

        for track in document.pending_tracks() {
            let Some(source) = track.source_path.clone() else {
                warn!("Pending track {} has no source file; leaving it", track.id);
                continue;
            };
            let existing = document
                .tracks()
                .filter(|t| t.is_on_device() || accepted.contains(&t.id));
            let duplicate = resolver.is_duplicate(&source, existing).map(|t| t.id);

            match duplicate {
                Some(existing_id) => plan.skipped.push(PlannedSkip {
                    track_id: track.id,
                    existing_id,
                    source,
                }),
                None => {
                    accepted.insert(track.id);
                    plan.total_bytes += track.size;
                    plan.additions.push(PlannedAdd {
                        track_id: track.id,
                        source,
                        name: track.display_title(),
                        bytes: track.size,
                    });
                }
            }
        }
        plan
    }

    fn check_space(&self, layout: &DeviceLayout, plan: &SyncPlan, options: &SyncOptions) -> Result<()> {
        if !options.check_free_space || plan.total_bytes == 0 {
            return Ok(());
        }
        let storage = self.space.storage_info(layout.mountpoint());
        if let Some(reason) = storage.error {
            warn!("Skipping free space check: {}", reason);
            return Ok(());
        }
        if storage.available_bytes < plan.total_bytes {
            return Err(Error::FileSystem(FileSystemError::DiskFull {
                path: layout.mountpoint().to_path_buf(),
                required_bytes: plan.total_bytes,
                available_bytes: storage.available_bytes,
            }));
        }
        debug!(
            "Free space ok: {} needed, {} available",
            plan.total_bytes, storage.available_bytes
        );
        Ok(())
    }

    fn copy_item(
        &self,
        state: &mut SessionState,
        item: &PlannedAdd,
        buckets: u32,
        options: &SyncOptions,
    ) -> ItemReport {
        let outcome = match self.copy_track(state, item, buckets, options) {
            Ok((location, bytes)) => ItemOutcome::Added { location, bytes },
            Err(e) => {
                warn!("Failed to copy {}: {}", item.source.display(), e);
                state.document.discard_pending(item.track_id);
                ItemOutcome::Errored {
                    reason: e.to_string(),
                }
            }
        };
        ItemReport {
            track_id: item.track_id,
            source: item.source.clone(),
            outcome,
        }
    }

    fn copy_track(
        &self,
        state: &mut SessionState,
        item: &PlannedAdd,
        buckets: u32,
        options: &SyncOptions,
    ) -> Result<(String, u64)> {
        let layout = &state.layout;
        let document = &state.document;
        let extension = item
            .source
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        // Final path: free on disk and not held by any other live track.
        let location =
            layout.allocate_unique_location(item.track_id, &extension, buckets, |candidate| {
                document
                    .track_by_location(candidate)
                    .is_some_and(|t| t.id != item.track_id)
            });

        let destination = layout.location_to_path(&location);
        let copied = copy_file(&item.source, &destination, &options.copy)?;
        state
            .document
            .finalize_track(item.track_id, location.clone(), copied.bytes)?;
        debug!("Copied {} -> {}", item.source.display(), location);

        if let Some(cache) = &self.scan_cache {
            self.remember(cache.as_ref(), state, item);
        }
        Ok((location, copied.bytes))
    }

    fn remember(&self, cache: &dyn ScanCache, state: &SessionState, item: &PlannedAdd) {
        let Some(track) = state.document.track(item.track_id) else {
            return;
        };
        let result = fingerprint_file(&item.source)
            .and_then(|fingerprint| cache.upsert(&item.source, &track.metadata(), &fingerprint));
        if let Err(e) = result {
            debug!("Scan cache not updated for {}: {}", item.source.display(), e);
        }
    }

    fn commit(&self, state: &mut SessionState, summary: &mut SyncSummary) {
        info!("Phase 3: Committing database");
        if !state.document.is_dirty() && !state.play_counts_merged {
            debug!("Database unchanged, nothing to write");
        } else if let Err(e) = state.save() {
            error!("Commit failed: {}", e);
            summary.commit_error = Some(e.to_string());
            return;
        }
        summary.committed = true;

        // The image on disk no longer references anything scheduled here.
        let removals = std::mem::take(&mut state.document.pending_deletes);
        for location in removals {
            let path = state.layout.location_to_path(&location);
            match remove_file_if_exists(&path) {
                Ok(true) => summary.files_deleted += 1,
                Ok(false) => debug!("{} was already gone", path.display()),
                Err(e) => warn!("Could not delete {}: {}", path.display(), e),
            }
        }
    }
}

// =============================================================================
// Background worker
// =============================================================================

/// Event delivered by a [`SyncWorker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    /// Progress update.
    Progress(SyncProgress),
    /// The run finished; check `commit_error` for a failed commit.
    Finished(SyncSummary),
    /// The run stopped before changing anything.
    Failed {
        /// Error category.
        kind: ErrorKind,
        /// Error message.
        message: String,
    },
}

/// A sync running on a blocking tokio task.
#[derive(Debug)]
pub struct SyncWorker {
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<Result<SyncSummary>>,
}

impl SyncWorker {
    /// Start `engine` on `session` in the background.
    ///
    /// Events arrive on the returned receiver; the last one is always
    /// `Finished` or `Failed`. Must be called within a tokio runtime.
    pub fn spawn(
        engine: SyncEngine,
        session: Session,
        options: SyncOptions,
    ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancelled = engine.cancellation_token();

        let handle = tokio::task::spawn_blocking(move || {
            let progress_tx = tx.clone();
            let result = engine.run(&session, &options, |progress| {
                // A dropped receiver only means nobody is listening.
                let _ = progress_tx.send(SyncEvent::Progress(progress.clone()));
            });
            let last = match &result {
                Ok(summary) => SyncEvent::Finished(summary.clone()),
                Err(e) => SyncEvent::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                },
            };
            let _ = tx.send(last);
            result
        });

        (Self { cancelled, handle }, rx)
    }

    /// Request cancellation. Takes effect before the next file.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Wait for the run to end.
    pub async fn join(self) -> Result<SyncSummary> {
        self.handle.await.map_err(|e| {
            Error::Sync(SyncError::WorkerFailed {
                reason: e.to_string(),
            })
        })?
    }
}
