//! Integration tests for syncing queued tracks onto a device.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{Device, ImageBuilder, TrackSpec, sample_image, source_file};
use podsync_core::{
    FINGERPRINT_WINDOW, ItemOutcome, SpaceProbe, StorageInfo, SyncEngine, SyncEvent, SyncOptions,
    SyncPhase, SyncWorker, TrackMetadata, TrackStatus, check_integrity, fingerprint_file,
};
use podsync_core::{Session, Track};
use tempfile::TempDir;

/// Reports a large, empty volume.
struct PlentyOfSpace;

impl SpaceProbe for PlentyOfSpace {
    fn storage_info(&self, _path: &std::path::Path) -> StorageInfo {
        StorageInfo {
            total_bytes: 1 << 40,
            available_bytes: 1 << 40,
            error: None,
        }
    }
}

fn engine() -> SyncEngine {
    SyncEngine::new().with_space_probe(Arc::new(PlentyOfSpace))
}

fn open_sample() -> (Device, Session) {
    let device = Device::empty();
    fs::write(device.database_path(), sample_image()).unwrap();
    let session = Session::open(device.path()).unwrap();
    (device, session)
}

fn add(session: &Session, path: &std::path::Path) -> Track {
    session.add_track(path, &TrackMetadata::default()).unwrap()
}

/// Adding the same file twice yields one track; the second add is reported
/// as a skipped duplicate, not an error.
#[test]
fn test_duplicate_add_is_idempotent() {
    let (_device, session) = open_sample();
    let src = TempDir::new().unwrap();
    let song = source_file(src.path(), "song.mp3", 40_000, 3);

    add(&session, &song);
    add(&session, &song);
    let summary = engine().run(&session, &SyncOptions::default(), |_| {}).unwrap();

    assert_eq!(summary.added, 1);
    assert_eq!(summary.skipped_duplicates, 1);
    assert_eq!(summary.errors, 0);
    assert_eq!(session.document().track_count(), 4);

    // A later sync of the same file again finds the on-device copy.
    add(&session, &song);
    let again = engine().run(&session, &SyncOptions::default(), |_| {}).unwrap();
    assert_eq!(again.added, 0);
    assert_eq!(again.skipped_duplicates, 1);
    assert_eq!(session.document().track_count(), 4);
}

/// Ten queued adds where the fifth source vanished: nine added, one errored.
#[test]
fn test_partial_failure_isolated() {
    let (_device, session) = open_sample();
    let src = TempDir::new().unwrap();
    let paths: Vec<_> = (0..10u8)
        .map(|n| source_file(src.path(), &format!("track{n}.mp3"), 2_000 + usize::from(n), n))
        .collect();
    for path in &paths {
        add(&session, path);
    }
    fs::remove_file(&paths[4]).unwrap();

    let summary = engine().run(&session, &SyncOptions::default(), |_| {}).unwrap();

    assert_eq!(summary.added, 9);
    assert_eq!(summary.errors, 1);
    assert!(summary.committed);
    let errored: Vec<_> = summary
        .items
        .iter()
        .filter(|item| matches!(item.outcome, ItemOutcome::Errored { .. }))
        .collect();
    assert_eq!(errored.len(), 1);
    assert_eq!(errored[0].source, paths[4]);

    let doc = session.document();
    assert_eq!(doc.track_count(), 3 + 9);
    assert!(doc.tracks().all(Track::is_on_device));
}

/// A 15 KiB source is fingerprinted in full and synced.
#[test]
fn test_source_smaller_than_fingerprint_window() {
    let (device, session) = open_sample();
    let src = TempDir::new().unwrap();
    let small = source_file(src.path(), "short.mp3", 15 * 1024, 9);
    assert!(fs::metadata(&small).unwrap().len() < FINGERPRINT_WINDOW);

    let fingerprint = fingerprint_file(&small).unwrap();
    assert_eq!(fingerprint.size, 15 * 1024);

    let track = add(&session, &small);
    let summary = engine().run(&session, &SyncOptions::default(), |_| {}).unwrap();
    assert_eq!(summary.added, 1);

    let synced = session.track(track.id).unwrap();
    let copy = device.location_path(synced.location.as_deref().unwrap());
    assert_eq!(fingerprint_file(&copy).unwrap(), fingerprint);
}

/// Progress is reported after every file with its index and name.
#[test]
fn test_progress_after_every_file() {
    let (_device, session) = open_sample();
    let src = TempDir::new().unwrap();
    for n in 0..3u8 {
        add(&session, &source_file(src.path(), &format!("p{n}.mp3"), 500, n));
    }

    let mut copying = Vec::new();
    engine()
        .run(&session, &SyncOptions::default(), |p| {
            if p.phase == SyncPhase::Copying && p.current_item_name.is_some() {
                copying.push((p.current_index, p.total_count, p.current_item_name.clone()));
            }
        })
        .unwrap();

    assert_eq!(
        copying,
        vec![
            (1, 3, Some("p0".to_string())),
            (2, 3, Some("p1".to_string())),
            (3, 3, Some("p2".to_string())),
        ]
    );
}

/// Cancelling mid-sync keeps the tracks copied so far and commits them.
#[test]
fn test_cancel_between_files_commits_finished_tracks() {
    let (device, session) = open_sample();
    let src = TempDir::new().unwrap();
    for n in 0..5u8 {
        add(&session, &source_file(src.path(), &format!("c{n}.mp3"), 700, n));
    }

    let engine = engine();
    let token = engine.cancellation_token();
    let copied = AtomicUsize::new(0);
    let summary = engine
        .run(&session, &SyncOptions::default(), |p| {
            if p.phase == SyncPhase::Copying
                && p.current_index > 0
                && copied.fetch_add(1, Ordering::SeqCst) == 1
            {
                token.store(true, Ordering::SeqCst);
            }
        })
        .unwrap();

    assert!(summary.was_cancelled);
    assert_eq!(summary.added, 2);
    assert!(summary.committed);
    assert_eq!(summary.final_phase, SyncPhase::Cancelled);

    let reopened = Session::open(device.path()).unwrap();
    assert_eq!(reopened.document().track_count(), 3 + 2);
}

/// A commit that fails leaves the old database and reports the copied files
/// as orphans.
#[test]
fn test_commit_failure_leaves_previous_image() {
    let (device, session) = open_sample();
    let src = TempDir::new().unwrap();
    add(&session, &source_file(src.path(), "x.mp3", 1_000, 1));
    let before = fs::read(device.database_path()).unwrap();

    // A non-empty directory where the new database must be renamed to.
    let db = device.database_path();
    fs::rename(&db, db.with_extension("bak")).unwrap();
    fs::create_dir(&db).unwrap();
    fs::write(db.join("blocker"), b"x").unwrap();

    let summary = engine().run(&session, &SyncOptions::default(), |_| {}).unwrap();

    assert_eq!(summary.added, 1);
    assert!(!summary.committed);
    assert!(summary.commit_error.is_some());
    assert_eq!(summary.final_phase, SyncPhase::Failed);
    assert!(summary.clone().into_result().is_err());

    fs::remove_dir_all(&db).unwrap();
    fs::rename(db.with_extension("bak"), &db).unwrap();
    assert_eq!(fs::read(&db).unwrap(), before);

    let reopened = Session::open(device.path()).unwrap();
    let report = check_integrity(device.path(), &reopened.document()).unwrap();
    assert_eq!(report.orphans, 1);
}

/// Removed tracks lose their files only once the database is committed.
#[test]
fn test_removed_track_file_deleted_after_commit() {
    let device = Device::with_image(
        &ImageBuilder::new()
            .track(TrackSpec::new(1, "One").size(3))
            .track(TrackSpec::new(2, "Two").size(3))
            .master("iPod"),
    );
    let session = Session::open(device.path()).unwrap();
    let file = device.location_path(session.track(1).unwrap().location.as_deref().unwrap());

    session.remove_track(1).unwrap();
    assert!(file.exists());

    let summary = engine().run(&session, &SyncOptions::default(), |_| {}).unwrap();

    assert_eq!(summary.files_deleted, 1);
    assert!(!file.exists());
    let report = check_integrity(device.path(), &session.document()).unwrap();
    assert!(report.is_clean(), "{:?}", report.issues);
}

/// The worker streams progress and ends with the summary.
#[tokio::test]
async fn test_worker_streams_events() {
    let (_device, session) = open_sample();
    let src = TempDir::new().unwrap();
    let track = add(&session, &source_file(src.path(), "w.mp3", 2_048, 4));

    let (worker, mut events) = SyncWorker::spawn(engine(), session.clone(), SyncOptions::default());
    let mut progress = 0;
    let mut finished = None;
    while let Some(event) = events.recv().await {
        match event {
            SyncEvent::Progress(_) => progress += 1,
            SyncEvent::Finished(summary) => finished = Some(summary),
            SyncEvent::Failed { message, .. } => panic!("sync failed: {message}"),
        }
    }
    let summary = worker.join().await.unwrap();

    assert!(progress >= 3);
    assert_eq!(finished.map(|s| s.added), Some(1));
    assert_eq!(summary.added, 1);
    assert_eq!(session.track(track.id).unwrap().status, TrackStatus::OnDevice);
}
