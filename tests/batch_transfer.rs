//! End-to-end batches against a temporary card layout.

use cfex_ingest::core::verifier::FILESYSTEM_FALLBACK_WARNING;
use cfex_ingest::core::{
    BatchRequest, CardPresence, ChannelObserver, FileProgress, MediaIntegrityValidator,
    NoopObserver, Orchestrator, RoutingTable, Severity, StreamTransfer, TransferDestinations,
    TransferEngine, TransferError, TransferEvent, TransferFuture, TransferPhase, TransferSession,
    TransferTask,
};
use serde_json::json;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tempfile::{TempDir, tempdir};
use tokio::sync::mpsc;

const KIB: usize = 1024;

fn create_file(path: &Path, size: usize) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let content: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    std::fs::write(path, content).unwrap();
}

struct Layout {
    _temp: TempDir,
    card: std::path::PathBuf,
    destinations: TransferDestinations,
}

fn layout() -> Layout {
    let temp = tempdir().unwrap();
    let card = temp.path().join("card");
    std::fs::create_dir_all(&card).unwrap();
    let destinations = TransferDestinations {
        photos: temp.path().join("photos"),
        raw_videos: temp.path().join("raw"),
    };
    Layout {
        card,
        destinations,
        _temp: temp,
    }
}

fn orchestrator() -> Orchestrator {
    Orchestrator::new(
        RoutingTable::default(),
        Arc::new(MediaIntegrityValidator::new(true)),
    )
    .with_sync_files(false)
}

fn session(layout: &Layout, skip_validation: bool) -> TransferSession {
    TransferSession::from_value(json!({
        "source": layout.card,
        "destinations": {
            "photos": layout.destinations.photos,
            "rawVideos": layout.destinations.raw_videos,
        },
        "options": { "skipValidation": skip_validation }
    }))
    .unwrap()
}

fn drain(rx: &mut mpsc::UnboundedReceiver<TransferEvent>) -> Vec<TransferEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_mixed_card_is_routed_and_reported() {
    let layout = layout();
    create_file(&layout.card.join("DCIM/100MSDCF/DSC00001.JPG"), 100 * KIB);
    create_file(&layout.card.join("DCIM/100MSDCF/DSC00002.JPG"), 150 * KIB);
    create_file(&layout.card.join("PRIVATE/M4ROOT/CLIP/C0001.MP4"), 500 * KIB);
    create_file(&layout.card.join("PRIVATE/M4ROOT/CLIP/C0001M01.XML"), KIB);
    create_file(&layout.card.join("DCIM/._DSC00001.JPG"), KIB);

    let session = session(&layout, false);
    let (observer, mut rx) = ChannelObserver::channel();
    let result = orchestrator().start_transfer(&session, &observer).await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.files_total, 3);
    assert_eq!(result.files_transferred, 3);
    assert_eq!(result.bytes_transferred, (750 * KIB) as u64);

    for (dir, name, size) in [
        (&layout.destinations.photos, "DSC00001.JPG", 100 * KIB),
        (&layout.destinations.photos, "DSC00002.JPG", 150 * KIB),
        (&layout.destinations.raw_videos, "C0001.MP4", 500 * KIB),
    ] {
        let meta = std::fs::metadata(dir.join(name)).unwrap();
        assert_eq!(meta.len(), size as u64, "{}", name);
    }
    assert!(!layout.destinations.raw_videos.join("C0001M01.XML").exists());

    let events = drain(&mut rx);
    let progress: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::Progress(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(progress[0].file_index, 1);
    assert_eq!(progress[0].files_total, 3);
    assert!(
        progress
            .windows(2)
            .all(|w| w[0].percent_complete <= w[1].percent_complete)
    );
    assert_eq!(progress.last().unwrap().percent_complete, 100.0);

    let completions = events
        .iter()
        .filter(|e| matches!(e, TransferEvent::FileComplete(_)))
        .count();
    let validations = events
        .iter()
        .filter(|e| matches!(e, TransferEvent::Validation(v) if v.checksum_match == Some(true)))
        .count();
    assert_eq!(completions, 3);
    assert_eq!(validations, 3);

    let state = session.handle().snapshot().await;
    assert_eq!(state.phase, TransferPhase::Complete);
    assert_eq!(state.files_completed, 3);
    assert_eq!(state.bytes_transferred, (750 * KIB) as u64);
    assert_eq!(state.current_file, None);
}

#[tokio::test]
async fn test_photo_without_exif_falls_back_to_filesystem_time() {
    let layout = layout();
    create_file(&layout.card.join("DCIM/IMG_0001.JPG"), 8 * KIB);

    let result = orchestrator()
        .start_transfer(&session(&layout, false), &NoopObserver)
        .await;

    assert!(result.success);
    let warning = result
        .validation_warnings
        .iter()
        .find(|w| w.message == FILESYSTEM_FALLBACK_WARNING)
        .expect("fallback warning");
    assert_eq!(warning.severity, Severity::Medium);
    assert_eq!(
        warning.file,
        layout.destinations.photos.join("IMG_0001.JPG")
    );
}

#[tokio::test]
async fn test_skip_validation_emits_no_warnings() {
    let layout = layout();
    create_file(&layout.card.join("DCIM/IMG_0001.JPG"), 8 * KIB);

    let (observer, mut rx) = ChannelObserver::channel();
    let result = orchestrator()
        .start_transfer(&session(&layout, true), &observer)
        .await;

    assert!(result.success);
    assert!(result.validation_warnings.is_empty());
    assert!(
        !drain(&mut rx)
            .iter()
            .any(|e| matches!(e, TransferEvent::Validation(_)))
    );
}

/// Streams normally except for one file, which always hits a full disk.
struct FullDiskFor {
    inner: StreamTransfer,
    file_name: &'static str,
}

impl TransferEngine for FullDiskFor {
    fn transfer<'a>(
        &'a self,
        task: &'a TransferTask,
        tx: mpsc::Sender<FileProgress>,
    ) -> TransferFuture<'a> {
        if task.file_name() == self.file_name {
            return Box::pin(async move {
                Err(TransferError::io(
                    "write",
                    &task.destination,
                    io::Error::from_raw_os_error(libc::ENOSPC),
                ))
            });
        }
        self.inner.transfer(task, tx)
    }
}

#[tokio::test]
async fn test_failed_file_does_not_abort_batch() {
    let layout = layout();
    create_file(&layout.card.join("DCIM/DSC00001.JPG"), 20 * KIB);
    create_file(&layout.card.join("DCIM/DSC00002.JPG"), 30 * KIB);

    let engine = FullDiskFor {
        inner: StreamTransfer::new(&layout.card, layout.destinations.clone()).with_sync_files(false),
        file_name: "DSC00001.JPG",
    };
    let session = session(&layout, true);
    let (observer, mut rx) = ChannelObserver::channel();
    let result = orchestrator()
        .with_engine(Arc::new(engine))
        .start_transfer(&session, &observer)
        .await;

    assert!(!result.success);
    assert_eq!(result.files_total, 2);
    assert_eq!(result.files_transferred, 1);
    assert_eq!(result.errors.len(), 1);

    let error = &result.errors[0];
    assert_eq!(error.code, "ENOSPC");
    assert_eq!(error.attempts, 1);
    assert!(!error.card_removed);
    assert_eq!(error.classification.as_ref().unwrap().code, "ENOSPC");

    assert!(!layout.destinations.photos.join("DSC00001.JPG").exists());
    assert!(layout.destinations.photos.join("DSC00002.JPG").exists());

    let failed = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, TransferEvent::FileFailed(_)))
        .count();
    assert_eq!(failed, 1);

    let state = session.handle().snapshot().await;
    assert_eq!(state.phase, TransferPhase::Error);
    assert_eq!(state.files_completed, 1);
    assert!(state.last_error.is_some());
}

struct FailingReads;

impl TransferEngine for FailingReads {
    fn transfer<'a>(
        &'a self,
        task: &'a TransferTask,
        _tx: mpsc::Sender<FileProgress>,
    ) -> TransferFuture<'a> {
        Box::pin(async move {
            Err(TransferError::io(
                "read",
                &task.source,
                io::Error::from_raw_os_error(libc::EIO),
            ))
        })
    }
}

struct PulledCard(std::path::PathBuf);

impl CardPresence for PulledCard {
    fn path(&self) -> &Path {
        &self.0
    }

    fn is_present(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn test_removed_card_fails_each_file_without_retrying() {
    let layout = layout();
    create_file(&layout.card.join("DCIM/DSC00001.JPG"), 10 * KIB);
    create_file(&layout.card.join("DCIM/DSC00002.JPG"), 10 * KIB);

    let session = session(&layout, true);
    let result = orchestrator()
        .with_engine(Arc::new(FailingReads))
        .with_card(Arc::new(PulledCard(layout.card.clone())))
        .start_transfer(&session, &NoopObserver)
        .await;

    assert!(!result.success);
    assert_eq!(result.files_total, 2);
    assert_eq!(result.files_transferred, 0);
    assert_eq!(result.errors.len(), 2);
    for error in &result.errors {
        assert!(error.card_removed);
        assert_eq!(error.attempts, 1);
        assert_eq!(error.code, "EIO");
        assert_eq!(error.classification.as_ref().unwrap().code, "CARD_REMOVED");
    }
    assert_eq!(session.handle().snapshot().await.phase, TransferPhase::Error);
}

#[tokio::test]
async fn test_missing_source_reports_scan_failure() {
    let layout = layout();
    let request = BatchRequest {
        source: layout.card.join("not-mounted"),
        destinations: layout.destinations.clone(),
        options: None,
    };
    let session = TransferSession::new(request).unwrap();

    let result = orchestrator().start_transfer(&session, &NoopObserver).await;

    assert!(!result.success);
    assert_eq!(result.files_total, 0);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].code, "SCAN_FAILED");
    assert_eq!(session.handle().snapshot().await.phase, TransferPhase::Error);
}

#[tokio::test]
async fn test_empty_card_completes_immediately() {
    let layout = layout();
    create_file(&layout.card.join("DCIM/.DS_Store"), KIB);

    let session = session(&layout, false);
    let result = orchestrator().start_transfer(&session, &NoopObserver).await;

    assert!(result.success);
    assert_eq!(result.files_total, 0);
    assert_eq!(result.bytes_transferred, 0);
    assert_eq!(
        session.handle().snapshot().await.phase,
        TransferPhase::Complete
    );
}
