use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, debug_span, warn};

use super::{TransferEngine, TransferFuture, estimate_eta};
use crate::core::failure::TransferError;
use crate::core::models::{FileProgress, FileTransferResult, TransferDestinations, TransferTask};
use crate::core::security::PathGuard;
use crate::logging::Throttle;

/// Chunk size for streaming a file
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Minimum wall-clock gap between two progress events
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Streams one file at a time from the card into its destination root.
///
/// - Both paths are authorized before any I/O, each against its own root
/// - Bounded memory: one 64 KiB buffer per transfer
/// - Throttled progress, with the final byte count always reported
/// - Partial destination files are removed on failure
/// - Optional fsync and timestamp preservation on success
pub struct StreamTransfer {
    source_root: PathBuf,
    destinations: TransferDestinations,
    /// Whether to fsync each file after writing (safer but slower)
    pub sync_files: bool,
}

impl StreamTransfer {
    pub fn new(source_root: impl Into<PathBuf>, destinations: TransferDestinations) -> Self {
        Self {
            source_root: source_root.into(),
            destinations,
            sync_files: true,
        }
    }

    pub fn with_sync_files(mut self, sync_files: bool) -> Self {
        self.sync_files = sync_files;
        self
    }

    async fn run(
        &self,
        task: &TransferTask,
        tx: mpsc::Sender<FileProgress>,
    ) -> Result<FileTransferResult, TransferError> {
        let start = Instant::now();

        // Fresh guards per call: each one holds a single allowed root.
        let source =
            PathGuard::scoped(&self.source_root)?.validate_file_path(&task.source)?;
        let destination = PathGuard::scoped(self.destinations.root_for(task.media_type))?
            .validate_file_path(&task.destination)?;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::io("create directory", parent, e))?;
        }

        let reader = File::open(&source)
            .await
            .map_err(|e| TransferError::io("open", &source, e))?;
        let size = reader
            .metadata()
            .await
            .map_err(|e| TransferError::io("stat", &source, e))?
            .len();

        let writer = File::create(&destination)
            .await
            .map_err(|e| TransferError::io("create", &destination, e))?;

        let progress = ProgressReporter {
            file_name: task.file_name(),
            size,
            start,
            throttle: Throttle::new(PROGRESS_INTERVAL),
            last_emitted: None,
            tx,
        };

        let copied = match self
            .stream(reader, writer, &source, &destination, progress)
            .await
        {
            Ok(copied) => copied,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&destination).await {
                    debug!(
                        dest = %destination.display(),
                        error = %cleanup,
                        "Failed to remove partial destination file"
                    );
                }
                return Err(e);
            }
        };

        let mut warnings = Vec::new();
        if copied != task.size {
            warnings.push(format!(
                "Source size changed since scan: expected {} bytes, copied {}",
                task.size, copied
            ));
        }
        if let Err(e) = preserve_timestamps(&source, &destination) {
            debug!(dest = %destination.display(), error = %e, "Failed to preserve file timestamps");
            warnings.push(format!("Could not preserve file timestamps: {}", e));
        }

        Ok(FileTransferResult {
            success: true,
            bytes_transferred: copied,
            duration_ms: start.elapsed().as_millis() as u64,
            warnings,
        })
    }

    async fn stream(
        &self,
        mut reader: File,
        mut writer: File,
        source: &Path,
        destination: &Path,
        mut progress: ProgressReporter,
    ) -> Result<u64, TransferError> {
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut copied: u64 = 0;

        loop {
            let n = reader
                .read(&mut buffer)
                .await
                .map_err(|e| TransferError::io("read", source, e))?;
            if n == 0 {
                break;
            }

            writer
                .write_all(&buffer[..n])
                .await
                .map_err(|e| TransferError::io("write", destination, e))?;

            copied += n as u64;
            progress.tick(copied).await;
        }

        writer
            .flush()
            .await
            .map_err(|e| TransferError::io("flush", destination, e))?;
        if self.sync_files {
            writer
                .sync_all()
                .await
                .map_err(|e| TransferError::io("sync", destination, e))?;
        }

        progress.finish(copied).await;
        Ok(copied)
    }
}

impl TransferEngine for StreamTransfer {
    fn transfer<'a>(
        &'a self,
        task: &'a TransferTask,
        tx: mpsc::Sender<FileProgress>,
    ) -> TransferFuture<'a> {
        let span = debug_span!(
            "stream_transfer",
            media = task.media_type.as_str(),
            source = %task.source.display(),
            destination = %task.destination.display()
        );

        Box::pin(
            async move {
                let result = self.run(task, tx).await;
                match &result {
                    Ok(r) => debug!(
                        bytes = r.bytes_transferred,
                        duration_ms = r.duration_ms,
                        "File transfer complete"
                    ),
                    Err(e) => warn!(code = e.code(), error = %e, "File transfer failed"),
                }
                result
            }
            .instrument(span),
        )
    }
}

struct ProgressReporter {
    file_name: String,
    size: u64,
    start: Instant,
    throttle: Throttle,
    last_emitted: Option<u64>,
    tx: mpsc::Sender<FileProgress>,
}

impl ProgressReporter {
    async fn tick(&mut self, copied: u64) {
        if self.throttle.ready() {
            self.emit(copied).await;
        }
    }

    /// Report the final count unless the last throttled event already did.
    async fn finish(&mut self, copied: u64) {
        if self.last_emitted != Some(copied) {
            self.emit(copied).await;
        }
    }

    async fn emit(&mut self, copied: u64) {
        let eta = estimate_eta(self.size, copied, self.start.elapsed());
        let _ = self
            .tx
            .send(FileProgress {
                file_name: self.file_name.clone(),
                bytes_transferred: copied,
                file_size: self.size,
                eta_ms: eta.map(|d| d.as_millis() as u64),
            })
            .await;
        self.last_emitted = Some(copied);
    }
}

/// Copy access and modification times from source to destination
fn preserve_timestamps(source: &Path, dest: &Path) -> std::io::Result<()> {
    let metadata = std::fs::metadata(source)?;
    let atime = filetime::FileTime::from_last_access_time(&metadata);
    let mtime = filetime::FileTime::from_last_modification_time(&metadata);
    filetime::set_file_times(dest, atime, mtime)
}
