pub mod stream_copy;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;

use super::failure::TransferError;
use super::models::{FileProgress, FileTransferResult, TransferTask};

pub use stream_copy::StreamTransfer;

pub type TransferFuture<'a> =
    Pin<Box<dyn Future<Output = Result<FileTransferResult, TransferError>> + Send + 'a>>;

/// Moves one file to its destination.
///
/// Implementations report progress on `tx` and leave no partial destination
/// file behind when they fail.
pub trait TransferEngine: Send + Sync {
    fn transfer<'a>(&'a self, task: &'a TransferTask, tx: mpsc::Sender<FileProgress>)
    -> TransferFuture<'a>;
}

/// Remaining time from the average rate so far.
///
/// `None` until at least one byte has moved.
pub fn estimate_eta(size: u64, transferred: u64, elapsed: Duration) -> Option<Duration> {
    if transferred == 0 {
        return None;
    }

    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    let remaining = size.saturating_sub(transferred) as f64;
    if remaining == 0.0 || elapsed_ms == 0.0 {
        return Some(Duration::ZERO);
    }

    let bytes_per_ms = transferred as f64 / elapsed_ms;
    Some(Duration::from_secs_f64(remaining / bytes_per_ms / 1000.0))
}
