use serde::Serialize;
use tokio::sync::mpsc;

use super::models::{BatchError, FileCompletion, FileValidationResult, TransferProgress};

/// Receives the events of one batch. Every method defaults to a no-op.
pub trait TransferObserver: Send + Sync {
    fn on_progress(&self, _progress: &TransferProgress) {}
    fn on_file_complete(&self, _completion: &FileCompletion) {}
    fn on_validation(&self, _validation: &FileValidationResult) {}
    fn on_file_failed(&self, _error: &BatchError) {}
}

pub struct NoopObserver;

impl TransferObserver for NoopObserver {}

/// Event forwarded verbatim to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum TransferEvent {
    Progress(TransferProgress),
    FileComplete(FileCompletion),
    Validation(FileValidationResult),
    FileFailed(BatchError),
}

/// Forwards every callback as a `TransferEvent` over a channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl ChannelObserver {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: TransferEvent) {
        // Receiver gone means the host stopped listening.
        let _ = self.tx.send(event);
    }
}

impl TransferObserver for ChannelObserver {
    fn on_progress(&self, progress: &TransferProgress) {
        self.forward(TransferEvent::Progress(progress.clone()));
    }

    fn on_file_complete(&self, completion: &FileCompletion) {
        self.forward(TransferEvent::FileComplete(completion.clone()));
    }

    fn on_validation(&self, validation: &FileValidationResult) {
        self.forward(TransferEvent::Validation(validation.clone()));
    }

    fn on_file_failed(&self, error: &BatchError) {
        self.forward(TransferEvent::FileFailed(error.clone()));
    }
}
