use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::hardware::CardPresence;
use super::models::{
    BatchError, FileCompletion, FileProgress, Severity, TransferDestinations, TransferProgress,
    TransferResult, TransferTask, ValidationWarning,
};
use super::observer::TransferObserver;
use super::progress::{SessionHandle, TransferPhase};
use super::retry::{RetryCoordinator, RetryOptions, RetryOutcome, RoutingTable};
use super::scanner;
use super::transfer_engine::{StreamTransfer, TransferEngine, estimate_eta};
use super::verifier::IntegrityValidator;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("batch request must be a JSON object")]
    NotAnObject,

    #[error("invalid batch request: {0}")]
    Invalid(#[from] serde_json::Error),

    #[error("batch request field `{0}` must not be empty")]
    EmptyField(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOptions {
    #[serde(default)]
    pub skip_validation: bool,
}

/// A batch as submitted by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub source: PathBuf,
    pub destinations: TransferDestinations,
    #[serde(default)]
    pub options: Option<BatchOptions>,
}

impl BatchRequest {
    /// Parse and check an untrusted request. Touches no filesystem.
    pub fn from_value(value: Value) -> Result<Self, RequestError> {
        if !value.is_object() {
            return Err(RequestError::NotAnObject);
        }
        let request: BatchRequest = serde_json::from_value(value)?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if self.source.as_os_str().is_empty() {
            return Err(RequestError::EmptyField("source"));
        }
        if self.destinations.photos.as_os_str().is_empty() {
            return Err(RequestError::EmptyField("destinations.photos"));
        }
        if self.destinations.raw_videos.as_os_str().is_empty() {
            return Err(RequestError::EmptyField("destinations.rawVideos"));
        }
        Ok(())
    }

    pub fn skip_validation(&self) -> bool {
        self.options.as_ref().is_some_and(|o| o.skip_validation)
    }
}

/// One batch: its request, its id and the state handle the host polls.
pub struct TransferSession {
    id: String,
    request: BatchRequest,
    handle: SessionHandle,
}

impl TransferSession {
    pub fn new(request: BatchRequest) -> Result<Self, RequestError> {
        request.validate()?;
        let id = Uuid::now_v7().to_string();
        let handle = SessionHandle::new(&id);
        Ok(Self {
            id,
            request,
            handle,
        })
    }

    pub fn from_value(value: Value) -> Result<Self, RequestError> {
        Self::new(BatchRequest::from_value(value)?)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn request(&self) -> &BatchRequest {
        &self.request
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }
}

/// Sequences scan, per-file transfer with retry, and integrity validation.
pub struct Orchestrator {
    coordinator: RetryCoordinator,
    validator: Arc<dyn IntegrityValidator>,
    engine: Option<Arc<dyn TransferEngine>>,
    card: Option<Arc<dyn CardPresence>>,
    sync_files: bool,
}

impl Orchestrator {
    pub fn new(routing: RoutingTable, validator: Arc<dyn IntegrityValidator>) -> Self {
        Self {
            coordinator: RetryCoordinator::new(routing),
            validator,
            engine: None,
            card: None,
            sync_files: true,
        }
    }

    /// Replace the per-batch `StreamTransfer` with a fixed engine.
    pub fn with_engine(mut self, engine: Arc<dyn TransferEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_card(mut self, card: Arc<dyn CardPresence>) -> Self {
        self.card = Some(card);
        self
    }

    pub fn with_sync_files(mut self, sync_files: bool) -> Self {
        self.sync_files = sync_files;
        self
    }

    /// Run a whole batch. Per-file failures end up in the result's
    /// `errors`; they never abort the batch.
    pub async fn start_transfer(
        &self,
        session: &TransferSession,
        observer: &dyn TransferObserver,
    ) -> TransferResult {
        let request = session.request();
        let span = info_span!(
            "batch",
            session_id = %session.id(),
            source = %request.source.display()
        );

        self.run_batch(request, &session.handle, observer)
            .instrument(span)
            .await
    }

    async fn run_batch(
        &self,
        request: &BatchRequest,
        handle: &SessionHandle,
        observer: &dyn TransferObserver,
    ) -> TransferResult {
        let started = Instant::now();
        handle.set_phase(TransferPhase::Scanning).await;

        let tasks = match scanner::scan(&request.source, &request.destinations).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "Source scan failed");
                let message = e.to_string();
                handle
                    .update(|s| {
                        s.phase = TransferPhase::Error;
                        s.last_error = Some(message.clone());
                    })
                    .await;
                return TransferResult {
                    success: false,
                    files_transferred: 0,
                    files_total: 0,
                    bytes_transferred: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                    validation_warnings: Vec::new(),
                    errors: vec![BatchError {
                        file: request.source.clone(),
                        code: "SCAN_FAILED".to_string(),
                        message,
                        attempts: 0,
                        classification: None,
                        card_removed: false,
                    }],
                };
            }
        };

        let mut batch = BatchProgress::new(&tasks, started);
        info!(
            files_total = batch.files_total,
            bytes_total = batch.bytes_expected,
            "Starting batch transfer"
        );
        handle
            .update(|s| {
                s.phase = TransferPhase::Transferring;
                s.files_total = batch.files_total;
                s.bytes_total = batch.bytes_expected;
            })
            .await;

        let stream_engine;
        let engine: &dyn TransferEngine = match &self.engine {
            Some(engine) => engine.as_ref(),
            None => {
                stream_engine =
                    StreamTransfer::new(&request.source, request.destinations.clone())
                        .with_sync_files(self.sync_files);
                &stream_engine
            }
        };
        let options = RetryOptions {
            card: self.card.clone(),
        };

        let mut files_transferred = 0;
        let mut validation_warnings = Vec::new();
        let mut errors = Vec::new();

        for (i, task) in tasks.iter().enumerate() {
            let file_index = i + 1;
            handle
                .update(|s| {
                    s.phase = TransferPhase::Transferring;
                    s.current_file = Some(task.file_name());
                })
                .await;

            let (outcome, high_water) = self
                .transfer_one(task, file_index, engine, &options, &batch, handle, observer)
                .await;
            batch.finish_file(task, high_water);

            if !outcome.success {
                let failure = batch_error(task, &outcome);
                observer.on_file_failed(&failure);
                handle
                    .update(|s| s.last_error = Some(failure.message.clone()))
                    .await;
                errors.push(failure);
                continue;
            }

            let Some(result) = outcome.result else {
                continue;
            };
            batch.transferred_bytes += result.bytes_transferred;
            files_transferred += 1;

            observer.on_file_complete(&FileCompletion {
                source: task.source.clone(),
                destination: task.destination.clone(),
                result,
            });

            if !request.skip_validation() {
                handle.set_phase(TransferPhase::Validating).await;
                validation_warnings.extend(self.validate_file(task, observer).await);
            }

            let transferred = batch.transferred_bytes;
            handle
                .update(|s| {
                    s.files_completed += 1;
                    s.bytes_transferred = transferred;
                })
                .await;
        }

        let result = TransferResult {
            success: errors.is_empty(),
            files_transferred,
            files_total: batch.files_total,
            bytes_transferred: batch.transferred_bytes,
            duration_ms: started.elapsed().as_millis() as u64,
            validation_warnings,
            errors,
        };

        let phase = if result.success {
            TransferPhase::Complete
        } else {
            TransferPhase::Error
        };
        handle
            .update(|s| {
                s.phase = phase;
                s.current_file = None;
                s.bytes_transferred = result.bytes_transferred;
            })
            .await;

        info!(
            files_transferred = result.files_transferred,
            files_total = result.files_total,
            bytes = result.bytes_transferred,
            errors = result.errors.len(),
            warnings = result.validation_warnings.len(),
            duration_ms = result.duration_ms,
            "Batch transfer finished"
        );

        result
    }

    /// Run one task through the retry coordinator while forwarding its
    /// progress. Returns the outcome and the highest byte count reported.
    #[allow(clippy::too_many_arguments)]
    async fn transfer_one(
        &self,
        task: &TransferTask,
        file_index: usize,
        engine: &dyn TransferEngine,
        options: &RetryOptions,
        batch: &BatchProgress,
        handle: &SessionHandle,
        observer: &dyn TransferObserver,
    ) -> (RetryOutcome, u64) {
        let (tx, mut rx) = mpsc::channel::<FileProgress>(32);
        let transfer = self
            .coordinator
            .transfer_with_retry(task, engine, tx, options);
        tokio::pin!(transfer);

        let mut high_water = 0u64;
        let outcome = loop {
            tokio::select! {
                biased;
                Some(progress) = rx.recv() => {
                    high_water = high_water.max(progress.bytes_transferred);
                    self.report(batch.snapshot(task, file_index, &progress, high_water), handle, observer).await;
                }
                outcome = &mut transfer => break outcome,
            }
        };

        while let Ok(progress) = rx.try_recv() {
            high_water = high_water.max(progress.bytes_transferred);
            self.report(batch.snapshot(task, file_index, &progress, high_water), handle, observer)
                .await;
        }

        (outcome, high_water)
    }

    async fn report(
        &self,
        progress: TransferProgress,
        handle: &SessionHandle,
        observer: &dyn TransferObserver,
    ) {
        observer.on_progress(&progress);
        handle
            .update(|s| s.bytes_transferred = progress.total_bytes_transferred)
            .await;
    }

    async fn validate_file(
        &self,
        task: &TransferTask,
        observer: &dyn TransferObserver,
    ) -> Vec<ValidationWarning> {
        match self.validator.validate(&task.source, &task.destination).await {
            Ok(validation) => {
                observer.on_validation(&validation);
                validation
                    .warnings
                    .iter()
                    .map(|w| ValidationWarning {
                        file: task.destination.clone(),
                        message: w.message.clone(),
                        severity: w.severity,
                    })
                    .collect()
            }
            Err(e) => {
                warn!(file = %task.destination.display(), error = %e, "Integrity validation failed");
                vec![ValidationWarning {
                    file: task.destination.clone(),
                    message: format!("Integrity validation failed: {}", e),
                    severity: Severity::High,
                }]
            }
        }
    }
}

/// Running totals across a batch.
///
/// `processed_bytes` counts every finished file at its full size, whether it
/// succeeded or not, so the percentage never goes backwards.
struct BatchProgress {
    files_total: usize,
    bytes_expected: u64,
    processed_bytes: u64,
    transferred_bytes: u64,
    started: Instant,
}

impl BatchProgress {
    fn new(tasks: &[TransferTask], started: Instant) -> Self {
        Self {
            files_total: tasks.len(),
            bytes_expected: tasks.iter().map(|t| t.size).sum(),
            processed_bytes: 0,
            transferred_bytes: 0,
            started,
        }
    }

    fn finish_file(&mut self, task: &TransferTask, high_water: u64) {
        self.processed_bytes += task.size.max(high_water);
    }

    fn snapshot(
        &self,
        task: &TransferTask,
        file_index: usize,
        progress: &FileProgress,
        high_water: u64,
    ) -> TransferProgress {
        let processed = self.processed_bytes + high_water;
        let percent_complete = if self.bytes_expected == 0 {
            100.0
        } else {
            (processed as f64 / self.bytes_expected as f64 * 100.0).min(100.0)
        };
        let eta_seconds = estimate_eta(self.bytes_expected, processed, self.started.elapsed())
            .map(|d| d.as_secs());

        TransferProgress {
            current_file: task.file_name(),
            file_index,
            files_total: self.files_total,
            current_file_bytes: progress.bytes_transferred,
            current_file_size: progress.file_size,
            total_bytes_transferred: self.transferred_bytes + high_water,
            total_bytes_expected: self.bytes_expected,
            percent_complete,
            eta_seconds,
        }
    }
}

fn batch_error(task: &TransferTask, outcome: &RetryOutcome) -> BatchError {
    let (code, message) = match &outcome.error {
        Some(detail) => (detail.code.clone(), detail.message.clone()),
        None => ("UNKNOWN".to_string(), "transfer failed".to_string()),
    };
    debug!(file = %task.source.display(), code = %code, attempts = outcome.attempts, "Recording failed file");

    BatchError {
        file: task.source.clone(),
        code,
        message,
        attempts: outcome.attempts,
        classification: outcome.error_classification.clone(),
        card_removed: outcome.card_removed,
    }
}
