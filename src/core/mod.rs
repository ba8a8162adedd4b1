pub mod failure;
pub mod hardware;
pub mod models;
pub mod notifications;
pub mod observer;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod scanner;
pub mod security;
pub mod transfer_engine;
pub mod verifier;

pub use failure::{ErrorCategory, ErrorClassification, TransferError, classify};
pub use hardware::{CardPresence, MountedCard};
pub use models::{
    BatchError, FileCompletion, FileProgress, FileTransferResult, FileValidationResult,
    MediaType, Severity, TimestampSource, TransferDestinations, TransferProgress, TransferResult,
    TransferTask, ValidationWarning,
};
pub use observer::{ChannelObserver, NoopObserver, TransferEvent, TransferObserver};
pub use orchestrator::{BatchOptions, BatchRequest, Orchestrator, RequestError, TransferSession};
pub use progress::{SessionHandle, TransferPhase, TransferState};
pub use retry::{
    DestinationClass, RetryCoordinator, RetryOptions, RetryOutcome, RetryPolicy, RetryTerminal,
    RouteConfig, RoutingTable,
};
pub use scanner::scan;
pub use security::{PathGuard, SecurityError};
pub use transfer_engine::{StreamTransfer, TransferEngine, TransferFuture};
pub use verifier::{IntegrityValidator, MediaIntegrityValidator, ValidationError};
