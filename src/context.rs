use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::AppConfig;
use crate::core::notifications::{BatchEvent, NotificationChannel, create_notifier};
use crate::core::{
    BatchRequest, MediaIntegrityValidator, MountedCard, Orchestrator, RequestError, SessionHandle,
    TransferObserver, TransferPhase, TransferResult, TransferSession, TransferState,
};

#[derive(Debug, Error)]
pub enum BatchRejected {
    #[error("a transfer is already in progress (session {0})")]
    InProgress(String),

    #[error(transparent)]
    Invalid(#[from] RequestError),
}

/// Host-side state shared by the CLI and the RPC server.
///
/// Holds the handle of the most recent session so its state can be polled
/// between and after batch calls.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    current: Arc<RwLock<Option<SessionHandle>>>,
    notifier: Option<Arc<dyn NotificationChannel>>,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        let notifier = create_notifier(&config.notifications);
        Self {
            config: Arc::new(config),
            current: Arc::new(RwLock::new(None)),
            notifier,
        }
    }

    pub fn orchestrator(&self, source: &Path) -> Orchestrator {
        let validator = Arc::new(MediaIntegrityValidator::new(self.config.verify_checksums));
        Orchestrator::new(self.config.routing_table(), validator)
            .with_sync_files(self.config.sync_files)
            .with_card(Arc::new(self.card_mount(source)))
    }

    /// The configured card mount, or the batch source when none is set.
    fn card_mount(&self, source: &Path) -> MountedCard {
        MountedCard::new(self.config.card_path.as_deref().unwrap_or(source))
    }

    /// Run one batch to completion. Only one batch runs at a time.
    pub async fn run_batch(
        &self,
        request: BatchRequest,
        observer: &dyn TransferObserver,
    ) -> Result<TransferResult, BatchRejected> {
        let session = TransferSession::new(request)?;

        {
            let mut current = self.current.write().await;
            if let Some(active) = current.as_ref() {
                let state = active.snapshot().await;
                if state.phase.is_active() {
                    return Err(BatchRejected::InProgress(
                        state.session_id.unwrap_or_default(),
                    ));
                }
            }
            session.handle().set_phase(TransferPhase::Scanning).await;
            *current = Some(session.handle());
        }

        self.notify(BatchEvent::Started {
            session_id: session.id().to_string(),
            source: session.request().source.clone(),
        })
        .await;

        let result = self
            .orchestrator(&session.request().source)
            .start_transfer(&session, observer).await;

        self.notify(BatchEvent::finished(session.id(), &result)).await;
        Ok(result)
    }

    /// State of the most recent session, or idle if there has been none.
    pub async fn current_state(&self) -> TransferState {
        match self.current.read().await.as_ref() {
            Some(handle) => handle.snapshot().await,
            None => TransferState::default(),
        }
    }

    async fn notify(&self, event: BatchEvent) {
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify(event).await {
                warn!(error = %e, "Failed to send notification");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CardPresence;
    use std::path::PathBuf;

    #[test]
    fn test_card_mount_defaults_to_source() {
        let ctx = AppContext::new(AppConfig::default());
        let mount = ctx.card_mount(Path::new("/Volumes/A7IV"));
        assert_eq!(mount.path(), Path::new("/Volumes/A7IV"));
    }

    #[test]
    fn test_configured_card_mount_wins() {
        let ctx = AppContext::new(AppConfig {
            card_path: Some(PathBuf::from("/Volumes/CFEX")),
            ..AppConfig::default()
        });
        let mount = ctx.card_mount(Path::new("/Volumes/CFEX/DCIM"));
        assert_eq!(mount.path(), Path::new("/Volumes/CFEX"));
    }
}
