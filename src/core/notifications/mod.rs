mod slack;

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{NotificationChannelType, NotificationConfig};
use crate::core::models::TransferResult;

/// Batch lifecycle events that trigger notifications
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Started {
        session_id: String,
        source: PathBuf,
    },
    Completed {
        session_id: String,
        files_transferred: usize,
        bytes_transferred: u64,
        duration_ms: u64,
        warnings: usize,
    },
    Failed {
        session_id: String,
        files_transferred: usize,
        files_total: usize,
        errors: Vec<String>,
    },
}

impl BatchEvent {
    /// Completed or Failed, depending on the batch outcome.
    pub fn finished(session_id: &str, result: &TransferResult) -> Self {
        if result.success {
            BatchEvent::Completed {
                session_id: session_id.to_string(),
                files_transferred: result.files_transferred,
                bytes_transferred: result.bytes_transferred,
                duration_ms: result.duration_ms,
                warnings: result.validation_warnings.len(),
            }
        } else {
            BatchEvent::Failed {
                session_id: session_id.to_string(),
                files_transferred: result.files_transferred,
                files_total: result.files_total,
                errors: result
                    .errors
                    .iter()
                    .map(|e| format!("{}: {}", e.file.display(), e.message))
                    .collect(),
            }
        }
    }
}

/// Trait for notification channel implementations
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, event: BatchEvent) -> Result<()>;
}

/// Create a notifier from config; `None` when notifications are off
pub fn create_notifier(config: &NotificationConfig) -> Option<Arc<dyn NotificationChannel>> {
    match &config.channel {
        NotificationChannelType::None => None,
        NotificationChannelType::Slack => {
            let webhook = config.slack_webhook.as_ref()?;
            if webhook.is_empty() {
                return None;
            }
            Some(Arc::new(slack::SlackNotifier::new(webhook.clone())))
        }
    }
}
