//! In-memory transfer state for polling.
//!
//! Each batch session owns a `SessionHandle`. The host keeps a clone and can
//! query the latest state at any time, including after the batch finished.
//! Nothing here is persisted.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferPhase {
    #[default]
    Idle,
    Scanning,
    Transferring,
    Validating,
    Complete,
    Error,
}

impl TransferPhase {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Scanning | Self::Transferring | Self::Validating)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferState {
    pub phase: TransferPhase,
    pub session_id: Option<String>,
    pub files_completed: usize,
    pub files_total: usize,
    pub bytes_transferred: u64,
    pub bytes_total: u64,
    pub current_file: Option<String>,
    pub last_error: Option<String>,
}

/// Shared, cloneable view of one session's state.
#[derive(Clone, Default)]
pub struct SessionHandle {
    inner: Arc<RwLock<TransferState>>,
}

impl SessionHandle {
    pub fn new(session_id: &str) -> Self {
        Self {
            inner: Arc::new(RwLock::new(TransferState {
                session_id: Some(session_id.to_string()),
                ..TransferState::default()
            })),
        }
    }

    pub async fn snapshot(&self) -> TransferState {
        self.inner.read().await.clone()
    }

    pub async fn update(&self, f: impl FnOnce(&mut TransferState)) {
        let mut state = self.inner.write().await;
        f(&mut state);
    }

    pub async fn set_phase(&self, phase: TransferPhase) {
        self.update(|s| s.phase = phase).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_handle_is_idle() {
        let handle = SessionHandle::new("session-1");
        let state = handle.snapshot().await;
        assert_eq!(state.phase, TransferPhase::Idle);
        assert_eq!(state.session_id.as_deref(), Some("session-1"));
        assert!(!state.phase.is_active());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let handle = SessionHandle::new("session-2");
        let host_view = handle.clone();

        handle
            .update(|s| {
                s.phase = TransferPhase::Transferring;
                s.files_total = 3;
                s.current_file = Some("C0001.MP4".to_string());
            })
            .await;

        let state = host_view.snapshot().await;
        assert_eq!(state.phase, TransferPhase::Transferring);
        assert!(state.phase.is_active());
        assert_eq!(state.files_total, 3);
        assert_eq!(state.current_file.as_deref(), Some("C0001.MP4"));
    }

    #[test]
    fn test_phase_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TransferPhase::Validating).unwrap(),
            r#""validating""#
        );
    }
}
