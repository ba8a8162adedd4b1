//! Retry coordination for single-file transfers.
//!
//! Each attempt yields an explicit `Result`; the error is classified and
//! `RetryPolicy::decide` turns (attempt, classification) into the next step.
//! Budgets depend on the class of the destination, resolved through the
//! routing table.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::failure::{ErrorClassification, TransferError, classify};
use super::hardware::CardPresence;
use super::models::{FileProgress, FileTransferResult, TransferTask};
use super::transfer_engine::TransferEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationClass {
    #[default]
    Local,
    Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub class: DestinationClass,
    pub max_retries: u32,
    pub base_delay: Duration,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    FatalStop,
    BudgetExhausted,
}

impl RetryPolicy {
    pub fn for_class(class: DestinationClass) -> Self {
        match class {
            DestinationClass::Local => Self {
                class,
                max_retries: 3,
                base_delay: Duration::from_millis(1000),
            },
            DestinationClass::Network => Self {
                class,
                max_retries: 5,
                base_delay: Duration::from_millis(2000),
            },
        }
    }

    /// Delay before retry number `retry` (0-based): base doubled each time.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }

    /// Decide the next step after `attempts` attempts, the last of which
    /// failed with `classification`.
    pub fn decide(&self, attempts: u32, classification: &ErrorClassification) -> RetryDecision {
        if !classification.is_transient() {
            return RetryDecision::FatalStop;
        }

        let retries_used = attempts.saturating_sub(1);
        if retries_used >= self.max_retries {
            return RetryDecision::BudgetExhausted;
        }

        RetryDecision::Retry {
            delay: self.delay_for(retries_used),
        }
    }
}

/// One row of the routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub root: PathBuf,
    pub class: DestinationClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_delay_ms: Option<u64>,
}

impl RouteConfig {
    fn policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::for_class(self.class);
        if let Some(max_retries) = self.max_retries {
            policy.max_retries = max_retries;
        }
        if let Some(base_delay_ms) = self.base_delay_ms {
            policy.base_delay = Duration::from_millis(base_delay_ms);
        }
        policy
    }
}

/// Maps destination roots to retry policies.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: Vec<RouteConfig>,
}

impl RoutingTable {
    pub fn new(routes: Vec<RouteConfig>) -> Self {
        Self { routes }
    }

    /// Longest matching root wins; unmatched destinations are local.
    pub fn resolve(&self, destination: &Path) -> RetryPolicy {
        self.routes
            .iter()
            .filter(|route| destination.starts_with(&route.root))
            .max_by_key(|route| route.root.components().count())
            .map(RouteConfig::policy)
            .unwrap_or_else(|| RetryPolicy::for_class(DestinationClass::Local))
    }
}

#[derive(Clone, Default)]
pub struct RetryOptions {
    /// When set, a missing card stops retries before any backoff.
    pub card: Option<Arc<dyn CardPresence>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryTerminal {
    Success,
    FatalStop,
    BudgetExhausted,
    CardRemoved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryOutcome {
    pub success: bool,
    pub attempts: u32,
    pub terminal: RetryTerminal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<FileTransferResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_classification: Option<ErrorClassification>,
    pub card_removed: bool,
    /// Delays actually waited between attempts.
    pub backoff_ms: Vec<u64>,
}

impl RetryOutcome {
    fn succeeded(attempts: u32, result: FileTransferResult, backoff_ms: Vec<u64>) -> Self {
        Self {
            success: true,
            attempts,
            terminal: RetryTerminal::Success,
            result: Some(result),
            error: None,
            error_classification: None,
            card_removed: false,
            backoff_ms,
        }
    }

    fn failed(
        attempts: u32,
        terminal: RetryTerminal,
        error: &TransferError,
        classification: ErrorClassification,
        backoff_ms: Vec<u64>,
    ) -> Self {
        Self {
            success: false,
            attempts,
            terminal,
            result: None,
            error: Some(ErrorDetail {
                code: error.code().to_string(),
                message: error.to_string(),
            }),
            error_classification: Some(classification),
            card_removed: terminal == RetryTerminal::CardRemoved,
            backoff_ms,
        }
    }
}

/// Wraps a transfer engine with classification, backoff and card checks.
#[derive(Debug, Clone, Default)]
pub struct RetryCoordinator {
    routing: RoutingTable,
}

impl RetryCoordinator {
    pub fn new(routing: RoutingTable) -> Self {
        Self { routing }
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub async fn transfer_with_retry(
        &self,
        task: &TransferTask,
        engine: &dyn TransferEngine,
        tx: mpsc::Sender<FileProgress>,
        options: &RetryOptions,
    ) -> RetryOutcome {
        let policy = self.routing.resolve(&task.destination);
        let mut backoff_ms = Vec::new();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let error = match engine.transfer(task, tx.clone()).await {
                Ok(result) => {
                    if attempts > 1 {
                        info!(file = %task.source.display(), attempts, "Transfer succeeded after retry");
                    }
                    return RetryOutcome::succeeded(attempts, result, backoff_ms);
                }
                Err(e) => e,
            };

            let classification = classify(&error);
            let delay = match policy.decide(attempts, &classification) {
                RetryDecision::Retry { delay } => delay,
                RetryDecision::FatalStop => {
                    warn!(
                        file = %task.source.display(),
                        code = %classification.code,
                        error = %error,
                        "Fatal transfer error, not retrying"
                    );
                    return RetryOutcome::failed(
                        attempts,
                        RetryTerminal::FatalStop,
                        &error,
                        classification,
                        backoff_ms,
                    );
                }
                RetryDecision::BudgetExhausted => {
                    warn!(
                        file = %task.source.display(),
                        code = %classification.code,
                        attempts,
                        class = ?policy.class,
                        "Retry budget exhausted"
                    );
                    return RetryOutcome::failed(
                        attempts,
                        RetryTerminal::BudgetExhausted,
                        &error,
                        classification,
                        backoff_ms,
                    );
                }
            };

            if let Some(card) = &options.card {
                if !card.is_present() {
                    warn!(
                        file = %task.source.display(),
                        card = %card.path().display(),
                        "Card removed, abandoning retries"
                    );
                    return RetryOutcome::failed(
                        attempts,
                        RetryTerminal::CardRemoved,
                        &error,
                        ErrorClassification::card_removed(),
                        backoff_ms,
                    );
                }
            }

            debug!(
                file = %task.source.display(),
                code = %classification.code,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Transient transfer error, backing off"
            );
            backoff_ms.push(delay.as_millis() as u64);
            tokio::time::sleep(delay).await;
        }
    }
}
