//! RPC method handlers.
//!
//! - `daemon.status`: version, uptime, bind address, whether a batch runs
//! - `transfer.start`: run a batch; params are the batch request. Each
//!   batch event is sent as a `transfer.event` notification before the
//!   final response.
//! - `transfer.state`: latest state of the most recent batch

use serde::Serialize;
use serde_json::{Value, json};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::context::{AppContext, BatchRejected};
use crate::core::{BatchRequest, ChannelObserver, TransferEvent};

use super::protocol::{Request, Response, TRANSFER_EVENT, TRANSFER_IN_PROGRESS};

/// Outgoing notifications for the connection that issued the request.
pub type NotificationSender = mpsc::UnboundedSender<Request>;

/// Handles RPC method dispatch and execution.
pub struct MethodHandler {
    ctx: AppContext,
    start_time: Instant,
}

impl MethodHandler {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            start_time: Instant::now(),
        }
    }

    /// Handle a request whose notifications nobody listens to.
    pub async fn handle(&self, request: Request) -> Response {
        let (notifications, _) = mpsc::unbounded_channel();
        self.handle_streaming(request, notifications).await
    }

    pub async fn handle_streaming(
        &self,
        request: Request,
        notifications: NotificationSender,
    ) -> Response {
        let id = request.id.clone().unwrap_or(Value::Null);
        let params = request.params.unwrap_or(Value::Null);

        match request.method.as_str() {
            "daemon.status" => self.daemon_status(id).await,
            "transfer.start" => self.transfer_start(id, params, notifications).await,
            "transfer.state" => self.transfer_state(id).await,
            _ => Response::method_not_found(id, &request.method),
        }
    }

    async fn daemon_status(&self, id: Value) -> Response {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct DaemonStatus {
            version: &'static str,
            uptime_secs: u64,
            rpc_bind: String,
            transfer_active: bool,
        }

        let state = self.ctx.current_state().await;
        Response::success(
            id,
            DaemonStatus {
                version: env!("CARGO_PKG_VERSION"),
                uptime_secs: self.start_time.elapsed().as_secs(),
                rpc_bind: self.ctx.config.rpc_bind.to_string(),
                transfer_active: state.phase.is_active(),
            },
        )
    }

    /// Rejects malformed requests before touching the filesystem.
    async fn transfer_start(
        &self,
        id: Value,
        params: Value,
        notifications: NotificationSender,
    ) -> Response {
        let request = match BatchRequest::from_value(params) {
            Ok(request) => request,
            Err(e) => return Response::invalid_params(id, e.to_string()),
        };

        info!(source = %request.source.display(), "Batch requested over RPC");
        let (observer, mut events) = ChannelObserver::channel();
        let batch = async move {
            let result = self.ctx.run_batch(request, &observer).await;
            drop(observer);
            result
        };
        let forward = async move {
            while let Some(event) = events.recv().await {
                forward_event(&notifications, &event);
            }
        };
        let (outcome, ()) = tokio::join!(batch, forward);

        match outcome {
            Ok(result) => Response::success(id, result),
            Err(BatchRejected::InProgress(session_id)) => Response::error_with_data(
                id,
                TRANSFER_IN_PROGRESS,
                "A transfer is already in progress",
                json!({ "sessionId": session_id }),
            ),
            Err(e @ BatchRejected::Invalid(_)) => Response::invalid_params(id, e.to_string()),
        }
    }

    async fn transfer_state(&self, id: Value) -> Response {
        Response::success(id, self.ctx.current_state().await)
    }
}

fn forward_event(notifications: &NotificationSender, event: &TransferEvent) {
    match Request::notification(TRANSFER_EVENT, event) {
        // A closed channel means the client went away; the batch still runs.
        Ok(note) => {
            let _ = notifications.send(note);
        }
        Err(e) => debug!(error = %e, "Failed to serialize transfer event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::rpc::protocol::{INVALID_PARAMS, METHOD_NOT_FOUND};
    use tempfile::tempdir;

    fn request(method: &str, params: Option<Value>) -> Request {
        Request {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: Some(Value::Number(1.into())),
        }
    }

    fn handler() -> MethodHandler {
        MethodHandler::new(AppContext::new(AppConfig::default()))
    }

    #[tokio::test]
    async fn test_state_is_idle_before_any_batch() {
        let resp = handler().handle(request("transfer.state", None)).await;
        let result = resp.result.unwrap();
        assert_eq!(result["phase"], "idle");
        assert_eq!(result["filesTotal"], 0);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let resp = handler().handle(request("jobs.list", None)).await;
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_batch_is_rejected() {
        let resp = handler()
            .handle(request(
                "transfer.start",
                Some(json!({ "source": 1, "destinations": {} })),
            ))
            .await;
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_start_streams_events_as_notifications() {
        let temp = tempdir().unwrap();
        let card = temp.path().join("card");
        std::fs::create_dir_all(card.join("PRIVATE/M4ROOT/CLIP")).unwrap();
        std::fs::write(card.join("PRIVATE/M4ROOT/CLIP/C0001.MP4"), vec![1u8; 4096]).unwrap();

        let (notifications, mut rx) = mpsc::unbounded_channel();
        let resp = handler()
            .handle_streaming(
                request(
                    "transfer.start",
                    Some(json!({
                        "source": card,
                        "destinations": {
                            "photos": temp.path().join("photos"),
                            "rawVideos": temp.path().join("raw")
                        }
                    })),
                ),
                notifications,
            )
            .await;
        assert_eq!(resp.result.unwrap()["success"], true);

        let mut kinds = Vec::new();
        while let Ok(note) = rx.try_recv() {
            assert_eq!(note.method, "transfer.event");
            assert!(note.is_notification());
            kinds.push(note.params.unwrap()["type"].as_str().unwrap().to_string());
        }
        assert_eq!(kinds.first().map(String::as_str), Some("progress"));
        assert!(kinds.iter().any(|k| k == "fileComplete"));
        assert_eq!(kinds.last().map(String::as_str), Some("validation"));
    }

    #[tokio::test]
    async fn test_start_then_poll_state() {
        let temp = tempdir().unwrap();
        let card = temp.path().join("card");
        std::fs::create_dir_all(card.join("DCIM")).unwrap();
        std::fs::write(card.join("DCIM/IMG_0001.JPG"), vec![7u8; 2048]).unwrap();

        let handler = handler();
        let resp = handler
            .handle(request(
                "transfer.start",
                Some(json!({
                    "source": card,
                    "destinations": {
                        "photos": temp.path().join("photos"),
                        "rawVideos": temp.path().join("raw")
                    },
                    "options": { "skipValidation": true }
                })),
            ))
            .await;

        let result = resp.result.unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["filesTransferred"], 1);

        let state = handler
            .handle(request("transfer.state", None))
            .await
            .result
            .unwrap();
        assert_eq!(state["phase"], "complete");
        assert_eq!(state["filesCompleted"], 1);
        assert_eq!(state["bytesTransferred"], 2048);

        let status = handler
            .handle(request("daemon.status", None))
            .await
            .result
            .unwrap();
        assert_eq!(status["transferActive"], false);
    }
}
