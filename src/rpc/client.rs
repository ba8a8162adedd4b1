//! Client side of the host interface, used by `cfex-ingest status` and `transfer --remote`.

use std::net::SocketAddr;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::protocol::{Request, Response, RpcError, TRANSFER_EVENT};
use crate::core::{BatchRequest, TransferState};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to daemon: {0}")]
    Connect(#[source] std::io::Error),

    #[error("Communication error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Daemon closed the connection without responding")]
    Closed,

    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),
}

pub struct RpcClient {
    addr: SocketAddr,
}

impl RpcClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// One request per connection.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, ClientError> {
        self.call_streaming(method, params, |_| {}).await
    }

    /// Like [`RpcClient::call`], handing every notification received before
    /// the response to `on_notification`.
    pub async fn call_streaming<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
        mut on_notification: impl FnMut(Request),
    ) -> Result<T, ClientError> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(ClientError::Connect)?;
        let (reader, mut writer) = stream.into_split();

        let request = Request {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: Some(Value::Number(1.into())),
        };
        let mut payload = serde_json::to_string(&request)?;
        payload.push('\n');
        writer.write_all(payload.as_bytes()).await?;

        let mut lines = BufReader::new(reader).lines();
        let response = loop {
            let Some(line) = lines.next_line().await? else {
                return Err(ClientError::Closed);
            };
            let message: Value = serde_json::from_str(&line)?;
            if message.get("id").is_some() {
                break serde_json::from_value::<Response>(message)?;
            }
            on_notification(serde_json::from_value(message)?);
        };

        if let Some(error) = response.error {
            return Err(ClientError::Rpc(error));
        }
        Ok(serde_json::from_value(response.result.unwrap_or(Value::Null))?)
    }

    pub async fn transfer_state(&self) -> Result<TransferState, ClientError> {
        self.call("transfer.state", None).await
    }

    /// Blocks until the daemon finishes the batch. Batch events arrive as
    /// their JSON payload, in order.
    pub async fn start_transfer(
        &self,
        request: &BatchRequest,
        mut on_event: impl FnMut(Value),
    ) -> Result<Value, ClientError> {
        self.call_streaming(
            "transfer.start",
            Some(serde_json::to_value(request)?),
            |note| {
                if note.method == TRANSFER_EVENT {
                    if let Some(event) = note.params {
                        on_event(event);
                    }
                }
            },
        )
        .await
    }
}
