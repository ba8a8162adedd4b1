//! TCP transport with newline-delimited JSON framing.
//!
//! Each connection is handled in its own task, so a long `transfer.start`
//! call does not block `transfer.state` polls from other clients. While a
//! request runs, its notifications are written to the same connection, all
//! before the response.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::methods::MethodHandler;
use super::protocol::{Request, Response};

pub struct Transport {
    listener: TcpListener,
    handler: Arc<MethodHandler>,
}

impl Transport {
    pub fn new(listener: TcpListener, handler: MethodHandler) -> Self {
        Self {
            listener,
            handler: Arc::new(handler),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn listen(&self, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        info!(addr = %self.local_addr()?, "RPC server listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let handler = self.handler.clone();
                            let span = info_span!("rpc_connection", %peer);
                            tokio::spawn(
                                async move {
                                    debug!("Client connected");
                                    if let Err(e) = serve_connection(stream, handler).await {
                                        debug!(error = %e, "Connection error");
                                    }
                                    debug!("Client disconnected");
                                }
                                .instrument(span),
                            );
                        }
                        Err(e) => error!(error = %e, "Failed to accept connection"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("RPC server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn serve_connection(stream: TcpStream, handler: Arc<MethodHandler>) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(line) {
            Ok(request) => match request.validate() {
                Err(msg) => {
                    warn!(error = msg, "Invalid request");
                    Response::invalid_request(request.id.unwrap_or(serde_json::Value::Null))
                }
                Ok(()) if request.is_notification() => {
                    debug!(method = %request.method, "Notification received");
                    handler.handle(request).await;
                    continue;
                }
                Ok(()) => {
                    debug!(method = %request.method, "Request received");
                    let (notifications, mut outgoing) = mpsc::unbounded_channel();
                    let handling = handler.handle_streaming(request, notifications);
                    tokio::pin!(handling);

                    // Keep driving the handler after the client goes away;
                    // later notifications are dropped.
                    let mut client_gone = false;
                    let response = loop {
                        tokio::select! {
                            biased;
                            Some(note) = outgoing.recv() => {
                                if !client_gone {
                                    if let Err(e) = write_message(&mut writer, &note).await {
                                        debug!(error = %e, "Dropping notifications for closed connection");
                                        client_gone = true;
                                    }
                                }
                            }
                            response = &mut handling => break response,
                        }
                    };
                    if client_gone {
                        return Ok(());
                    }
                    while let Ok(note) = outgoing.try_recv() {
                        write_message(&mut writer, &note).await?;
                    }
                    response
                }
            },
            Err(e) => {
                warn!(error = %e, "Parse error");
                Response::parse_error()
            }
        };

        write_message(&mut writer, &response).await?;
    }

    Ok(())
}

async fn write_message<W, T>(writer: &mut W, message: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut payload = serde_json::to_string(message)?;
    payload.push('\n');
    writer.write_all(payload.as_bytes()).await?;
    Ok(())
}
