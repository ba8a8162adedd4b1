//! JSON-RPC 2.0 host interface.
//!
//! Hosts drive batches and poll their state over TCP with newline-delimited
//! JSON. A batch request blocks its connection until the batch finishes,
//! streaming `transfer.event` notifications ahead of the response; other
//! connections can keep polling `transfer.state` meanwhile.

pub mod client;
pub mod methods;
mod protocol;
mod transport;

use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::context::AppContext;
use transport::Transport;

pub use client::{ClientError, RpcClient};
pub use methods::MethodHandler;
pub use protocol::{Request, Response, RpcError, TRANSFER_IN_PROGRESS};

pub struct RpcServer {
    transport: Transport,
    shutdown_tx: broadcast::Sender<()>,
}

impl RpcServer {
    /// Bind the listener. Port 0 picks a free port; see [`RpcServer::local_addr`].
    pub async fn bind(ctx: AppContext, bind_addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        let transport = Transport::new(listener, MethodHandler::new(ctx));
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            transport,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }

    /// Serve connections until [`RpcServer::shutdown`] is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.transport.listen(shutdown_rx).await
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
