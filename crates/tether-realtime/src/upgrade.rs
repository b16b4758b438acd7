//! Upgrade boundary: turns an accepted socket into a connection ready for the hub.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::config::HubConfig;
use crate::connection::{
    new_connection_id, Connection, ConnectionId, ConnectionMetadata, ConnectionReceiver,
};
use crate::error::RealtimeError;
use crate::event::LifecycleEvent;
use crate::frame::Transport;
use crate::payload::Payload;

/// An upgraded socket wrapped in a fresh [`Connection`], not yet registered.
///
/// Callbacks registered here are in place before the hub fires `Open`.
#[derive(Debug)]
pub struct PendingConnection {
    pub(crate) connection: Arc<Connection>,
    pub(crate) transport: Transport,
    pub(crate) receiver: ConnectionReceiver,
}

impl PendingConnection {
    /// Wrap a socket an HTTP framework has already upgraded.
    pub fn new(transport: Transport, config: &HubConfig, remote_addr: Option<SocketAddr>) -> Self {
        let (connection, receiver) = Connection::new(
            new_connection_id(),
            config.queue_capacity,
            ConnectionMetadata::now(remote_addr),
        );
        Self {
            connection,
            transport,
            receiver,
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn id(&self) -> &ConnectionId {
        &self.connection.id
    }

    /// Register a lifecycle callback before the connection goes live.
    pub fn on<F>(&self, event: LifecycleEvent, callback: F)
    where
        F: Fn(&Connection, &Payload) + Send + Sync + 'static,
    {
        self.connection.on(event, callback);
    }
}

/// Run the server side of the WebSocket handshake on a raw socket.
///
/// Failures are returned for the caller to log; nothing is retried here.
pub async fn accept_connection<S>(
    stream: S,
    remote_addr: Option<SocketAddr>,
    config: &HubConfig,
) -> Result<PendingConnection, RealtimeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws = tokio_tungstenite::accept_async_with_config(stream, Some(config.websocket_config()))
        .await
        .map_err(|e| {
            warn!(remote_addr = ?remote_addr, error = %e, "WebSocket handshake failed");
            RealtimeError::Handshake(e)
        })?;

    let pending = PendingConnection::new(Transport::from_tungstenite(ws), config, remote_addr);
    debug!(client_id = %pending.id(), remote_addr = ?remote_addr, "WebSocket upgraded");
    Ok(pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::Message;

    #[tokio::test]
    async fn test_accept_connection_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
                .await
                .unwrap();
            ws.send(Message::Text("hi".to_string())).await.unwrap();
            ws
        });

        let (socket, peer) = listener.accept().await.unwrap();
        let pending = accept_connection(socket, Some(peer), &HubConfig::default())
            .await
            .unwrap();

        assert_eq!(pending.id().len(), 32);
        assert_eq!(pending.connection().metadata.remote_addr, Some(peer));
        assert_eq!(pending.connection().queue_capacity(), 256);

        let (_sink, mut stream) = pending.transport.into_parts();
        let frame = stream.next().await.unwrap().unwrap();
        assert_eq!(frame, crate::frame::Frame::Text("hi".to_string()));

        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_accept_connection_rejects_plain_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let mut socket = TcpStream::connect(addr).await.unwrap();
            socket
                .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .unwrap();
            let _ = socket.shutdown().await;
        });

        let (socket, peer) = listener.accept().await.unwrap();
        let result = accept_connection(socket, Some(peer), &HubConfig::default()).await;
        assert!(matches!(result, Err(RealtimeError::Handshake(_))));
    }
}
