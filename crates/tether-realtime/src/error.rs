//! Error types for the real-time module.

use thiserror::Error;

use crate::connection::ConnectionId;

/// Errors that can occur in real-time operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// The connection's outbound queue is saturated; the frame was dropped.
    #[error("outbound queue full for connection {0}")]
    QueueFull(ConnectionId),

    /// The connection has been shut down and accepts no more frames.
    #[error("connection closed")]
    ConnectionClosed,

    /// The WebSocket handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),

    /// The handshake did not complete within the configured limit.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    /// Transport failure on an established socket.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A connector's control loop may only be entered once.
    #[error("connector already started")]
    AlreadyStarted,

    /// The connector was stopped; no further frames are accepted.
    #[error("connector stopped")]
    Stopped,
}

/// Failures reported by a [`Transport`](crate::frame::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer or the local side already closed the socket.
    #[error("connection closed")]
    Closed,

    /// Underlying socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer violated the WebSocket protocol (bad framing, oversized message, ...).
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Build a protocol error from anything displayable.
    pub fn protocol(err: impl std::fmt::Display) -> Self {
        TransportError::Protocol(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::error::ProtocolError;
        use tokio_tungstenite::tungstenite::Error as WsError;

        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
            // Peer vanished without a close frame (close code 1006).
            WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                TransportError::Closed
            }
            WsError::Io(e) => TransportError::Io(e),
            other => TransportError::protocol(other),
        }
    }
}
