//! # Tether Real-time
//!
//! WebSocket connection hub and resilient client connector.
//!
//! The server side accepts many concurrent duplex sockets, registers each as a
//! [`Connection`] with a single [`Hub`], and runs a read and a write pump per
//! socket. The client side is a [`Connector`] that keeps one outbound socket
//! alive against an unreliable network, redialing until stopped.
//!
//! ## Features
//!
//! - **Hub**: one command loop serializes registration, unregistration and fan-out
//! - **Backpressure**: bounded per-connection queues; a full queue drops the frame,
//!   and a broadcast evicts the stalled recipient
//! - **Liveness**: periodic pings and an idle-read deadline on both sides
//! - **Connector**: `Idle -> Dialing -> Connected -> Closed` state machine with
//!   unbounded retry and queueing before the first connect
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether_realtime::{Connection, Hub, HubConfig, LifecycleEvent, Payload};
//! use tokio::net::TcpListener;
//!
//! # async fn serve() -> Result<(), Box<dyn std::error::Error>> {
//! let hub = Hub::start(HubConfig::default());
//! let echo = Arc::new(|_: &Connection, payload: Payload| Some(payload));
//!
//! let listener = TcpListener::bind("127.0.0.1:8080").await?;
//! loop {
//!     let (socket, addr) = listener.accept().await?;
//!     let conn = hub.accept(socket, Some(addr), echo.clone()).await?;
//!     conn.on(LifecycleEvent::Close, |conn, _| println!("{} left", conn.id));
//! }
//! # }
//! ```
//!
//! ## Wire Format
//!
//! Application messages are JSON objects in text frames. Anything that does not
//! decode to an object is delivered as an empty [`Payload`] rather than closing
//! the connection. Ping, pong and close frames never reach handlers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                    Hub                        │
//! │  commands ──► loop ──► clients map            │
//! │  (register, unregister, send_to, broadcast)   │
//! └──────────────┬───────────────────────────────┘
//!                │ bounded queue per connection
//!   ┌────────────▼────────────┐
//!   │       Connection         │
//!   │  read pump   write pump  │
//!   └────────────┬────────────┘
//!                │ Transport (Frame sink + stream)
//!                ▼
//!             socket
//! ```

pub mod config;
pub mod connection;
pub mod connector;
pub mod error;
pub mod event;
pub mod frame;
pub mod hub;
pub mod payload;
mod pump;
pub mod upgrade;

// Re-export main types
pub use config::{
    ConnectorConfig, HubConfig, DEFAULT_CONNECTION_QUEUE, DEFAULT_CONNECTOR_QUEUE,
    DEFAULT_MAX_MESSAGE_SIZE,
};
pub use connection::{
    new_connection_id, Connection, ConnectionId, ConnectionMetadata, ConnectionReceiver,
    LifecycleCallback, MessageHandler,
};
pub use connector::{Connector, ConnectorCallback, ConnectorContext, ConnectorState};
pub use error::{RealtimeError, TransportError};
pub use event::{ConnectorEvent, LifecycleEvent};
pub use frame::{
    CloseReason, Frame, FrameSink, FrameStream, OutboundMessage, Transport, CLOSE_GOING_AWAY,
    CLOSE_NORMAL,
};
pub use hub::{Hub, HubStats};
pub use payload::Payload;
pub use upgrade::{accept_connection, PendingConnection};

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_public_api() {
        let hub = Hub::start(HubConfig::default());
        assert_eq!(hub.count(), 0);
        assert_eq!(hub.stats(), HubStats::default());
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_flow() {
        let hub = Hub::start(HubConfig::default());

        // Connect
        let (conn, mut rx) = Connection::detached(new_connection_id(), 8);
        hub.register(conn.clone());
        hub.flush().await;
        assert_eq!(hub.count(), 1);

        // Direct and broadcast delivery
        hub.send_to(&conn.id, Payload::new().with("type", "notification"));
        hub.broadcast(serde_json::json!({"type": "broadcast"}));
        hub.flush().await;

        let first = Payload::from_bytes(&rx.try_recv().unwrap());
        let second = Payload::from_bytes(&rx.try_recv().unwrap());
        assert_eq!(first.get_str("type"), "notification");
        assert_eq!(second.get_str("type"), "broadcast");

        // Disconnect
        hub.close(&conn.id);
        hub.flush().await;
        assert_eq!(hub.count(), 0);
        assert!(conn.is_closed());
    }
}
