//! Server-side connection state and its read/write pumps.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Liveness;
use crate::error::RealtimeError;
use crate::event::{guarded, Callbacks, LifecycleEvent};
use crate::frame::{FrameSink, FrameStream, OutboundMessage};
use crate::hub::Hub;
use crate::payload::Payload;
use crate::pump;

/// Unique identifier for a connection: 32 hex digits, no separators.
pub type ConnectionId = String;

/// Generate a fresh connection identifier.
pub fn new_connection_id() -> ConnectionId {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Callback for [`LifecycleEvent`]s. The payload carries event data
/// (`{"error": ...}` for errors, empty otherwise).
pub type LifecycleCallback = dyn Fn(&Connection, &Payload) + Send + Sync;

/// Application handler for inbound messages.
///
/// Returning a non-empty payload queues it as a reply on the same connection.
/// Implementations must not block for long: the connection's read pump waits
/// on them.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, conn: &Connection, payload: Payload) -> Option<Payload>;
}

impl<F> MessageHandler for F
where
    F: Fn(&Connection, Payload) -> Option<Payload> + Send + Sync + 'static,
{
    fn handle(&self, conn: &Connection, payload: Payload) -> Option<Payload> {
        self(conn, payload)
    }
}

/// Handle for receiving a connection's outbound frames.
pub type ConnectionReceiver = mpsc::Receiver<Bytes>;

/// A live duplex connection: identity, bounded outbound queue and callbacks.
pub struct Connection {
    /// Unique connection identifier.
    pub id: ConnectionId,
    /// Connection metadata.
    pub metadata: ConnectionMetadata,
    sender: mpsc::Sender<Bytes>,
    capacity: usize,
    shutdown: CancellationToken,
    callbacks: Callbacks<LifecycleEvent, LifecycleCallback>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        capacity: usize,
        metadata: ConnectionMetadata,
    ) -> (Arc<Self>, ConnectionReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let conn = Arc::new(Self {
            id,
            metadata,
            sender,
            capacity: capacity.max(1),
            shutdown: CancellationToken::new(),
            callbacks: Callbacks::new(),
        });
        (conn, receiver)
    }

    /// Create a connection with no socket behind it.
    ///
    /// Frames sent to it land on the returned receiver. Useful for in-process
    /// consumers and tests that exercise the hub without a network.
    pub fn detached(id: ConnectionId, capacity: usize) -> (Arc<Self>, ConnectionReceiver) {
        Self::new(id, capacity, ConnectionMetadata::now(None))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a frame for the write pump.
    ///
    /// Never blocks: if the queue is full the frame is dropped and logged.
    pub fn send(&self, message: impl Into<OutboundMessage>) -> Result<(), RealtimeError> {
        match self.try_enqueue(message.into().into_bytes()) {
            Ok(()) => Ok(()),
            Err(EnqueueError::Full) => {
                warn!(client_id = %self.id, "Outbound queue full, dropping frame");
                Err(RealtimeError::QueueFull(self.id.clone()))
            }
            Err(EnqueueError::Closed) => Err(RealtimeError::ConnectionClosed),
        }
    }

    pub(crate) fn try_enqueue(&self, data: Bytes) -> Result<(), EnqueueError> {
        if self.shutdown.is_cancelled() {
            return Err(EnqueueError::Closed);
        }
        self.sender.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Register a lifecycle callback. Callbacks run in registration order.
    pub fn on<F>(&self, event: LifecycleEvent, callback: F)
    where
        F: Fn(&Connection, &Payload) + Send + Sync + 'static,
    {
        self.callbacks.register(event, Arc::new(callback));
    }

    /// Start a graceful shutdown: queued frames are flushed, a close frame is
    /// sent and the socket released. Idempotent.
    pub fn close(&self) {
        if !self.shutdown.is_cancelled() {
            debug!(client_id = %self.id, "Closing connection");
        }
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Number of frames waiting in the outbound queue.
    pub fn queued(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn queue_capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn emit(&self, event: LifecycleEvent, data: &Payload) {
        for callback in self.callbacks.snapshot(&event) {
            if let Err(panic) = guarded(|| callback(self, data)) {
                error!(client_id = %self.id, event = %event, panic = %panic, "Lifecycle callback panicked");
            }
        }
    }

    fn dispatch(&self, handler: &dyn MessageHandler, payload: Payload) {
        match guarded(|| handler.handle(self, payload)) {
            Ok(Some(reply)) if !reply.is_empty() => {
                let _ = self.send(reply);
            }
            Ok(_) => {}
            Err(panic) => {
                error!(client_id = %self.id, panic = %panic, "Message handler panicked");
                let data = Payload::new().with("error", format!("message handler panicked: {}", panic));
                self.emit(LifecycleEvent::Error, &data);
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("metadata", &self.metadata)
            .field("queued", &self.queued())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnqueueError {
    Full,
    Closed,
}

/// Metadata about a connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionMetadata {
    /// When the connection was accepted (Unix timestamp).
    pub connected_at: u64,
    /// Peer address, when the transport exposes one.
    pub remote_addr: Option<SocketAddr>,
}

impl ConnectionMetadata {
    /// Create metadata with current timestamp.
    pub fn now(remote_addr: Option<SocketAddr>) -> Self {
        Self {
            connected_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            remote_addr,
        }
    }
}

/// Read pump: dispatches inbound payloads, then tears the connection down.
pub(crate) async fn read_pump(
    conn: Arc<Connection>,
    mut stream: FrameStream,
    hub: Hub,
    handler: Arc<dyn MessageHandler>,
    liveness: Liveness,
) {
    let shutdown = conn.shutdown.clone();
    let reason = pump::read_loop(&mut stream, liveness.read_deadline, &shutdown, |payload| {
        conn.dispatch(handler.as_ref(), payload)
    })
    .await;

    conn.close();

    if reason.is_abnormal() {
        warn!(client_id = %conn.id, reason = %reason, "Connection closed abnormally");
        let data = Payload::new().with("error", reason.to_string());
        conn.emit(LifecycleEvent::Error, &data);
    } else {
        debug!(client_id = %conn.id, reason = %reason, "Read pump finished");
    }
    conn.emit(LifecycleEvent::Close, &Payload::new());

    hub.detach(&conn);
    info!(client_id = %conn.id, "Client disconnected");
}

/// Write pump: drains the outbound queue and pings until teardown.
pub(crate) async fn write_pump(
    conn: Arc<Connection>,
    mut sink: FrameSink,
    mut queue: ConnectionReceiver,
    liveness: Liveness,
) {
    let exit = pump::write_loop(&mut sink, &mut queue, liveness, &conn.shutdown, true).await;
    debug!(client_id = %conn.id, exit = ?exit, "Write pump finished");

    conn.close();
    pump::close_sink(&mut sink, liveness.write_wait).await;
}
