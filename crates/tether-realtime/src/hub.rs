//! Connection hub: the single registry of live connections.
//!
//! Membership changes and fan-out sends flow through one command loop, so
//! they are totally ordered. Only that loop writes the client map; readers
//! (`count`, `get_connection`, `stats`) take a shared lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::connection::{
    read_pump, write_pump, Connection, ConnectionId, EnqueueError, MessageHandler,
};
use crate::error::RealtimeError;
use crate::event::LifecycleEvent;
use crate::frame::OutboundMessage;
use crate::payload::Payload;
use crate::upgrade::{accept_connection, PendingConnection};

enum Command {
    Register(Arc<Connection>),
    Unregister(ConnectionId),
    Detach(Arc<Connection>),
    SendTo(ConnectionId, Bytes),
    Broadcast(Bytes),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Handle to a running hub. Cheap to clone; every clone drives the same loop.
#[derive(Debug, Clone)]
pub struct Hub {
    commands: mpsc::UnboundedSender<Command>,
    state: Arc<HubState>,
    config: Arc<HubConfig>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

#[derive(Debug, Default)]
struct HubState {
    clients: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    total_connections: AtomicU64,
    total_messages_sent: AtomicU64,
    total_broadcasts: AtomicU64,
    dropped_frames: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Register(conn) => write!(f, "Register({})", conn.id),
            Command::Unregister(id) => write!(f, "Unregister({})", id),
            Command::Detach(conn) => write!(f, "Detach({})", conn.id),
            Command::SendTo(id, data) => write!(f, "SendTo({}, {} bytes)", id, data.len()),
            Command::Broadcast(data) => write!(f, "Broadcast({} bytes)", data.len()),
            Command::Flush(_) => write!(f, "Flush"),
            Command::Shutdown => write!(f, "Shutdown"),
        }
    }
}

impl Hub {
    /// Create a hub and spawn its command loop on the current runtime.
    pub fn start(config: HubConfig) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(HubState::default());
        let task = tokio::spawn(run_loop(state.clone(), receiver));

        info!(
            ping_interval = ?config.ping_interval,
            pong_wait = ?config.pong_wait,
            queue_capacity = config.queue_capacity,
            "Hub started"
        );

        Self {
            commands,
            state,
            config: Arc::new(config),
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Settings applied to every connection of this hub.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    fn submit(&self, command: Command) -> bool {
        match self.commands.send(command) {
            Ok(()) => true,
            Err(mpsc::error::SendError(command)) => {
                debug!(command = ?command, "Hub stopped, command ignored");
                if let Command::Register(conn) = command {
                    conn.close();
                }
                false
            }
        }
    }

    /// Add a connection to the live set.
    ///
    /// After shutdown the connection is closed instead.
    pub fn register(&self, conn: Arc<Connection>) {
        self.submit(Command::Register(conn));
    }

    /// Remove a connection and close it. No-op for unknown ids.
    pub fn unregister(&self, id: &str) {
        self.submit(Command::Unregister(id.to_string()));
    }

    /// Remove `conn` if it is still the one registered under its id.
    pub(crate) fn detach(&self, conn: &Arc<Connection>) {
        self.submit(Command::Detach(conn.clone()));
    }

    /// Queue a frame for one connection. Unknown ids are ignored.
    pub fn send_to(&self, id: &str, message: impl Into<OutboundMessage>) {
        self.submit(Command::SendTo(id.to_string(), message.into().into_bytes()));
    }

    /// Queue a frame for every live connection, evicting any whose queue is full.
    pub fn broadcast(&self, message: impl Into<OutboundMessage>) {
        self.submit(Command::Broadcast(message.into().into_bytes()));
    }

    /// Disconnect a client: queued frames are flushed before the close frame.
    pub fn close(&self, id: &str) {
        self.unregister(id);
    }

    /// Look up a live connection.
    pub fn get_connection(&self, id: &str) -> Option<Arc<Connection>> {
        self.state.clients.read().get(id).cloned()
    }

    /// Point-in-time number of live connections.
    pub fn count(&self) -> usize {
        self.state.clients.read().len()
    }

    /// Ids of every live connection.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.state.clients.read().keys().cloned().collect()
    }

    /// Wait until every command submitted before this call has been processed.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.submit(Command::Flush(done)) {
            let _ = wait.await;
        }
    }

    /// Close every connection and stop the loop. Later commands are no-ops.
    pub async fn shutdown(&self) {
        self.submit(Command::Shutdown);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Hub loop ended abnormally");
            }
            info!("Hub stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Hub statistics.
    pub fn stats(&self) -> HubStats {
        HubStats {
            current_connections: self.count(),
            total_connections: self.state.total_connections.load(Ordering::Relaxed),
            total_messages_sent: self.state.total_messages_sent.load(Ordering::Relaxed),
            total_broadcasts: self.state.total_broadcasts.load(Ordering::Relaxed),
            dropped_frames: self.state.dropped_frames.load(Ordering::Relaxed),
            evictions: self.state.evictions.load(Ordering::Relaxed),
        }
    }

    /// Register an upgraded connection, fire `Open` and start its pumps.
    pub fn attach(
        &self,
        pending: PendingConnection,
        handler: Arc<dyn MessageHandler>,
    ) -> Arc<Connection> {
        let PendingConnection {
            connection,
            transport,
            receiver,
        } = pending;
        let (sink, stream) = transport.into_parts();
        let liveness = self.config.liveness();

        self.register(connection.clone());
        info!(
            client_id = %connection.id,
            remote_addr = ?connection.metadata.remote_addr,
            "Client connected"
        );
        connection.emit(LifecycleEvent::Open, &Payload::new());

        tokio::spawn(write_pump(connection.clone(), sink, receiver, liveness));
        tokio::spawn(read_pump(
            connection.clone(),
            stream,
            self.clone(),
            handler,
            liveness,
        ));

        connection
    }

    /// Perform the handshake on a raw socket, then [`attach`](Self::attach) it.
    pub async fn accept<S>(
        &self,
        stream: S,
        remote_addr: Option<SocketAddr>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Arc<Connection>, RealtimeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let pending = accept_connection(stream, remote_addr, &self.config).await?;
        Ok(self.attach(pending, handler))
    }
}

async fn run_loop(state: Arc<HubState>, mut commands: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Register(conn) => state.register(conn),
            Command::Unregister(id) => state.unregister(&id),
            Command::Detach(conn) => state.detach(&conn),
            Command::SendTo(id, data) => state.send_to(&id, data),
            Command::Broadcast(data) => state.broadcast(data),
            Command::Flush(done) => {
                let _ = done.send(());
            }
            Command::Shutdown => break,
        }
    }

    commands.close();
    state.close_all();

    while let Ok(command) = commands.try_recv() {
        match command {
            Command::Register(conn) => conn.close(),
            Command::Flush(done) => {
                let _ = done.send(());
            }
            _ => {}
        }
    }
}

impl HubState {
    fn register(&self, conn: Arc<Connection>) {
        let previous = self.clients.write().insert(conn.id.clone(), conn.clone());
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, &conn) {
                warn!(client_id = %conn.id, "Duplicate connection id, closing previous");
                previous.close();
            }
        }
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        debug!(client_id = %conn.id, "Client registered");
    }

    fn unregister(&self, id: &str) {
        if let Some(conn) = self.clients.write().remove(id) {
            conn.close();
            debug!(client_id = %id, "Client unregistered");
        }
    }

    fn detach(&self, conn: &Arc<Connection>) {
        let mut clients = self.clients.write();
        if clients.get(&conn.id).is_some_and(|c| Arc::ptr_eq(c, conn)) {
            clients.remove(&conn.id);
            debug!(client_id = %conn.id, "Client detached");
        }
    }

    fn send_to(&self, id: &str, data: Bytes) {
        let Some(conn) = self.clients.read().get(id).cloned() else {
            debug!(client_id = %id, "Send to unknown client ignored");
            return;
        };

        match conn.try_enqueue(data) {
            Ok(()) => {
                self.total_messages_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(EnqueueError::Full) => {
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                warn!(client_id = %id, "Outbound queue full, dropping frame");
            }
            Err(EnqueueError::Closed) => {}
        }
    }

    fn broadcast(&self, data: Bytes) {
        let recipients: Vec<Arc<Connection>> = self.clients.read().values().cloned().collect();
        let mut delivered = 0usize;
        let mut evicted = Vec::new();

        for conn in recipients {
            match conn.try_enqueue(data.clone()) {
                Ok(()) => delivered += 1,
                Err(EnqueueError::Full) => evicted.push(conn),
                Err(EnqueueError::Closed) => {}
            }
        }

        if !evicted.is_empty() {
            let mut clients = self.clients.write();
            for conn in &evicted {
                clients.remove(&conn.id);
            }
        }
        for conn in evicted {
            self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            warn!(
                client_id = %conn.id,
                reason = "backpressure",
                queued = conn.queued(),
                "Evicting stalled client"
            );
            conn.close();
        }

        self.total_broadcasts.fetch_add(1, Ordering::Relaxed);
        self.total_messages_sent
            .fetch_add(delivered as u64, Ordering::Relaxed);
        debug!(recipients = delivered, "Broadcast queued");
    }

    fn close_all(&self) {
        let clients: Vec<Arc<Connection>> = self.clients.write().drain().map(|(_, c)| c).collect();
        for conn in &clients {
            conn.close();
        }
        if !clients.is_empty() {
            info!(count = clients.len(), "Closed all connections");
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStats {
    /// Current number of connections.
    pub current_connections: usize,
    /// Total connections since start.
    pub total_connections: u64,
    /// Frames queued on connections, broadcast copies included.
    pub total_messages_sent: u64,
    /// Broadcasts processed.
    pub total_broadcasts: u64,
    /// Frames dropped because a queue was full.
    pub dropped_frames: u64,
    /// Clients removed because a broadcast found their queue full.
    pub evictions: u64,
}
