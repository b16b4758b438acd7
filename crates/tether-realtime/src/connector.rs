//! Resilient client connector.
//!
//! A [`Connector`] owns at most one outbound socket. Its control loop dials,
//! runs the read and write pumps until the socket drops, and redials forever
//! until stopped. Failed dials back off for `reconnect_interval`; a drop after
//! a successful connect redials immediately.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConnectorConfig;
use crate::error::RealtimeError;
use crate::event::{guarded, Callbacks, ConnectorEvent};
use crate::frame::{OutboundMessage, Transport};
use crate::payload::Payload;
use crate::pump::{self, WriteExit};

/// Connector state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConnectorState {
    /// Constructed, not yet running.
    Idle = 0,
    /// Attempting (or waiting to retry) a handshake.
    Dialing = 1,
    /// One live socket.
    Connected = 2,
    /// Stopped for good.
    Closed = 3,
}

impl ConnectorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectorState::Idle,
            1 => ConnectorState::Dialing,
            2 => ConnectorState::Connected,
            _ => ConnectorState::Closed,
        }
    }
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectorState::Idle => "idle",
            ConnectorState::Dialing => "dialing",
            ConnectorState::Connected => "connected",
            ConnectorState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// What a connector callback is told about an event.
#[derive(Debug, Clone)]
pub struct ConnectorContext {
    pub event: ConnectorEvent,
    /// The inbound payload for `Message`; event details otherwise.
    pub data: Payload,
    /// Failure description for `Error` and `Reconnecting`.
    pub error: Option<String>,
}

/// Connector callback. The returned payload is sent as a reply, but only for
/// `Message` events.
pub type ConnectorCallback = dyn Fn(&ConnectorContext) -> Option<Payload> + Send + Sync;

/// Client-side single-connection manager with infinite retry.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

struct ConnectorInner {
    config: ConnectorConfig,
    state: AtomicU8,
    started: AtomicBool,
    attempts: AtomicU64,
    shutdown: CancellationToken,
    sender: mpsc::Sender<Bytes>,
    receiver: Mutex<mpsc::Receiver<Bytes>>,
    callbacks: Callbacks<ConnectorEvent, ConnectorCallback>,
}

impl Connector {
    pub fn new(config: ConnectorConfig) -> Self {
        Self::build(config, CancellationToken::new())
    }

    /// A connector that also stops when `parent` is cancelled.
    pub fn with_cancellation(config: ConnectorConfig, parent: &CancellationToken) -> Self {
        Self::build(config, parent.child_token())
    }

    fn build(config: ConnectorConfig, shutdown: CancellationToken) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            inner: Arc::new(ConnectorInner {
                config,
                state: AtomicU8::new(ConnectorState::Idle as u8),
                started: AtomicBool::new(false),
                attempts: AtomicU64::new(0),
                shutdown,
                sender,
                receiver: Mutex::new(receiver),
                callbacks: Callbacks::new(),
            }),
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectorState {
        ConnectorState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectorState::Connected
    }

    /// Dial attempts since the last successful connect.
    pub fn dial_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Register a callback. Callbacks run in registration order.
    pub fn on<F>(&self, event: ConnectorEvent, callback: F)
    where
        F: Fn(&ConnectorContext) -> Option<Payload> + Send + Sync + 'static,
    {
        self.inner.callbacks.register(event, Arc::new(callback));
    }

    /// Queue a frame. Works before the first connect; frames wait for the next
    /// live socket. Dropped (and logged) when the queue is full.
    pub fn send(&self, message: impl Into<OutboundMessage>) -> Result<(), RealtimeError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(RealtimeError::Stopped);
        }
        match self.inner.sender.try_send(message.into().into_bytes()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(url = %self.inner.config.url, "Outbound queue full, dropping frame");
                Err(RealtimeError::QueueFull(self.inner.config.url.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(RealtimeError::Stopped),
        }
    }

    /// Stop for good. The control loop fires `Close` and exits.
    pub fn stop(&self) {
        self.inner.shutdown.cancel();
        if !self.inner.started.load(Ordering::SeqCst) {
            self.set_state(ConnectorState::Closed);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn start(&self) -> JoinHandle<Result<(), RealtimeError>> {
        let this = self.clone();
        tokio::spawn(async move { this.run().await })
    }

    /// Drive the control loop until stopped. May be entered once.
    pub async fn run(&self) -> Result<(), RealtimeError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(RealtimeError::AlreadyStarted);
        }

        let url = self.inner.config.url.clone();
        let mut losing_streak = false;

        while !self.inner.shutdown.is_cancelled() {
            self.set_state(ConnectorState::Dialing);
            let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;

            let dialed = tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => break,
                dialed = self.dial() => dialed,
            };

            match dialed {
                Ok(transport) => {
                    losing_streak = false;
                    self.inner.attempts.store(0, Ordering::SeqCst);
                    self.set_state(ConnectorState::Connected);
                    info!(url = %url, attempt, "Connected");
                    self.emit(ConnectorEvent::Open, Payload::new(), None);

                    self.serve(transport).await;
                    if !self.inner.shutdown.is_cancelled() {
                        info!(url = %url, "Connection lost, redialing");
                    }
                }
                Err(e) => {
                    warn!(url = %url, attempt, error = %e, "Dial failed");
                    if !losing_streak {
                        losing_streak = true;
                        let data = Payload::new().with("attempt", attempt);
                        self.emit(ConnectorEvent::Reconnecting, data, Some(e.to_string()));
                    }

                    tokio::select! {
                        biased;
                        _ = self.inner.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.inner.config.reconnect_interval) => {}
                    }
                }
            }
        }

        self.set_state(ConnectorState::Closed);
        info!(url = %url, "Connector stopped");
        self.emit(ConnectorEvent::Close, Payload::new(), None);
        Ok(())
    }

    async fn dial(&self) -> Result<Transport, RealtimeError> {
        let config = &self.inner.config;
        let connect = tokio_tungstenite::connect_async_with_config(
            config.url.as_str(),
            Some(config.websocket_config()),
            false,
        );

        match tokio::time::timeout(config.handshake_timeout, connect).await {
            Ok(Ok((ws, _response))) => Ok(Transport::from_tungstenite(ws)),
            Ok(Err(e)) => Err(RealtimeError::Handshake(e)),
            Err(_) => Err(RealtimeError::HandshakeTimeout(config.handshake_timeout)),
        }
    }

    /// Run both pumps on one socket until either side gives up.
    async fn serve(&self, transport: Transport) {
        let liveness = self.inner.config.liveness();
        let (mut sink, mut stream) = transport.into_parts();
        let socket = self.inner.shutdown.child_token();
        let mut queue = self.inner.receiver.lock().await;

        let reader = async {
            let reason = pump::read_loop(&mut stream, liveness.read_deadline, &socket, |payload| {
                self.on_message(payload)
            })
            .await;
            socket.cancel();
            reason
        };
        let writer = async {
            let exit = pump::write_loop(&mut sink, &mut queue, liveness, &socket, false).await;
            socket.cancel();
            exit
        };

        let (reason, exit) = tokio::join!(reader, writer);
        drop(queue);
        pump::close_sink(&mut sink, liveness.write_wait).await;

        if let WriteExit::Failed(e) = &exit {
            debug!(error = %e, "Write pump failed");
        }
        if reason.is_abnormal() {
            warn!(url = %self.inner.config.url, reason = %reason, "Connection closed abnormally");
            let error = reason.to_string();
            self.emit(
                ConnectorEvent::Error,
                Payload::new().with("error", error.clone()),
                Some(error),
            );
        } else {
            debug!(reason = %reason, exit = ?exit, "Pumps finished");
        }
    }

    fn on_message(&self, payload: Payload) {
        let ctx = ConnectorContext {
            event: ConnectorEvent::Message,
            data: payload,
            error: None,
        };
        for callback in self.inner.callbacks.snapshot(&ConnectorEvent::Message) {
            match guarded(|| callback(&ctx)) {
                Ok(Some(reply)) if !reply.is_empty() => {
                    let _ = self.send(reply);
                }
                Ok(_) => {}
                Err(panic) => {
                    error!(panic = %panic, "Message callback panicked");
                    let error = format!("message callback panicked: {}", panic);
                    self.emit(
                        ConnectorEvent::Error,
                        Payload::new().with("error", error.clone()),
                        Some(error),
                    );
                }
            }
        }
    }

    fn emit(&self, event: ConnectorEvent, data: Payload, error: Option<String>) {
        let ctx = ConnectorContext { event, data, error };
        for callback in self.inner.callbacks.snapshot(&event) {
            if let Err(panic) = guarded(|| callback(&ctx)) {
                error!(event = %event, panic = %panic, "Connector callback panicked");
            }
        }
    }

    fn set_state(&self, state: ConnectorState) {
        let previous = self.inner.state.swap(state as u8, Ordering::SeqCst);
        if previous != state as u8 {
            debug!(from = %ConnectorState::from_u8(previous), to = %state, "Connector state");
        }
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .field("dial_attempts", &self.dial_attempts())
            .finish()
    }
}
