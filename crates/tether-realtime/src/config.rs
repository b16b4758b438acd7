//! Configuration for the hub and the connector.

use std::time::Duration;

use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

/// Default maximum inbound message size (512 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 512 * 1024;

/// Default outbound queue capacity for server-side connections.
pub const DEFAULT_CONNECTION_QUEUE: usize = 256;

/// Default outbound queue capacity for the client connector.
pub const DEFAULT_CONNECTOR_QUEUE: usize = 100;

/// Server-side connection settings shared by every connection of a hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// How often the write pump sends a ping.
    pub ping_interval: Duration,
    /// Idle-read deadline; should be 2-3x `ping_interval` to tolerate a missed ping.
    pub pong_wait: Duration,
    /// Deadline for a single frame write.
    pub write_wait: Duration,
    /// Largest accepted inbound message.
    pub max_message_size: usize,
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
    /// Send pings and enforce the idle-read deadline.
    pub enable_ping: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            queue_capacity: DEFAULT_CONNECTION_QUEUE,
            enable_ping: true,
        }
    }
}

impl HubConfig {
    pub(crate) fn liveness(&self) -> Liveness {
        Liveness {
            ping_interval: self.enable_ping.then_some(self.ping_interval),
            read_deadline: self.enable_ping.then_some(self.pong_wait),
            write_wait: self.write_wait,
        }
    }

    pub(crate) fn websocket_config(&self) -> WebSocketConfig {
        websocket_config(self.max_message_size)
    }
}

/// Client-side connector settings.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Target `ws://` URL.
    pub url: String,
    /// Delay between failed dial attempts.
    pub reconnect_interval: Duration,
    /// How often the write pump sends a ping.
    pub ping_interval: Duration,
    /// Idle-read deadline; 3x `ping_interval` by default.
    pub read_wait: Duration,
    /// Deadline for a single frame write.
    pub write_wait: Duration,
    /// Limit on the opening handshake.
    pub handshake_timeout: Duration,
    /// Largest accepted inbound message.
    pub max_message_size: usize,
    /// Outbound queue capacity, shared across reconnects.
    pub queue_capacity: usize,
    /// Send pings and enforce the idle-read deadline.
    pub enable_ping: bool,
}

impl ConnectorConfig {
    /// Defaults for the given target.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_interval: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
            read_wait: Duration::from_secs(90),
            write_wait: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            queue_capacity: DEFAULT_CONNECTOR_QUEUE,
            enable_ping: true,
        }
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Set the ping interval and derive a read deadline of three intervals.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self.read_wait = interval * 3;
        self
    }

    pub fn with_ping(mut self, enabled: bool) -> Self {
        self.enable_ping = enabled;
        self
    }

    pub(crate) fn liveness(&self) -> Liveness {
        Liveness {
            ping_interval: self.enable_ping.then_some(self.ping_interval),
            read_deadline: self.enable_ping.then_some(self.read_wait),
            write_wait: self.write_wait,
        }
    }

    pub(crate) fn websocket_config(&self) -> WebSocketConfig {
        websocket_config(self.max_message_size)
    }
}

/// Timing knobs the pumps need, resolved from either config.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Liveness {
    /// `None` disables pings.
    pub ping_interval: Option<Duration>,
    /// `None` disables the idle-read deadline.
    pub read_deadline: Option<Duration>,
    pub write_wait: Duration,
}

fn websocket_config(max_message_size: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message_size);
    config.max_frame_size = Some(max_message_size);
    config
}
