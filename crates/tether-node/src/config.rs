//! Node configuration types.
//!
//! The node reads an optional YAML file; command-line flags override file
//! values. Every field has a default, so an empty file is a valid config.
//!
//! ```yaml
//! api_addr: "127.0.0.1:8080"
//! log_level: info
//! log_format: pretty
//! ping_interval_ms: 30000
//! pong_wait_ms: 60000
//! write_wait_ms: 10000
//! max_message_size: 524288
//! queue_capacity: 256
//! enable_ping: true
//! heartbeat_interval_secs: 30
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_realtime::{HubConfig, DEFAULT_CONNECTION_QUEUE, DEFAULT_MAX_MESSAGE_SIZE};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::observability::LogFormat;

/// Errors loading the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] ValidationErrors),
}

/// Configuration for a tether node.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_liveness"))]
pub struct NodeConfig {
    /// HTTP listen address.
    pub api_addr: SocketAddr,
    /// Log level.
    #[validate(custom(function = "validate_log_level"))]
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,

    /// How often each connection is pinged.
    #[validate(range(min = 10, max = 3_600_000))]
    pub ping_interval_ms: u64,
    /// Idle-read deadline; must exceed the ping interval.
    #[validate(range(min = 10, max = 3_600_000))]
    pub pong_wait_ms: u64,
    /// Deadline for a single frame write.
    #[validate(range(min = 10, max = 600_000))]
    pub write_wait_ms: u64,
    /// Largest accepted inbound message.
    #[validate(range(min = 1024, max = 67_108_864))]
    pub max_message_size: usize,
    /// Outbound queue capacity per connection.
    #[validate(range(min = 1, max = 65_536))]
    pub queue_capacity: usize,
    /// Send pings and enforce the idle-read deadline.
    pub enable_ping: bool,

    /// Server-time broadcast interval; 0 disables it.
    pub heartbeat_interval_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let hub = HubConfig::default();
        Self {
            api_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            ping_interval_ms: hub.ping_interval.as_millis() as u64,
            pong_wait_ms: hub.pong_wait.as_millis() as u64,
            write_wait_ms: hub.write_wait.as_millis() as u64,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            queue_capacity: DEFAULT_CONNECTION_QUEUE,
            enable_ping: hub.enable_ping,
            heartbeat_interval_secs: 30,
        }
    }
}

impl NodeConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(source: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml(&source)
    }

    /// Settings for the hub and its connections.
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            ping_interval: Duration::from_millis(self.ping_interval_ms),
            pong_wait: Duration::from_millis(self.pong_wait_ms),
            write_wait: Duration::from_millis(self.write_wait_ms),
            max_message_size: self.max_message_size,
            queue_capacity: self.queue_capacity,
            enable_ping: self.enable_ping,
        }
    }

    /// Heartbeat period, or `None` when disabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }
}

fn validate_liveness(config: &NodeConfig) -> Result<(), ValidationError> {
    if config.enable_ping && config.pong_wait_ms <= config.ping_interval_ms {
        let mut err = ValidationError::new("pong_wait");
        err.message = Some("pong_wait_ms must be greater than ping_interval_ms".into());
        return Err(err);
    }
    Ok(())
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => {
            let mut err = ValidationError::new("log_level");
            err.message = Some("Log level must be one of trace, debug, info, warn, error".into());
            Err(err)
        }
    }
}
