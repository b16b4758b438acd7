//! Tether Node - WebSocket hub server.
//!
//! This is the main entry point for running a tether node.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tether_node::api::{create_router, AppState};
use tether_node::config::NodeConfig;
use tether_node::heartbeat::spawn_heartbeat;
use tether_node::observability::{init_logging, LogFormat};
use tether_realtime::Hub;
use tokio_util::sync::CancellationToken;
use validator::Validate;

/// Tether Node - WebSocket connection hub
#[derive(Parser, Debug)]
#[command(name = "tether-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API listen address
    #[arg(long)]
    api_addr: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Ping interval in milliseconds
    #[arg(long)]
    ping_interval_ms: Option<u64>,

    /// Idle-read deadline in milliseconds
    #[arg(long)]
    pong_wait_ms: Option<u64>,

    /// Outbound queue capacity per connection
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Heartbeat broadcast interval in seconds (0 disables)
    #[arg(long)]
    heartbeat_secs: Option<u64>,

    /// Disable liveness pings and the idle-read deadline
    #[arg(long)]
    no_ping: bool,
}

impl Args {
    fn apply(&self, config: &mut NodeConfig) {
        if let Some(addr) = self.api_addr {
            config.api_addr = addr;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if let Some(ms) = self.ping_interval_ms {
            config.ping_interval_ms = ms;
        }
        if let Some(ms) = self.pong_wait_ms {
            config.pong_wait_ms = ms;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(secs) = self.heartbeat_secs {
            config.heartbeat_interval_secs = secs;
        }
        if self.no_ping {
            config.enable_ping = false;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NodeConfig::default(),
    };
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    init_logging(&config.log_level, config.log_format);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting tether node");

    let hub = Hub::start(config.hub_config());
    let shutdown = CancellationToken::new();
    let heartbeat = config
        .heartbeat_interval()
        .map(|interval| spawn_heartbeat(hub.clone(), interval, shutdown.clone()));

    let app = create_router(AppState::new(hub.clone()));
    let listener = tokio::net::TcpListener::bind(config.api_addr)
        .await
        .with_context(|| format!("binding {}", config.api_addr))?;

    tracing::info!(
        api_addr = %config.api_addr,
        ping_interval_ms = config.ping_interval_ms,
        pong_wait_ms = config.pong_wait_ms,
        queue_capacity = config.queue_capacity,
        heartbeat = ?config.heartbeat_interval(),
        "Node is ready. Press Ctrl+C to stop."
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(hub.clone(), shutdown.clone()))
    .await
    .context("server error")?;

    if let Some(heartbeat) = heartbeat {
        let _ = heartbeat.await;
    }
    tracing::info!("Tether node stopped");
    Ok(())
}

/// Wait for Ctrl+C, then stop background tasks and drain the hub.
async fn shutdown_signal(hub: Hub, shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!(clients = hub.count(), "Shutting down");

    shutdown.cancel();
    hub.shutdown().await;
}
