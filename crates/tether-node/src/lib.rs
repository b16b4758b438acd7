//! # Tether Node
//!
//! HTTP node hosting a tether WebSocket hub.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │                  Tether Node                    │
//! ├────────────────────────────────────────────────┤
//! │  HTTP API (axum)                                │
//! │  • GET  /ws                  WebSocket upgrade  │
//! │  • GET  /api/realtime/...    hub introspection  │
//! │  • POST /api/realtime/...    notify, broadcast  │
//! ├────────────────────────────────────────────────┤
//! │  Hub (tether-realtime)                          │
//! │  • CommandHandler for inbound messages          │
//! │  • Heartbeat broadcast                          │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cargo run --bin tether-node -- --api-addr 127.0.0.1:8080
//! ```
//!
//! ## Modules
//!
//! - [`api`] - Router and shared state
//! - [`realtime_api`] - WebSocket endpoint and hub introspection
//! - [`commands`] - Command protocol spoken over `/ws`
//! - [`heartbeat`] - Periodic server-time broadcast
//! - [`config`] - Node configuration management
//! - [`observability`] - Structured logging
//!
//! ## Example: Serving the API
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//! use tether_node::api::{create_router, AppState};
//! use tether_realtime::{Hub, HubConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let hub = Hub::start(HubConfig::default());
//! let app = create_router(AppState::new(hub));
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod commands;
pub mod config;
pub mod heartbeat;
pub mod observability;
pub mod realtime_api;
