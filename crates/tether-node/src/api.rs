//! HTTP API for the tether node.

use std::sync::Arc;

use axum::{response::IntoResponse, routing::get, Json, Router};
use tether_realtime::{Hub, MessageHandler};
use tower_http::trace::TraceLayer;

use crate::commands::CommandHandler;
use crate::realtime_api::realtime_routes;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection hub.
    pub hub: Hub,
    /// Handler for inbound WebSocket messages.
    pub commands: Arc<dyn MessageHandler>,
}

impl AppState {
    /// State serving the built-in command protocol.
    pub fn new(hub: Hub) -> Self {
        let commands = Arc::new(CommandHandler::new(hub.clone()));
        Self { hub, commands }
    }
}

/// Creates the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // WebSocket endpoint and hub introspection
        .merge(realtime_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
