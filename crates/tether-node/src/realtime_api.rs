//! Real-time WebSocket API.
//!
//! This module provides the WebSocket endpoint and hub introspection:
//!
//! - `GET /ws` - WebSocket endpoint speaking the [command protocol](crate::commands)
//! - `GET /api/realtime/stats` - Hub statistics
//! - `GET /api/realtime/clients/count` - Number of connected clients
//! - `POST /api/realtime/notify/{client_id}` - Push a notification to one client
//! - `POST /api/realtime/broadcast` - Push a message to every client

use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::{future, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tether_realtime::{
    CloseReason, Frame, LifecycleEvent, Payload, PendingConnection, Transport, TransportError,
};
use tracing::{info, warn};

use crate::api::AppState;
use crate::commands::ServerMessage;

/// Create the real-time API routes.
pub fn realtime_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/realtime/stats", get(get_stats))
        .route("/api/realtime/clients/count", get(get_client_count))
        .route("/api/realtime/notify/{client_id}", post(notify_client))
        .route("/api/realtime/broadcast", post(broadcast))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let max = state.hub.config().max_message_size;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_failed_upgrade(move |e| {
            warn!(remote_addr = %remote_addr, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| handle_socket(socket, remote_addr, state))
}

/// Register an upgraded socket with the hub.
async fn handle_socket(socket: WebSocket, remote_addr: SocketAddr, state: AppState) {
    let pending = PendingConnection::new(
        websocket_transport(socket),
        state.hub.config(),
        Some(remote_addr),
    );

    pending.on(LifecycleEvent::Open, |conn, _| {
        let _ = conn.send(Payload::from(ServerMessage::Welcome {
            client_id: conn.id.clone(),
            message: "Connected successfully".to_string(),
        }));
    });
    pending.on(LifecycleEvent::Close, |conn, _| {
        info!(client_id = %conn.id, "WebSocket client disconnected");
    });
    pending.on(LifecycleEvent::Error, |conn, data| {
        warn!(client_id = %conn.id, error = %data.get_str("error"), "WebSocket client error");
    });

    state.hub.attach(pending, state.commands.clone());
}

/// Adapt axum's socket to the hub's frame transport.
fn websocket_transport(socket: WebSocket) -> Transport {
    let (sink, stream) = socket.split();

    let sink = sink
        .sink_map_err(transport_error)
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(frame_to_message(frame))));
    let stream = stream.map(|item| item.map(message_to_frame).map_err(transport_error));

    Transport::new(sink, stream)
}

fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
            code: r.code,
            reason: r.reason.into(),
        })),
    }
}

fn message_to_frame(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text.as_str().to_owned()),
        Message::Binary(data) => Frame::Binary(data),
        Message::Ping(data) => Frame::Ping(data),
        Message::Pong(data) => Frame::Pong(data),
        Message::Close(close) => {
            Frame::Close(close.map(|cf| CloseReason::new(cf.code, cf.reason.as_str())))
        }
    }
}

/// Classify an axum socket error: I/O failures, closed sockets and peers that
/// vanished without a closing handshake are not protocol violations.
fn transport_error(err: axum::Error) -> TransportError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            return TransportError::Io(std::io::Error::new(io.kind(), io.to_string()));
        }
        if is_closed_message(&e.to_string()) {
            return TransportError::Closed;
        }
        source = e.source();
    }
    TransportError::protocol(err)
}

/// axum links its own tungstenite release, so its errors are matched by text.
fn is_closed_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("closed") || message.contains("reset without closing handshake")
}

/// Body for notify and broadcast requests.
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub message: String,
}

/// Response to a notify request.
#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyResponse {
    pub sent: bool,
    pub client_id: String,
}

/// Response to a broadcast request.
#[derive(Debug, Serialize, Deserialize)]
pub struct BroadcastResponse {
    pub sent: bool,
    pub count: usize,
}

/// Count response.
#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: usize,
}

/// Get real-time connection statistics.
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hub.stats())
}

/// Get the number of connected clients.
async fn get_client_count(State(state): State<AppState>) -> impl IntoResponse {
    Json(CountResponse {
        count: state.hub.count(),
    })
}

/// Send a notification to one client. Unknown ids are not an error.
async fn notify_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Json(req): Json<MessageRequest>,
) -> impl IntoResponse {
    state.hub.send_to(
        &client_id,
        Payload::from(ServerMessage::Notification {
            message: req.message,
        }),
    );

    Json(NotifyResponse {
        sent: true,
        client_id,
    })
}

/// Broadcast a message to every client.
async fn broadcast(
    State(state): State<AppState>,
    Json(req): Json<MessageRequest>,
) -> impl IntoResponse {
    state.hub.broadcast(Payload::from(ServerMessage::Broadcast {
        from: None,
        message: req.message,
        time: None,
    }));

    Json(BroadcastResponse {
        sent: true,
        count: state.hub.count(),
    })
}
