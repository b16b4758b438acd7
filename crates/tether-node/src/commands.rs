//! Command protocol spoken over `/ws`.
//!
//! ### Client -> Server Messages
//!
//! ```json
//! {"cmd": "ping"}
//! {"cmd": "echo", "message": "hello"}
//! {"cmd": "broadcast", "message": "hello all"}
//! {"cmd": "send", "target_id": "<client id>", "message": "private msg"}
//! {"cmd": "stats"}
//! {"cmd": "disconnect"}
//! ```
//!
//! `targetId` is accepted in place of `target_id`.
//!
//! ### Server -> Client Messages
//!
//! Every server message carries a `type` tag: `welcome`, `pong`, `echo`,
//! `broadcast`, `private`, `sent`, `stats`, `notification`, `server_time`
//! or `error`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tether_realtime::{Connection, Hub, MessageHandler, Payload};
use tracing::debug;

/// Commands that clients can send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Liveness check answered with `pong`.
    Ping,
    /// Reply with the same message.
    Echo {
        #[serde(default)]
        message: String,
    },
    /// Send a message to every connected client.
    Broadcast {
        #[serde(default)]
        message: String,
    },
    /// Send a private message to one client.
    Send {
        #[serde(default, alias = "targetId")]
        target_id: String,
        #[serde(default)]
        message: String,
    },
    /// Report connection statistics.
    Stats,
    /// Close the sender's own connection.
    Disconnect,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once when a connection opens.
    Welcome { client_id: String, message: String },
    /// Response to `ping`.
    Pong { time: i64, client_id: String },
    /// Response to `echo`.
    Echo { message: String },
    /// Fan-out from a client or from the HTTP API.
    Broadcast {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time: Option<i64>,
    },
    /// Delivered to the target of `send`.
    Private { from: String, message: String },
    /// Confirms a `send` to the sender.
    Sent { target: String },
    /// Response to `stats`.
    Stats {
        connected_count: usize,
        your_id: String,
    },
    /// Pushed through the HTTP notify endpoint.
    Notification { message: String },
    /// Periodic heartbeat.
    ServerTime { time: i64, message: String },
    /// Unknown or malformed command.
    Error { error: String },
}

impl From<ServerMessage> for Payload {
    fn from(message: ServerMessage) -> Self {
        serde_json::to_value(message)
            .map(Payload::from_value)
            .unwrap_or_default()
    }
}

/// Current Unix time in seconds.
pub fn unix_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Message handler dispatching [`ClientCommand`]s against the hub.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    hub: Hub,
}

impl CommandHandler {
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }

    /// Run one command; `None` means no reply.
    pub fn execute(&self, conn: &Connection, command: ClientCommand) -> Option<ServerMessage> {
        match command {
            ClientCommand::Ping => Some(ServerMessage::Pong {
                time: unix_time(),
                client_id: conn.id.clone(),
            }),
            ClientCommand::Echo { message } => Some(ServerMessage::Echo { message }),
            ClientCommand::Broadcast { message } => {
                debug!(client_id = %conn.id, "Client broadcast");
                self.hub.broadcast(Payload::from(ServerMessage::Broadcast {
                    from: Some(conn.id.clone()),
                    message,
                    time: Some(unix_time()),
                }));
                None
            }
            ClientCommand::Send { target_id, message } => {
                debug!(client_id = %conn.id, target = %target_id, "Private message");
                self.hub.send_to(
                    &target_id,
                    Payload::from(ServerMessage::Private {
                        from: conn.id.clone(),
                        message,
                    }),
                );
                Some(ServerMessage::Sent { target: target_id })
            }
            ClientCommand::Stats => Some(ServerMessage::Stats {
                connected_count: self.hub.count(),
                your_id: conn.id.clone(),
            }),
            ClientCommand::Disconnect => {
                debug!(client_id = %conn.id, "Client requested disconnect");
                conn.close();
                None
            }
        }
    }
}

impl MessageHandler for CommandHandler {
    fn handle(&self, conn: &Connection, payload: Payload) -> Option<Payload> {
        let cmd = payload.get_str("cmd").to_string();
        let reply = match serde_json::from_value::<ClientCommand>(payload.into_value()) {
            Ok(command) => self.execute(conn, command),
            Err(e) => {
                debug!(client_id = %conn.id, cmd = %cmd, error = %e, "Invalid command");
                Some(ServerMessage::Error {
                    error: format!("unknown command: {}", cmd),
                })
            }
        };
        reply.map(Payload::from)
    }
}
