//! Periodic server-time broadcast.

use std::time::Duration;

use tether_realtime::{Hub, Payload};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::commands::{unix_time, ServerMessage};

/// Broadcast a `server_time` message every `interval` while any client is
/// connected. Stops when `shutdown` is cancelled.
pub fn spawn_heartbeat(hub: Hub, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let count = hub.count();
                    if count > 0 {
                        debug!(clients = count, "Broadcasting server time");
                        hub.broadcast(Payload::from(ServerMessage::ServerTime {
                            time: unix_time(),
                            message: "Server heartbeat".to_string(),
                        }));
                    }
                }
            }
        }
        debug!("Heartbeat stopped");
    })
}
