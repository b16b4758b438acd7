//! CLI command implementations.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use tether_realtime::{Connector, ConnectorConfig, ConnectorEvent, Payload};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Connection flags shared by every subcommand.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub reconnect_interval: Duration,
    pub ping_interval: Duration,
    pub enable_ping: bool,
}

impl ConnectOptions {
    fn connector_config(&self, url: &str) -> ConnectorConfig {
        ConnectorConfig::new(url)
            .with_reconnect_interval(self.reconnect_interval)
            .with_ping_interval(self.ping_interval)
            .with_ping(self.enable_ping)
    }
}

/// Turn a stdin line into a frame: JSON objects pass through, anything else
/// is wrapped as an echo command. Blank lines are skipped.
pub fn stdin_frame(line: &str) -> Option<Payload> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<Map<String, Value>>(line) {
        Ok(map) => Some(Payload::from(map)),
        Err(_) => Some(Payload::new().with("cmd", "echo").with("message", line)),
    }
}

fn log_lifecycle(connector: &Connector) {
    let url = connector.config().url.clone();
    connector.on(ConnectorEvent::Open, move |_| {
        tracing::info!(url = %url, "Connected");
        None
    });
    connector.on(ConnectorEvent::Reconnecting, |ctx| {
        tracing::warn!(
            error = ctx.error.as_deref().unwrap_or_default(),
            "Connection failed, retrying"
        );
        None
    });
    connector.on(ConnectorEvent::Error, |ctx| {
        tracing::warn!(error = ctx.error.as_deref().unwrap_or_default(), "Connection error");
        None
    });
}

/// Stay connected; print inbound payloads and forward stdin lines until EOF or Ctrl+C.
pub async fn connect(url: &str, options: &ConnectOptions) -> Result<()> {
    let connector = Connector::new(options.connector_config(url));
    log_lifecycle(&connector);
    connector.on(ConnectorEvent::Message, |ctx| {
        println!("{}", ctx.data.to_json_string());
        None
    });

    tracing::info!(url = %url, "Connecting");
    let handle = connector.start();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line.context("reading stdin")? {
                Some(line) => {
                    if let Some(frame) = stdin_frame(&line) {
                        if let Err(e) = connector.send(frame) {
                            tracing::warn!(error = %e, "Frame not queued");
                        }
                    }
                }
                None => break,
            },
        }
    }

    connector.stop();
    handle.await.context("connector task failed")??;
    Ok(())
}

/// Send one JSON object and print the first reply.
pub async fn send(url: &str, json: &str, timeout: Duration, options: &ConnectOptions) -> Result<()> {
    let message: Map<String, Value> =
        serde_json::from_str(json).context("message must be a JSON object")?;

    let connector = Connector::new(options.connector_config(url));
    log_lifecycle(&connector);

    let (replies_tx, mut replies) = mpsc::unbounded_channel();
    connector.on(ConnectorEvent::Message, move |ctx| {
        let _ = replies_tx.send(ctx.data.clone());
        None
    });

    connector.send(Payload::from(message))?;
    let handle = connector.start();

    let reply = tokio::time::timeout(timeout, async {
        while let Some(payload) = replies.recv().await {
            // Greetings sent on connect are not replies.
            if payload.get_str("type") != "welcome" {
                return Some(payload);
            }
        }
        None
    })
    .await;

    connector.stop();
    handle.await.context("connector task failed")??;

    match reply {
        Ok(Some(payload)) => {
            println!("{}", payload.to_json_string());
            Ok(())
        }
        _ => bail!("no reply from {} within {:?}", url, timeout),
    }
}
