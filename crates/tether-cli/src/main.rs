//! Tether CLI - command-line WebSocket client.

use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// Tether - resilient WebSocket client
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Delay between failed dial attempts, in milliseconds
    #[arg(long, default_value_t = 5000, global = true)]
    reconnect_ms: u64,

    /// Ping interval in milliseconds
    #[arg(long, default_value_t = 30000, global = true)]
    ping_ms: u64,

    /// Disable liveness pings and the idle-read deadline
    #[arg(long, global = true)]
    no_ping: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stay connected, print inbound messages and forward stdin lines
    Connect {
        /// Target URL (ws://host:port/path)
        url: String,
    },

    /// Send one JSON message and print the first reply
    Send {
        /// Target URL (ws://host:port/path)
        url: String,
        /// JSON object to send
        json: String,
        /// How long to wait for a reply, in milliseconds
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tether={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let options = commands::ConnectOptions {
        reconnect_interval: Duration::from_millis(cli.reconnect_ms),
        ping_interval: Duration::from_millis(cli.ping_ms),
        enable_ping: !cli.no_ping,
    };

    let result = match cli.command {
        Commands::Connect { url } => commands::connect(&url, &options).await,
        Commands::Send {
            url,
            json,
            timeout_ms,
        } => commands::send(&url, &json, Duration::from_millis(timeout_ms), &options).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
