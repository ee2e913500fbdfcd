//! notify-relay - stream Postgres notifications to server-sent event clients.
//!
//! Configuration comes from the environment, see [`notify_relay::config`].

use std::process::ExitCode;

use notify_relay::{Relay, RelayConfig};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
Usage:
  notify-relay [--help]

Environment:
  DATABASE_URL                  upstream Postgres connection string (required)
  BIND_ADDR                     HTTP listen address (default 0.0.0.0:8080)
  SLOW_READER_POLICY            neglect | evict (default neglect)
  BROADCAST_ON_CONNECTION_LOSS  true | false (default false)
  QUEUE_CAPACITY                per-client queue size (default 256)
  KEEPALIVE_INTERVAL_SECS       upstream probe interval (default 60)
  RECONNECT_MIN_BACKOFF_MS      first reconnect delay (default 250)
  RECONNECT_MAX_BACKOFF_MS      reconnect delay ceiling (default 3000)
  RUST_LOG                      log filter (default info)
";

#[tokio::main]
async fn main() -> ExitCode {
    if std::env::args().skip(1).any(|arg| arg == "--help" || arg == "-h") {
        eprint!("{}", USAGE);
        return ExitCode::from(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("notify-relay: {}", e);
            eprint!("{}", USAGE);
            return ExitCode::from(1);
        }
    };

    let listener = match TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Could not open listen socket on {}: {}", config.bind_addr, e);
            return ExitCode::from(1);
        }
    };

    let relay = match Relay::start(&config) {
        Ok(relay) => relay,
        Err(e) => {
            error!("Could not start relay: {}", e);
            return ExitCode::from(1);
        }
    };

    info!("Serving events on http://{}/events", config.bind_addr);
    if let Err(e) = relay.serve(listener).await {
        error!("Server failed: {}", e);
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}
