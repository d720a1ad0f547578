//! # Relay Server
//!
//! Real-time chat relay server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! relay
//!
//! # Run with custom config
//! relay --config /path/to/relay.toml
//!
//! # Run with environment variables
//! RELAY_PORT=8000 RELAY_HOST=0.0.0.0 relay
//! ```

use anyhow::{bail, Result};
use relay_server::{handlers, metrics, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay=debug,relay_core=debug,relay_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match config_path_arg()? {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    tracing::info!("Starting relay server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

fn config_path_arg() -> Result<Option<String>> {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => Ok(None),
        Some("--config") => match args.next() {
            Some(path) => Ok(Some(path)),
            None => bail!("--config requires a path"),
        },
        Some(other) => bail!("Unknown argument: {}", other),
    }
}
