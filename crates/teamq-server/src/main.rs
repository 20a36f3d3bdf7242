//! # TeaMQ Server
//!
//! Line-framed JSON message broker with worker affinity routing.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! teamq
//!
//! # Run with a specific config file
//! TEAMQ_CONFIG=/path/to/teamq.toml teamq
//!
//! # Run with environment variables
//! TEAMQ_PORT=9000 TEAMQ_HOST=0.0.0.0 teamq
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "teamq=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(
        "Starting TeaMQ on {}:{} in {:?} mode",
        config.host,
        config.port,
        config.broker.mode
    );

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
