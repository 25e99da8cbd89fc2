//! Sysmon Agent - local system metrics agent
//!
//! Samples CPU, memory and process-table sources on a fixed cadence, keeps the
//! latest reading of each, and delivers the merged snapshot:
//! - push mode: POSTs complete snapshots to a collector on a timer
//! - pull mode: serves the current snapshot on `GET /metrics`

mod aggregator;
mod config;
mod dispatcher;
mod error;
mod health;
mod lifecycle;
mod metrics;
mod payload;
mod sampler;
mod server;
mod source;
mod state;

use anyhow::{Context, Result};
use config::AgentConfig;
use lifecycle::{shutdown_signal, Agent};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Optional .env next to the binary
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sysmon_agent=info")),
        )
        .init();

    info!("Sysmon Agent v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = AgentConfig::from_env().context("Invalid configuration")?;
    info!(
        "mode: {}, polling every {:?}, source timeout {:?}",
        config.mode_name(),
        config.poll_interval,
        config.source_timeout
    );

    let agent = Agent::start(config).await.context("Failed to start agent")?;
    match agent.local_addr() {
        Some(addr) => info!(
            "Agent running, metrics at http://{}/metrics. Press Ctrl+C to stop.",
            addr
        ),
        None => info!("Agent running. Press Ctrl+C to stop."),
    }

    agent.run_until(shutdown_signal()).await;
    Ok(())
}
