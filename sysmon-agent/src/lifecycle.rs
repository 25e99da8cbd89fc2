//! Agent lifecycle
//!
//! Starts one sampler per source, the aggregator intake, and exactly one
//! delivery component, then waits for a termination signal. Shutdown aborts
//! every task; in-flight polls and deliveries are abandoned.

use crate::aggregator::Aggregator;
use crate::config::{AgentConfig, DeliveryMode};
use crate::dispatcher::Dispatcher;
use crate::health::HealthTracker;
use crate::sampler::Sampler;
use crate::server::{spawn_server, AppState};
use crate::source::build_readers;
use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Agent {
    aggregator: Aggregator,
    local_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

/// Delivery component prepared before anything is spawned
enum Delivery {
    Push(Dispatcher),
    Pull(TcpListener),
}

impl Agent {
    /// Spawn every component; fails only if the delivery side cannot be set up
    pub async fn start(config: AgentConfig) -> Result<Self> {
        let aggregator = Aggregator::new();

        let delivery = match &config.delivery {
            DeliveryMode::Push(push) => Delivery::Push(
                Dispatcher::new(aggregator.clone(), push)
                    .context("Failed to build HTTP client for push delivery")?,
            ),
            DeliveryMode::Pull(pull) => Delivery::Pull(
                TcpListener::bind((pull.bind, pull.port))
                    .await
                    .with_context(|| format!("Failed to bind {}:{}", pull.bind, pull.port))?,
            ),
        };

        let mut tasks = aggregator.spawn_intake();
        let mut tracked = Vec::new();
        for (kind, reader) in build_readers(&config) {
            let location = reader.location();
            let sampler = Sampler::new(
                reader,
                aggregator.publisher(kind),
                config.poll_interval,
                config.source_timeout,
            );
            tracked.push((kind, location, sampler.stats()));
            tasks.push(sampler.spawn());
        }

        let mut local_addr = None;
        match delivery {
            Delivery::Push(dispatcher) => tasks.push(dispatcher.spawn()),
            Delivery::Pull(listener) => {
                let addr = listener
                    .local_addr()
                    .context("Failed to read listener address")?;
                let health =
                    HealthTracker::new(config.agent_name.clone(), addr.port(), config.mode_name())
                        .with_sources(tracked);
                let app_state = AppState {
                    aggregator: aggregator.clone(),
                    health,
                };
                tasks.push(spawn_server(listener, app_state));
                local_addr = Some(addr);
            }
        }

        info!(
            "agent {} running in {} mode ({} tasks)",
            config.agent_name,
            config.mode_name(),
            tasks.len()
        );
        Ok(Self {
            aggregator,
            local_addr,
            tasks,
        })
    }

    #[cfg(test)]
    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Address of the snapshot server in pull mode
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Block until `shutdown` resolves, then stop every task
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        shutdown.await;
        info!("termination signal received, stopping agent");
        let snapshot = self.aggregator.snapshot();
        if !snapshot.is_complete() {
            warn!("stopping before every source reported, missing: {:?}", snapshot.missing());
        }
        self.stop();
    }

    pub fn stop(self) {
        for task in &self.tasks {
            if task.is_finished() {
                warn!("a background task had already stopped");
            }
            task.abort();
        }
    }
}

/// Resolves on SIGINT (Ctrl+C) or, on Unix, SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
