//! Push delivery
//!
//! On its own timer, sends the current snapshot to the collector, but only
//! once every source has reported. A failed send is logged and dropped; the
//! next tick carries a fresh record instead of a retry.

use crate::aggregator::Aggregator;
use crate::config::PushConfig;
use crate::error::DeliveryError;
use crate::payload::{self, DeliveryRecord};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// At least one source has never reported
    Waiting,
    Delivered,
    Failed,
}

pub struct Dispatcher {
    aggregator: Aggregator,
    client: Client,
    endpoint: String,
    interval: Duration,
    timeout: Duration,
    failed_ticks: u64,
    waiting_ticks: u64,
}

impl Dispatcher {
    pub fn new(aggregator: Aggregator, config: &PushConfig) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(DeliveryError::Transport)?;
        Ok(Self {
            aggregator,
            client,
            endpoint: config.endpoint.clone(),
            interval: config.interval,
            timeout: config.timeout,
            failed_ticks: 0,
            waiting_ticks: 0,
        })
    }

    pub async fn tick(&mut self) -> TickOutcome {
        let snapshot = self.aggregator.snapshot();
        let Some(record) = DeliveryRecord::complete(&snapshot, payload::now()) else {
            self.waiting_ticks += 1;
            let missing: Vec<&str> = snapshot.missing().iter().map(|k| k.as_str()).collect();
            if self.waiting_ticks == 1 {
                info!("waiting for complete metrics before sending, missing: {:?}", missing);
            } else {
                debug!("still waiting for complete metrics, missing: {:?}", missing);
            }
            return TickOutcome::Waiting;
        };
        self.waiting_ticks = 0;

        match self.send(&record).await {
            Ok(()) => {
                if self.failed_ticks > 0 {
                    info!(
                        "delivery to {} recovered after {} failed ticks",
                        self.endpoint, self.failed_ticks
                    );
                }
                self.failed_ticks = 0;
                debug!("metrics delivered (timestamp {})", record.timestamp);
                TickOutcome::Delivered
            }
            Err(e) => {
                self.failed_ticks += 1;
                match e {
                    DeliveryError::Rejected(_) => {
                        warn!("delivery to {} failed: {}", self.endpoint, e)
                    }
                    _ => error!("delivery to {} failed: {}", self.endpoint, e),
                }
                TickOutcome::Failed
            }
        }
    }

    async fn send(&self, record: &DeliveryRecord) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(record)?;
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| DeliveryError::from_transport(e, self.timeout))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Rejected(status))
        }
    }

    pub async fn run(mut self) {
        info!("sending metrics to {} every {:?}", self.endpoint, self.interval);
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
