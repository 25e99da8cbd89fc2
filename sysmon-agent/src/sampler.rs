//! Per-source polling loop
//!
//! `Idle -> Reading -> {Parsed -> Publish, ReadFailed, ParseFailed} -> Idle`.
//! A sampler never stops on its own: every branch waits for the next tick of
//! its interval, so a source that fails forever costs one read per period.

use crate::aggregator::Publisher;
use crate::error::SourceError;
use crate::metrics::{self, SourceKind};
use crate::source::SourceReader;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Failures of a streak are reported at `warn` on this cadence, `debug` otherwise
const FAILURE_REPORT_EVERY: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Published,
    ReadFailed,
    ParseFailed,
}

/// Counters shared between a sampler and the health endpoint
#[derive(Debug, Default)]
pub struct SamplerStats {
    successes: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SamplerStatsView {
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
}

impl SamplerStats {
    fn record_success(&self) -> u64 {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.swap(0, Ordering::Relaxed)
    }

    fn record_failure(&self) -> u64 {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn view(&self) -> SamplerStatsView {
        SamplerStatsView {
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }
}

pub struct Sampler {
    kind: SourceKind,
    reader: Arc<dyn SourceReader>,
    publisher: Publisher,
    interval: Duration,
    timeout: Duration,
    stats: Arc<SamplerStats>,
}

impl Sampler {
    pub fn new(
        reader: Arc<dyn SourceReader>,
        publisher: Publisher,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            kind: publisher.kind(),
            reader,
            publisher,
            interval,
            timeout,
            stats: Arc::new(SamplerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SamplerStats> {
        self.stats.clone()
    }

    /// One read-parse-publish cycle
    pub async fn poll_once(&self) -> PollOutcome {
        let raw = match timeout(self.timeout, self.reader.read()).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return self.failed(PollOutcome::ReadFailed, e),
            Err(_) => {
                let e = SourceError::Timeout {
                    location: self.reader.location(),
                    timeout: self.timeout,
                };
                return self.failed(PollOutcome::ReadFailed, e);
            }
        };

        let measurement = match metrics::parse(self.kind, &raw) {
            Ok(measurement) => measurement,
            Err(e) => return self.failed(PollOutcome::ParseFailed, e),
        };

        let streak = self.stats.record_success();
        if streak > 0 {
            info!("{} source recovered after {} failed polls", self.kind, streak);
        }
        debug!("collected {}", measurement.summary());
        self.publisher.publish(measurement);
        PollOutcome::Published
    }

    fn failed(&self, outcome: PollOutcome, err: SourceError) -> PollOutcome {
        let streak = self.stats.record_failure();
        if streak == 1 || streak % FAILURE_REPORT_EVERY == 0 {
            warn!("{} poll failed ({} in a row): {}", self.kind, streak, err);
        } else {
            debug!("{} poll failed ({} in a row): {}", self.kind, streak, err);
        }
        outcome
    }

    /// Poll forever on a fixed period
    pub async fn run(self) {
        info!(
            "sampling {} from {} every {:?}",
            self.kind,
            self.reader.location(),
            self.interval
        );
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Aggregator;
    use crate::metrics::CpuUsage;
    use crate::source::FileSource;
    use futures::future::BoxFuture;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use sysmon_devkit::{wait_until, SourceFixtures};

    const FAST: Duration = Duration::from_millis(10);
    const SETTLE: Duration = Duration::from_secs(2);

    /// Replays scripted results, then keeps failing
    struct ScriptedReader {
        script: Mutex<VecDeque<Result<Vec<u8>, SourceError>>>,
        reads: AtomicUsize,
    }

    impl ScriptedReader {
        fn new(script: Vec<Result<Vec<u8>, SourceError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                reads: AtomicUsize::new(0),
            })
        }
    }

    impl SourceReader for ScriptedReader {
        fn location(&self) -> String {
            "scripted".into()
        }

        fn read(&self) -> BoxFuture<'_, Result<Vec<u8>, SourceError>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let next = self
                .script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(SourceError::NotFound("scripted".into())));
            Box::pin(async move { next })
        }
    }

    /// Never answers
    struct HangingReader;

    impl SourceReader for HangingReader {
        fn location(&self) -> String {
            "hanging".into()
        }

        fn read(&self) -> BoxFuture<'_, Result<Vec<u8>, SourceError>> {
            Box::pin(futures::future::pending())
        }
    }

    #[tokio::test]
    async fn test_poll_outcomes_and_stats() {
        let aggregator = Aggregator::new();
        aggregator.spawn_intake();
        let reader = ScriptedReader::new(vec![
            Err(SourceError::NotFound("cpu".into())),
            Ok(b"not json".to_vec()),
            Ok(br#"{"usage": 33}"#.to_vec()),
        ]);
        let sampler = Sampler::new(reader, aggregator.publisher(SourceKind::Cpu), FAST, FAST);

        assert_eq!(sampler.poll_once().await, PollOutcome::ReadFailed);
        assert_eq!(sampler.poll_once().await, PollOutcome::ParseFailed);
        assert_eq!(
            sampler.stats().view(),
            SamplerStatsView {
                successes: 0,
                failures: 2,
                consecutive_failures: 2,
            }
        );

        assert_eq!(sampler.poll_once().await, PollOutcome::Published);
        assert_eq!(sampler.stats().view().consecutive_failures, 0);
        assert!(
            wait_until(SETTLE, || aggregator.snapshot().cpu() == Some(&CpuUsage { usage: 33.0 }))
                .await
        );
    }

    #[tokio::test]
    async fn test_read_timeout_is_a_read_failure() {
        let aggregator = Aggregator::new();
        let sampler = Sampler::new(
            Arc::new(HangingReader),
            aggregator.publisher(SourceKind::Ram),
            FAST,
            Duration::from_millis(20),
        );
        assert_eq!(sampler.poll_once().await, PollOutcome::ReadFailed);
        assert_eq!(sampler.stats().view().failures, 1);
    }

    #[tokio::test]
    async fn test_failing_source_keeps_polling_at_interval() {
        let aggregator = Aggregator::new();
        let reader = ScriptedReader::new(Vec::new());
        let sampler = Sampler::new(
            reader.clone(),
            aggregator.publisher(SourceKind::Processes),
            Duration::from_millis(20),
            FAST,
        );
        let stats = sampler.stats();
        let handle = sampler.spawn();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!handle.is_finished());

        let reads = reader.reads.load(Ordering::SeqCst);
        // ~15 ticks in 300ms; far fewer than a busy loop, never zero
        assert!(reads >= 3, "too few reads: {reads}");
        assert!(reads <= 20, "polling faster than its interval: {reads}");
        assert_eq!(stats.view().consecutive_failures as usize, reads);
        assert!(aggregator.snapshot().processes().is_none());
        handle.abort();
    }

    #[tokio::test]
    async fn test_sampler_follows_file_updates() {
        let fixtures = SourceFixtures::new().unwrap();
        fixtures.write_cpu(5.0).unwrap();

        let aggregator = Aggregator::new();
        aggregator.spawn_intake();
        let sampler = Sampler::new(
            Arc::new(FileSource::new(fixtures.cpu_path())),
            aggregator.publisher(SourceKind::Cpu),
            FAST,
            SETTLE,
        );
        let handle = sampler.spawn();

        assert!(
            wait_until(SETTLE, || aggregator.snapshot().cpu() == Some(&CpuUsage { usage: 5.0 }))
                .await
        );

        // Break the source, then fix it with a new value
        fixtures.write_raw(SourceKind::Cpu.as_str(), b"{\"usage\":").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(aggregator.snapshot().cpu(), Some(&CpuUsage { usage: 5.0 }));

        fixtures.write_cpu(77.0).unwrap();
        assert!(
            wait_until(SETTLE, || aggregator.snapshot().cpu() == Some(&CpuUsage { usage: 77.0 }))
                .await
        );
        handle.abort();
    }
}
