use crate::aggregator::Snapshot;
use crate::metrics::SourceKind;
use crate::sampler::{SamplerStats, SamplerStatsView};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct AgentHealth {
    pub status: &'static str,
    pub agent: String,
    pub port: u16,
    pub mode: &'static str,
    pub instance_id: String,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub memory_usage_mb: f32,
    pub sources: Vec<SourceHealth>,
}

#[derive(Debug, Serialize)]
pub struct SourceHealth {
    pub source: SourceKind,
    pub location: String,
    pub reported: bool,
    #[serde(flatten)]
    pub stats: SamplerStatsView,
}

struct TrackedSource {
    kind: SourceKind,
    location: String,
    stats: Arc<SamplerStats>,
}

/// Identity and sampler counters reported by `/health`
#[derive(Clone)]
pub struct HealthTracker {
    agent: String,
    port: u16,
    mode: &'static str,
    instance_id: String,
    hostname: String,
    started_at: DateTime<Utc>,
    start_time: Instant,
    sources: Arc<Vec<TrackedSource>>,
}

impl HealthTracker {
    pub fn new(agent: impl Into<String>, port: u16, mode: &'static str) -> Self {
        Self {
            agent: agent.into(),
            port,
            mode,
            instance_id: Uuid::new_v4().to_string(),
            hostname: gethostname::gethostname().to_string_lossy().to_string(),
            started_at: Utc::now(),
            start_time: Instant::now(),
            sources: Arc::new(Vec::new()),
        }
    }

    pub fn with_sources<I>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = (SourceKind, String, Arc<SamplerStats>)>,
    {
        self.sources = Arc::new(
            sources
                .into_iter()
                .map(|(kind, location, stats)| TrackedSource { kind, location, stats })
                .collect(),
        );
        self
    }

    pub fn get_health(&self, snapshot: &Snapshot) -> AgentHealth {
        AgentHealth {
            status: "ok",
            agent: self.agent.clone(),
            port: self.port,
            mode: self.mode,
            instance_id: self.instance_id.clone(),
            hostname: self.hostname.clone(),
            started_at: self.started_at,
            uptime_seconds: self.start_time.elapsed().as_secs(),
            memory_usage_mb: get_memory_usage_mb(),
            sources: self
                .sources
                .iter()
                .map(|s| SourceHealth {
                    source: s.kind,
                    location: s.location.clone(),
                    reported: snapshot.get(s.kind).is_some(),
                    stats: s.stats.view(),
                })
                .collect(),
        }
    }
}

/// Resident set size of this process; 0 where it cannot be read
fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    if let Some(Ok(kb)) = rest.split_whitespace().next().map(str::parse::<u64>) {
                        return kb as f32 / 1024.0;
                    }
                }
            }
        }
    }

    0.0
}
