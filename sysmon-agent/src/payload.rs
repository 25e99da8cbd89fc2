//! Outbound record shared by push and pull delivery
//!
//! Built fresh from a [`Snapshot`] for every delivery and never cached. The
//! body is `{timestamp, cpu, ram, procesos}` with the collector's field names.

use crate::aggregator::Snapshot;
use crate::metrics::{CpuUsage, MemoryUsage, ProcessCounts};
use chrono::Utc;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeliveryRecord {
    /// Generation time, unix seconds
    pub timestamp: i64,
    pub cpu: CpuView,
    pub ram: MemoryUsage,
    #[serde(rename = "procesos")]
    pub processes: ProcessCounts,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct CpuView {
    #[serde(rename = "porcentajeUso")]
    pub usage: f64,
    #[serde(rename = "porcentajeLibre")]
    pub free: f64,
}

impl From<&CpuUsage> for CpuView {
    fn from(cpu: &CpuUsage) -> Self {
        Self {
            usage: cpu.usage,
            free: cpu.free(),
        }
    }
}

impl DeliveryRecord {
    /// Push form: only when every source has reported
    pub fn complete(snapshot: &Snapshot, timestamp: i64) -> Option<Self> {
        Some(Self {
            timestamp,
            cpu: snapshot.cpu()?.into(),
            ram: *snapshot.ram()?,
            processes: *snapshot.processes()?,
        })
    }

    /// Pull form: absent sources render as neutral values
    pub fn with_defaults(snapshot: &Snapshot, timestamp: i64) -> Self {
        Self {
            timestamp,
            cpu: CpuView::from(&snapshot.cpu().copied().unwrap_or_default()),
            ram: snapshot.ram().copied().unwrap_or_default(),
            processes: snapshot.processes().copied().unwrap_or_default(),
        }
    }
}

pub fn now() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Aggregator;
    use crate::metrics::{Measurement, SourceKind};
    use serde_json::json;
    use std::time::Duration;
    use sysmon_devkit::wait_until;

    async fn snapshot_with(measurements: Vec<Measurement>) -> Snapshot {
        let aggregator = Aggregator::new();
        aggregator.spawn_intake();
        let expected = measurements.len();
        for m in measurements {
            aggregator.publisher(m.kind()).publish(m);
        }
        assert!(
            wait_until(Duration::from_secs(2), || {
                SourceKind::ALL.len() - aggregator.snapshot().missing().len() == expected
            })
            .await
        );
        aggregator.snapshot()
    }

    fn scenario_a() -> Vec<Measurement> {
        vec![
            Measurement::Cpu(CpuUsage { usage: 42.0 }),
            Measurement::Ram(MemoryUsage {
                total: 1000,
                free: 400,
                used: 600,
                usage: 60.0,
            }),
        ]
    }

    #[tokio::test]
    async fn test_pull_record_fills_defaults() {
        let snapshot = snapshot_with(scenario_a()).await;
        let record = DeliveryRecord::with_defaults(&snapshot, 1_700_000_000);

        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({
                "timestamp": 1_700_000_000,
                "cpu": { "porcentajeUso": 42.0, "porcentajeLibre": 58.0 },
                "ram": { "total": 1000, "libre": 400, "uso": 600, "porcentajeUso": 60.0 },
                "procesos": {
                    "procesos_corriendo": 0,
                    "total_processos": 0,
                    "procesos_durmiendo": 0,
                    "procesos_zombie": 0,
                    "procesos_parados": 0
                }
            })
        );
    }

    #[tokio::test]
    async fn test_pull_record_on_empty_snapshot() {
        let record = DeliveryRecord::with_defaults(&Snapshot::default(), 1);
        assert_eq!(record.cpu, CpuView { usage: 0.0, free: 100.0 });
        assert_eq!(record.ram, MemoryUsage::default());
    }

    #[tokio::test]
    async fn test_push_record_requires_every_source() {
        let partial = snapshot_with(scenario_a()).await;
        assert!(DeliveryRecord::complete(&partial, 1).is_none());

        let mut all = scenario_a();
        all.push(Measurement::Processes(ProcessCounts {
            running: 2,
            total: 120,
            sleeping: 117,
            zombie: 1,
            stopped: 0,
        }));
        let full = snapshot_with(all).await;
        let record = DeliveryRecord::complete(&full, 7).unwrap();
        assert_eq!(record.timestamp, 7);
        assert_eq!(record.processes.total, 120);
        assert_eq!(record, DeliveryRecord::with_defaults(&full, 7));
    }

    #[tokio::test]
    async fn test_push_record_has_every_key_the_collector_reads() {
        let mut all = scenario_a();
        all.push(Measurement::Processes(ProcessCounts {
            running: 2,
            total: 120,
            sleeping: 117,
            zombie: 1,
            stopped: 0,
        }));
        let snapshot = snapshot_with(all).await;
        let record = DeliveryRecord::complete(&snapshot, 1_700_000_000).unwrap();
        let body = serde_json::to_value(&record).unwrap();

        for key in ["timestamp", "cpu", "ram", "procesos"] {
            assert!(body.get(key).is_some(), "missing top-level {key}");
        }
        assert_eq!(body["cpu"]["porcentajeUso"], json!(42.0));
        assert_eq!(body["ram"]["total"], 1000);
        assert_eq!(body["ram"]["libre"], 400);
        assert_eq!(body["ram"]["uso"], 600);
        assert_eq!(body["ram"]["porcentajeUso"], json!(60.0));
        assert_eq!(body["procesos"]["procesos_corriendo"], 2);
        assert_eq!(body["procesos"]["total_processos"], 120);
        assert_eq!(body["procesos"]["procesos_durmiendo"], 117);
        assert_eq!(body["procesos"]["procesos_zombie"], 1);
        assert_eq!(body["procesos"]["procesos_parados"], 0);
        assert!(body.get("processes").is_none());
    }
}
