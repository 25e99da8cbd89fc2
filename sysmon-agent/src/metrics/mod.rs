//! Measurement model for the agent's sources
//!
//! Each source type produces one kind of immutable [`Measurement`]:
//! - CPU utilization percentage
//! - Memory breakdown (kilobytes) and used percentage
//! - Process-table state counts
//!
//! [`parse`] is the single entry point turning raw source bytes into a
//! measurement. It is pure: the same bytes always give the same result.
//!
//! Input accepts both the English keys and the collector's keys; output
//! always uses the collector's keys (`porcentajeUso`, `libre`, `uso`,
//! `procesos_*`), which is what the collector API destructures.

pub mod native;

use crate::error::SourceError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One category of system metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Cpu,
    Ram,
    Processes,
}

impl SourceKind {
    /// Every source a complete snapshot requires, in delivery order
    pub const ALL: [SourceKind; 3] = [SourceKind::Cpu, SourceKind::Ram, SourceKind::Processes];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Cpu => "cpu",
            SourceKind::Ram => "ram",
            SourceKind::Processes => "processes",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            SourceKind::Cpu => 0,
            SourceKind::Ram => 1,
            SourceKind::Processes => 2,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU utilization
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CpuUsage {
    #[serde(rename(serialize = "porcentajeUso"), alias = "porcentajeUso")]
    pub usage: f64,
}

impl CpuUsage {
    /// Idle share, the complement of `usage`
    pub fn free(&self) -> f64 {
        100.0 - self.usage
    }
}

/// Memory breakdown in kilobytes
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MemoryUsage {
    pub total: u64,
    #[serde(rename = "libre")]
    pub free: u64,
    #[serde(rename = "uso")]
    pub used: u64,
    #[serde(rename = "porcentajeUso")]
    pub usage: f64,
}

/// Wire form of [`MemoryUsage`]; some producers omit the percentage
#[derive(Deserialize)]
struct RawMemoryUsage {
    total: u64,
    #[serde(alias = "libre")]
    free: u64,
    #[serde(alias = "uso")]
    used: u64,
    #[serde(default, alias = "porcentajeUso")]
    usage: Option<f64>,
}

/// Process-table state counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessCounts {
    #[serde(rename(serialize = "procesos_corriendo"), alias = "procesos_corriendo")]
    pub running: u64,
    #[serde(rename(serialize = "total_processos"), alias = "total_processos")]
    pub total: u64,
    #[serde(rename(serialize = "procesos_durmiendo"), alias = "procesos_durmiendo")]
    pub sleeping: u64,
    #[serde(rename(serialize = "procesos_zombie"), alias = "procesos_zombie")]
    pub zombie: u64,
    #[serde(rename(serialize = "procesos_parados"), alias = "procesos_parados")]
    pub stopped: u64,
}

/// One parsed reading of a source type
#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    Cpu(CpuUsage),
    Ram(MemoryUsage),
    Processes(ProcessCounts),
}

impl Measurement {
    pub fn kind(&self) -> SourceKind {
        match self {
            Measurement::Cpu(_) => SourceKind::Cpu,
            Measurement::Ram(_) => SourceKind::Ram,
            Measurement::Processes(_) => SourceKind::Processes,
        }
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        match self {
            Measurement::Cpu(cpu) => format!("cpu {:.1}%", cpu.usage),
            Measurement::Ram(ram) => format!(
                "ram {:.1}% (total: {}, free: {}, used: {})",
                ram.usage, ram.total, ram.free, ram.used
            ),
            Measurement::Processes(p) => format!(
                "processes total: {}, running: {}, sleeping: {}, zombie: {}, stopped: {}",
                p.total, p.running, p.sleeping, p.zombie, p.stopped
            ),
        }
    }
}

/// Parse raw source bytes into a measurement of `kind`
pub fn parse(kind: SourceKind, raw: &[u8]) -> Result<Measurement, SourceError> {
    let name = kind.as_str();
    let malformed = |e: serde_json::Error| SourceError::malformed(name, e.to_string());

    match kind {
        SourceKind::Cpu => {
            let cpu: CpuUsage = serde_json::from_slice(raw).map_err(malformed)?;
            check_percentage(name, "usage", cpu.usage)?;
            Ok(Measurement::Cpu(cpu))
        }
        SourceKind::Ram => {
            let raw: RawMemoryUsage = serde_json::from_slice(raw).map_err(malformed)?;
            if raw.used > raw.total {
                return Err(SourceError::malformed(
                    name,
                    format!("used ({}) exceeds total ({})", raw.used, raw.total),
                ));
            }
            let usage = match raw.usage {
                Some(usage) => usage,
                None if raw.total == 0 => 0.0,
                None => raw.used as f64 * 100.0 / raw.total as f64,
            };
            check_percentage(name, "usage", usage)?;
            Ok(Measurement::Ram(MemoryUsage {
                total: raw.total,
                free: raw.free,
                used: raw.used,
                usage,
            }))
        }
        SourceKind::Processes => {
            let counts: ProcessCounts = serde_json::from_slice(raw).map_err(malformed)?;
            Ok(Measurement::Processes(counts))
        }
    }
}

fn check_percentage(kind: &'static str, field: &str, value: f64) -> Result<(), SourceError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(SourceError::malformed(
            kind,
            format!("{field} {value} is outside 0-100"),
        ))
    }
}
