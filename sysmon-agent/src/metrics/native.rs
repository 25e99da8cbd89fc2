//! In-process sampling with sysinfo
//!
//! Used when no producer files are installed. Every reading is encoded in the
//! same JSON schema the producer files use, so it goes through [`super::parse`]
//! like any other source.

use super::{CpuUsage, MemoryUsage, ProcessCounts, SourceKind};
use sysinfo::{ProcessStatus, System};

/// Take one reading of `kind` from `sys`, encoded as source JSON
pub fn sample(sys: &mut System, kind: SourceKind) -> serde_json::Result<Vec<u8>> {
    match kind {
        SourceKind::Cpu => {
            // Usage is computed against the previous refresh of the same System
            sys.refresh_cpu_usage();
            let usage = sys.global_cpu_info().cpu_usage().clamp(0.0, 100.0) as f64;
            serde_json::to_vec(&CpuUsage { usage })
        }
        SourceKind::Ram => {
            sys.refresh_memory();
            serde_json::to_vec(&memory_usage(sys.total_memory(), sys.available_memory()))
        }
        SourceKind::Processes => {
            sys.refresh_processes();
            let counts = count_states(sys.processes().values().map(|p| p.status()));
            serde_json::to_vec(&counts)
        }
    }
}

/// Memory breakdown in kilobytes from byte counts
fn memory_usage(total_bytes: u64, available_bytes: u64) -> MemoryUsage {
    let total = total_bytes / 1024;
    let free = available_bytes.min(total_bytes) / 1024;
    let used = total - free;
    let usage = if total > 0 {
        used as f64 * 100.0 / total as f64
    } else {
        0.0
    };
    MemoryUsage { total, free, used, usage }
}

fn count_states<I>(statuses: I) -> ProcessCounts
where
    I: IntoIterator<Item = ProcessStatus>,
{
    let mut counts = ProcessCounts::default();
    for status in statuses {
        counts.total += 1;
        match status {
            ProcessStatus::Run => counts.running += 1,
            ProcessStatus::Zombie | ProcessStatus::Dead => counts.zombie += 1,
            ProcessStatus::Stop | ProcessStatus::Tracing => counts.stopped += 1,
            _ => counts.sleeping += 1,
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{parse, Measurement};

    #[test]
    fn test_count_states_buckets() {
        let counts = count_states([
            ProcessStatus::Run,
            ProcessStatus::Sleep,
            ProcessStatus::Idle,
            ProcessStatus::Zombie,
            ProcessStatus::Dead,
            ProcessStatus::Stop,
            ProcessStatus::Tracing,
            ProcessStatus::Unknown(42),
        ]);
        assert_eq!(
            counts,
            ProcessCounts {
                running: 1,
                total: 8,
                sleeping: 3,
                zombie: 2,
                stopped: 2,
            }
        );
    }

    #[test]
    fn test_memory_usage_kilobytes() {
        let mem = memory_usage(1000 * 1024, 400 * 1024);
        assert_eq!(mem.total, 1000);
        assert_eq!(mem.free, 400);
        assert_eq!(mem.used, 600);
        assert_eq!(mem.usage, 60.0);

        assert_eq!(memory_usage(0, 0).usage, 0.0);
    }

    #[test]
    fn test_native_samples_parse() {
        let mut sys = System::new();
        for kind in SourceKind::ALL {
            let raw = sample(&mut sys, kind).unwrap();
            let measurement = parse(kind, &raw).unwrap();
            assert_eq!(measurement.kind(), kind);
        }

        let raw = sample(&mut sys, SourceKind::Processes).unwrap();
        match parse(SourceKind::Processes, &raw).unwrap() {
            Measurement::Processes(p) => assert!(p.total > 0),
            other => panic!("unexpected measurement {other:?}"),
        }
    }
}
