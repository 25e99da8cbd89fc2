//! Fan-in of sampler output into one latest-value table
//!
//! Each source kind has a single-slot mailbox (a `watch` channel): publishing
//! overwrites whatever the intake has not consumed yet, so a slow intake never
//! builds a backlog and never blocks a sampler. One intake task per slot moves
//! the newest value into the shared table with a whole-entry replace under the
//! write lock. Readers take the read lock only long enough to clone the `Arc`s.

use crate::metrics::{CpuUsage, Measurement, MemoryUsage, ProcessCounts, SourceKind};
use crate::state::{new_state, Shared};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

type Slot = Option<Arc<Measurement>>;

#[derive(Default)]
struct LatestTable {
    entries: [Slot; 3],
}

/// Point-in-time copy of the latest measurement per source kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    entries: [Slot; 3],
}

impl Snapshot {
    pub fn get(&self, kind: SourceKind) -> Option<&Measurement> {
        self.entries[kind.index()].as_deref()
    }

    pub fn cpu(&self) -> Option<&CpuUsage> {
        match self.get(SourceKind::Cpu) {
            Some(Measurement::Cpu(cpu)) => Some(cpu),
            _ => None,
        }
    }

    pub fn ram(&self) -> Option<&MemoryUsage> {
        match self.get(SourceKind::Ram) {
            Some(Measurement::Ram(ram)) => Some(ram),
            _ => None,
        }
    }

    pub fn processes(&self) -> Option<&ProcessCounts> {
        match self.get(SourceKind::Processes) {
            Some(Measurement::Processes(p)) => Some(p),
            _ => None,
        }
    }

    /// Source kinds that have never reported
    pub fn missing(&self) -> Vec<SourceKind> {
        SourceKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_none())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(Option::is_some)
    }
}

/// Write handle for one source kind's mailbox
#[derive(Clone)]
pub struct Publisher {
    kind: SourceKind,
    slot: watch::Sender<Slot>,
}

impl Publisher {
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Hand a measurement over without waiting; an unconsumed older value is dropped
    pub fn publish(&self, measurement: Measurement) {
        debug_assert_eq!(measurement.kind(), self.kind);
        if self.slot.send_replace(Some(Arc::new(measurement))).is_some() {
            trace!("replaced previous {} value in mailbox", self.kind);
        }
    }
}

#[derive(Clone)]
pub struct Aggregator {
    table: Shared<LatestTable>,
    slots: Arc<[watch::Sender<Slot>; 3]>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            table: new_state(LatestTable::default()),
            slots: Arc::new([
                watch::Sender::new(None),
                watch::Sender::new(None),
                watch::Sender::new(None),
            ]),
        }
    }

    pub fn publisher(&self, kind: SourceKind) -> Publisher {
        Publisher {
            kind,
            slot: self.slots[kind.index()].clone(),
        }
    }

    /// Start one intake task per mailbox; they run for the life of the process
    pub fn spawn_intake(&self) -> Vec<JoinHandle<()>> {
        SourceKind::ALL
            .into_iter()
            .map(|kind| {
                let mut rx = self.slots[kind.index()].subscribe();
                let table = self.table.clone();
                tokio::spawn(async move {
                    // A value published before we subscribed is already marked seen
                    let pending = rx.borrow_and_update().clone();
                    if let Some(measurement) = pending {
                        apply(&table, kind, measurement);
                    }
                    while rx.changed().await.is_ok() {
                        let latest = rx.borrow_and_update().clone();
                        if let Some(measurement) = latest {
                            apply(&table, kind, measurement);
                        }
                    }
                    debug!("{kind} mailbox closed, intake stopping");
                })
            })
            .collect()
    }

    pub fn snapshot(&self) -> Snapshot {
        let table = self.table.read();
        Snapshot {
            entries: table.entries.clone(),
        }
    }
}

fn apply(table: &Shared<LatestTable>, kind: SourceKind, measurement: Arc<Measurement>) {
    trace!("applying {}", measurement.summary());
    table.write().entries[kind.index()] = Some(measurement);
}
