//! Rolling per-machine state history.
//!
//! The history is an append-only record of classified states, capped by
//! age rather than by count. It backs the uptime and hourly activity
//! aggregations and survives restarts through [`HistoryStore`].

mod activity;
mod store;

pub use activity::{HourlyActivity, hourly_activity, uptime_percentage};
pub use store::HistoryStore;
pub(crate) use store::write_atomic;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::classify::MachineStatus;

/// How far back entries are kept.
pub const RETENTION: Duration = Duration::days(7);

/// One recorded classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub status: MachineStatus,
}

/// History for a single machine, oldest entry first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineHistory {
    entries: Vec<HistoryEntry>,
}

impl MachineHistory {
    /// Append an entry and drop everything older than [`RETENTION`]
    /// relative to it. Returns `false` without recording when the entry
    /// is older than the newest one already held.
    pub fn record(&mut self, entry: HistoryEntry) -> bool {
        if self
            .entries
            .last()
            .is_some_and(|last| entry.timestamp < last.timestamp)
        {
            return false;
        }

        let cutoff = entry.timestamp - RETENTION;
        self.entries.push(entry);
        self.entries.retain(|e| e.timestamp >= cutoff);
        true
    }

    /// Drop entries older than [`RETENTION`] relative to `now`.
    pub fn prune(&mut self, now: OffsetDateTime) {
        let cutoff = now - RETENTION;
        self.entries.retain(|e| e.timestamp >= cutoff);
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Entries stamped within `start..=end`, oldest first. A reversed
    /// range is empty.
    pub fn range(&self, start: OffsetDateTime, end: OffsetDateTime) -> &[HistoryEntry] {
        let from = self.entries.partition_point(|e| e.timestamp < start);
        let to = self.entries.partition_point(|e| e.timestamp <= end);
        &self.entries[from..to.max(from)]
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Histories for every machine the monitor has seen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    machines: BTreeMap<String, MachineHistory>,
}

impl History {
    /// Record one classification for a machine. See
    /// [`MachineHistory::record`].
    pub fn record(&mut self, machine_id: &str, entry: HistoryEntry) -> bool {
        self.machines
            .entry(machine_id.to_string())
            .or_default()
            .record(entry)
    }

    pub fn machine(&self, machine_id: &str) -> Option<&MachineHistory> {
        self.machines.get(machine_id)
    }

    pub fn machines(&self) -> impl Iterator<Item = (&str, &MachineHistory)> {
        self.machines.iter().map(|(id, h)| (id.as_str(), h))
    }

    /// Drop stale entries for every machine and forget machines whose
    /// history emptied out.
    pub fn prune(&mut self, now: OffsetDateTime) {
        for history in self.machines.values_mut() {
            history.prune(now);
        }
        self.machines.retain(|_, history| !history.is_empty());
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}
