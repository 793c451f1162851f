//! Per-machine alert gating.
//!
//! Raw classifications arrive every cycle; operators only want to hear
//! about confirmed changes, and never twice for the same one. The gate
//! tracks the current state run and decides, per cycle, whether a
//! notification leaves the building.
//!
//! ```text
//!                 +----------+
//!    first obs -->| Baseline |
//!                 +----+-----+
//!                      | same level        edge
//!                      v                    v
//!                 +--------+   edge    +--------+--> Notify (once)
//!                 | Steady |<----------| Change |--> Held (grace)
//!                 +--------+  notified +--------+--> Held (paused)
//! ```
//!
//! Unknown is compared as inactive, so a camera dropout inside an
//! inactive stretch does not raise a second alert. The raw status still
//! reaches the history and the notification text untouched.

use time::OffsetDateTime;
use tokio::time::Instant;

use crate::classify::MachineStatus;
use crate::tracing::prelude::*;

/// What the gate decided for one observation.
#[derive(Debug, Clone, PartialEq)]
pub enum GateStatus {
    /// First observation for this machine. Establishes the comparison
    /// point and never notifies.
    Baseline,

    /// Nothing to tell the operator this cycle.
    Steady,

    /// A notification was due but is being withheld.
    Held(HoldReason),

    /// Deliver this change to the operator.
    Notify(StateChange),
}

/// Why a due notification was withheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    /// Still inside the startup grace period. The change is dropped,
    /// not queued; only a later edge can notify.
    Grace,

    /// Alerts are paused by the operator. The change stays pending and
    /// is delivered once on unpause if the level still differs.
    Paused,
}

/// A confirmed state transition bound for the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub machine_id: String,
    pub previous: MachineStatus,
    pub current: MachineStatus,
    /// How long the previous state had held.
    pub previous_lasted: time::Duration,
    /// When the transition was observed, which can precede delivery
    /// when alerts were paused.
    pub at: OffsetDateTime,
}

/// The state run the gate is currently tracking.
#[derive(Debug, Clone, Copy)]
struct Run {
    status: MachineStatus,
    since: OffsetDateTime,
}

/// Debounces one machine's state changes into at most one notification
/// per run.
#[derive(Debug)]
pub struct AlertGate {
    machine_id: String,
    started: Instant,
    grace: std::time::Duration,
    current: Option<Run>,
    /// Latest level transition, kept until it is delivered.
    pending: Option<StateChange>,
    /// Level of the last delivered notification.
    last_notified: Option<MachineStatus>,
}

impl AlertGate {
    /// The grace period runs from construction, which happens at
    /// process start.
    pub fn new(machine_id: impl Into<String>, grace: std::time::Duration) -> Self {
        Self {
            machine_id: machine_id.into(),
            started: Instant::now(),
            grace,
            current: None,
            pending: None,
            last_notified: None,
        }
    }

    /// Feed one classified observation through the gate.
    ///
    /// | last notified | level vs it | edge  | grace | paused | result        |
    /// |---------------|-------------|-------|-------|--------|---------------|
    /// | (first obs)   |             |       |       |        | `Baseline`    |
    /// | none          |             | no    |       |        | `Steady`      |
    /// | none          |             | yes   | yes   |        | `Held(Grace)` |
    /// | none          |             | yes   | no    | yes    | `Held(Paused)`|
    /// | none          |             | yes   | no    | no     | `Notify`      |
    /// | some          | equal       |       |       |        | `Steady`      |
    /// | some          | differs     |       | yes   |        | `Held(Grace)` |
    /// | some          | differs     |       | no    | yes    | `Held(Paused)`|
    /// | some          | differs     |       | no    | no     | `Notify`      |
    ///
    /// "Level" is the status with unknown folded into inactive. Holding
    /// never updates the last-notified level, which is what lets a
    /// paused change catch up later and lets a grace-period change
    /// evaporate.
    pub fn observe(
        &mut self,
        status: MachineStatus,
        paused: bool,
        at: OffsetDateTime,
    ) -> GateStatus {
        let Some(run) = self.current else {
            debug!(
                machine = %self.machine_id,
                state = %status,
                "First observation, establishing baseline"
            );
            self.current = Some(Run { status, since: at });
            return GateStatus::Baseline;
        };

        let level = alert_level(status);
        let edge = level != alert_level(run.status);
        if edge {
            self.pending = Some(StateChange {
                machine_id: self.machine_id.clone(),
                previous: run.status,
                current: status,
                previous_lasted: at - run.since,
                at,
            });
            self.current = Some(Run { status, since: at });
        } else {
            // The raw status may still move within a level, e.g.
            // unknown settling into inactive.
            self.current = Some(Run {
                status,
                since: run.since,
            });
        }

        let due = match self.last_notified {
            Some(last) => level != last,
            None => edge,
        };
        if !due {
            return GateStatus::Steady;
        }

        if self.started.elapsed() < self.grace {
            debug!(
                machine = %self.machine_id,
                state = %status,
                "Holding notification during the startup grace period"
            );
            return GateStatus::Held(HoldReason::Grace);
        }
        if paused {
            info!(
                machine = %self.machine_id,
                state = %status,
                "Alerts paused, holding notification"
            );
            return GateStatus::Held(HoldReason::Paused);
        }

        self.last_notified = Some(level);
        match self.pending.take() {
            Some(change) => GateStatus::Notify(change),
            // A due notification always follows an edge that set
            // `pending`; nothing to deliver otherwise.
            None => GateStatus::Steady,
        }
    }

    #[cfg(test)]
    pub fn last_notified(&self) -> Option<MachineStatus> {
        self.last_notified
    }
}

/// Alert-level view of a status. Unknown rides with inactive so a
/// camera dropout does not double-alert an inactive stretch.
fn alert_level(status: MachineStatus) -> MachineStatus {
    match status {
        MachineStatus::Unknown => MachineStatus::Inactive,
        other => other,
    }
}
