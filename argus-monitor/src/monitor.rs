//! The monitoring cycle.
//!
//! Each cycle captures one frame, measures and classifies every
//! configured machine, records the result, and lets the per-machine
//! alert gate decide whether the operator hears about it. The loop is
//! cooperative: config reloads and operator controls are picked up
//! between cycles, never mid-cycle.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::alert::{AlertGate, AlertMessage, Dispatcher, GateStatus, StateChange};
use crate::camera::FrameSource;
use crate::classify::{MachineStatus, classify};
use crate::config::{ConfigWatcher, ControlsReader, MonitorConfig};
use crate::detect::{IndicatorExtractor, RegionSignals};
use crate::error::Result;
use crate::history::{History, HistoryEntry, HistoryStore, uptime_percentage, write_atomic};
use crate::tracing::prelude::*;

/// One classified observation, as appended to the observation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub machine_id: String,
    pub classified_state: MachineStatus,
    pub raw_signals: RegionSignals,
    pub decision_path: String,
}

/// Append-only JSONL observation log, one file per calendar day.
///
/// Records are the raw material for threshold tuning: they carry the
/// measured signals alongside the decision, so a candidate config can
/// be replayed against them offline.
#[derive(Debug)]
pub struct ObservationLog {
    dir: PathBuf,
}

impl ObservationLog {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Append one record to the file for the observation's date.
    pub fn append(&self, observation: &Observation) -> Result<()> {
        let path = self
            .dir
            .join(format!("observations-{}.jsonl", observation.timestamp.date()));
        let mut line = serde_json::to_vec(observation)?;
        line.push(b'\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(&line)?;
        Ok(())
    }
}

/// Classifications tallied by state across the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub active: u64,
    pub inactive: u64,
    pub unknown: u64,
}

impl StateCounts {
    fn tally(&mut self, status: MachineStatus) {
        match status {
            MachineStatus::Active => self.active += 1,
            MachineStatus::Inactive => self.inactive += 1,
            MachineStatus::Unknown => self.unknown += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.active + self.inactive + self.unknown
    }
}

/// What one monitor run amounted to. Written to `session.json` on
/// shutdown and returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub duration_seconds: u64,
    pub cycles_run: u64,
    pub state_counts: StateCounts,
    pub notifications_sent: u64,
}

/// Drives capture, classification, history and alerting.
pub struct Monitor {
    config: MonitorConfig,
    watcher: Option<ConfigWatcher>,
    controls: ControlsReader,
    source: Box<dyn FrameSource>,
    extractor: Box<dyn IndicatorExtractor>,
    store: HistoryStore,
    history: History,
    observations: ObservationLog,
    session_path: PathBuf,
    dispatcher: Dispatcher,
    gates: BTreeMap<String, AlertGate>,
    started_at: OffsetDateTime,
    cycles_run: u64,
    notifications_sent: u64,
    state_counts: StateCounts,
}

impl Monitor {
    /// Build the monitor, creating the state directory and loading any
    /// surviving history. A corrupt history file is logged and replaced
    /// rather than fatal.
    pub fn new(
        config: MonitorConfig,
        watcher: Option<ConfigWatcher>,
        source: Box<dyn FrameSource>,
        extractor: Box<dyn IndicatorExtractor>,
        dispatcher: Dispatcher,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.state_dir)?;
        std::fs::create_dir_all(config.observations_dir())?;

        let started_at = OffsetDateTime::now_utc();
        let store = HistoryStore::new(config.history_path());
        let history = match store.load(started_at) {
            Ok(history) => history,
            Err(error) => {
                warn!(%error, "Failed to load history, starting empty");
                History::default()
            }
        };

        let controls = ControlsReader::new(config.controls_path());
        let observations = ObservationLog::new(config.observations_dir());
        let session_path = config.session_path();

        Ok(Self {
            config,
            watcher,
            controls,
            source,
            extractor,
            store,
            history,
            observations,
            session_path,
            dispatcher,
            gates: BTreeMap::new(),
            started_at,
            cycles_run: 0,
            notifications_sent: 0,
            state_counts: StateCounts::default(),
        })
    }

    /// Run cycles until cancelled, then write and return the session
    /// summary.
    pub async fn run(mut self, cancellation: CancellationToken) -> SessionSummary {
        info!(
            interval_seconds = self.config.interval_seconds,
            machines = self.config.machines.len(),
            aggregation = %self.config.detection.aggregation,
            "Monitor running"
        );

        let mut interval = self.make_interval();
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("Shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let interval_before = self.config.interval_seconds;
                    self.cycle(OffsetDateTime::now_utc()).await;
                    if self.config.interval_seconds != interval_before {
                        info!(
                            interval_seconds = self.config.interval_seconds,
                            "Cycle interval changed"
                        );
                        interval = self.make_interval();
                    }
                }
            }
        }

        self.finish()
    }

    /// Run exactly one cycle and write the summary.
    pub async fn run_once(mut self) -> SessionSummary {
        self.cycle(OffsetDateTime::now_utc()).await;
        self.finish()
    }

    fn make_interval(&self) -> Interval {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.interval_seconds));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    /// One full pass: reload knobs, capture, then classify and record
    /// every machine. A failed capture skips the pass but still counts
    /// it.
    async fn cycle(&mut self, now: OffsetDateTime) {
        self.cycles_run += 1;

        let reloaded = self.watcher.as_mut().and_then(|w| w.maybe_reload());
        if let Some(config) = reloaded {
            self.apply_config(config);
        }
        let paused = self.controls.refresh().alerts_paused;

        let frame = match self.source.capture().await {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, "Skipping cycle, no usable frame");
                return;
            }
        };

        let machines = self.config.machines.clone();
        for machine in &machines {
            let signals = match self
                .extractor
                .extract(&frame, machine, &self.config.detection)
                .await
            {
                Ok(signals) => signals,
                Err(error) => {
                    warn!(machine = %machine.id, %error, "Extraction failed");
                    RegionSignals::new()
                }
            };

            let classification = classify(&signals, machine, &self.config.detection);
            let status = classification.status;
            debug!(
                machine = %machine.id,
                state = %status,
                decision_path = %classification.decision_path,
                "Classified"
            );

            let previous = self
                .history
                .machine(&machine.id)
                .and_then(|h| h.last())
                .map(|entry| entry.status);
            if previous.is_some_and(|p| p != status) {
                info!(
                    machine = %machine.id,
                    previous_state = ?previous,
                    new_state = ?status,
                    "Machine state changed"
                );
            }

            if !self.history.record(
                &machine.id,
                HistoryEntry {
                    timestamp: now,
                    status,
                },
            ) {
                warn!(machine = %machine.id, "Rejected out-of-order history entry");
            }
            self.state_counts.tally(status);

            if let Err(error) = self.observations.append(&Observation {
                timestamp: now,
                machine_id: machine.id.clone(),
                classified_state: status,
                raw_signals: signals,
                decision_path: classification.decision_path,
            }) {
                warn!(machine = %machine.id, %error, "Failed to append observation");
            }

            let grace = Duration::from_secs(self.config.alerts.grace_period_minutes * 60);
            let gate = self
                .gates
                .entry(machine.id.clone())
                .or_insert_with(|| AlertGate::new(machine.id.clone(), grace));
            match gate.observe(status, paused, now) {
                GateStatus::Baseline | GateStatus::Steady => {}
                GateStatus::Held(reason) => {
                    debug!(machine = %machine.id, ?reason, "Notification held");
                }
                GateStatus::Notify(change) => self.deliver(&change).await,
            }
        }

        if let Err(error) = self.store.save(&self.history) {
            error!(%error, "Failed to save history");
        }
    }

    async fn deliver(&mut self, change: &StateChange) {
        if !self.config.alerts.covers(&change.machine_id) {
            debug!(
                machine = %change.machine_id,
                "Machine not in the alert list, logging only"
            );
            return;
        }
        if self.dispatcher.is_empty() {
            return;
        }

        let message = AlertMessage::from_change(change, &self.config.alerts.email_subject);
        let outcome = self.dispatcher.dispatch(&message).await;
        if outcome.any_delivered() {
            self.notifications_sent += 1;
        } else {
            error!(
                machine = %change.machine_id,
                "Notification failed on every channel"
            );
        }
    }

    /// Thresholds, machine lists, alert policy and the cycle interval
    /// take effect on the next cycle. The frame source, state paths and
    /// delivery channels keep their startup values; changing those
    /// needs a restart.
    fn apply_config(&mut self, config: MonitorConfig) {
        self.config = config;
    }

    fn finish(self) -> SessionSummary {
        let now = OffsetDateTime::now_utc();
        for (machine_id, history) in self.history.machines() {
            let uptime = uptime_percentage(history, now - time::Duration::hours(24), now);
            info!(
                machine = %machine_id,
                uptime_percent = %format!("{uptime:.1}"),
                "Uptime over the last 24h"
            );
        }

        let duration = now - self.started_at;
        let summary = SessionSummary {
            started_at: self.started_at,
            duration_seconds: duration.whole_seconds().max(0) as u64,
            cycles_run: self.cycles_run,
            state_counts: self.state_counts,
            notifications_sent: self.notifications_sent,
        };

        match serde_json::to_vec_pretty(&summary) {
            Ok(raw) => {
                if let Err(error) = write_atomic(&self.session_path, &raw) {
                    error!(%error, "Failed to write session summary");
                }
            }
            Err(error) => error!(%error, "Failed to serialize session summary"),
        }

        info!(
            cycles_run = summary.cycles_run,
            notifications_sent = summary.notifications_sent,
            "Session finished"
        );
        summary
    }

    #[cfg(test)]
    fn history(&self) -> &History {
        &self.history
    }
}
