//! Turns per-region indicator signals into a discrete machine state.
//!
//! Classification is a pure function of the signals and the detection
//! tuning; it never looks at the clock or at previous cycles. Debouncing
//! and alert policy live in [`crate::alert`].

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::config::{DetectionTuning, MachineConfig, RoiAggregation};
use crate::detect::{RegionSignal, RegionSignals};

/// Operating state derived from one frame's indicator signals.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MachineStatus {
    /// The working indicator and the machine-on indicator are both lit.
    Active,
    /// Indicators were readable but not both lit.
    Inactive,
    /// Signals were missing or degenerate. Logged distinctly; the alert
    /// gate compares it as inactive.
    Unknown,
}

/// Result of classifying one machine's signals for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub status: MachineStatus,
    /// Human-readable record of which predicates fired, e.g.
    /// `working(0.900)+machine_on(0.612)` or `top(1.80x)`.
    pub decision_path: String,
}

/// Classify one machine from its extracted region signals.
///
/// Color regions are "lit" only when the red (working) ratio and the
/// orange (machine-on) ratio both reach their thresholds. Brightness
/// regions are "lit" when the top or middle band reaches its configured
/// multiple of the bottom-band baseline. Regions without a usable signal
/// abstain; the remaining votes are combined under the configured
/// aggregation policy, and no votes at all yields
/// [`MachineStatus::Unknown`].
pub fn classify(
    signals: &RegionSignals,
    machine: &MachineConfig,
    tuning: &DetectionTuning,
) -> Classification {
    if signals.is_empty() {
        return Classification {
            status: MachineStatus::Unknown,
            decision_path: "no_signal".to_string(),
        };
    }

    let mut votes = Vec::with_capacity(signals.len());
    let mut paths = Vec::with_capacity(signals.len());

    for (name, signal) in signals {
        let (vote, path) = judge_region(name, signal, machine, tuning);
        votes.push(vote);
        paths.push((name.as_str(), path));
    }

    let status = aggregate(&votes, tuning.aggregation);

    let decision_path = if let [(_, only)] = paths.as_slice() {
        only.clone()
    } else {
        paths
            .iter()
            .map(|(name, path)| format!("{name}={path}"))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    Classification {
        status,
        decision_path,
    }
}

/// One region's verdict: `Some(lit)` or `None` when the region abstains.
fn judge_region(
    name: &str,
    signal: &RegionSignal,
    machine: &MachineConfig,
    tuning: &DetectionTuning,
) -> (Option<bool>, String) {
    match *signal {
        RegionSignal::Color {
            red_ratio,
            orange_ratio,
        } => {
            let working = red_ratio >= tuning.red_activation_ratio;
            let machine_on = orange_ratio >= tuning.orange_activation_ratio;

            let mut parts = Vec::new();
            if working {
                parts.push(format!("working({red_ratio:.3})"));
            }
            if machine_on {
                parts.push(format!("machine_on({orange_ratio:.3})"));
            }
            let path = if parts.is_empty() {
                "machine_off".to_string()
            } else {
                parts.join("+")
            };

            (Some(working && machine_on), path)
        }

        RegionSignal::Brightness { top, mid, bottom } => {
            if bottom <= 0.0 {
                return (None, "no_baseline".to_string());
            }

            let [top_ratio, mid_ratio] = machine.brightness_ratios_for(name, tuning);
            let top_lit = top >= bottom * top_ratio;
            let mid_lit = mid >= bottom * mid_ratio;

            let mut parts = Vec::new();
            if top_lit {
                parts.push(format!("top({:.2}x)", top / bottom));
            }
            if mid_lit {
                parts.push(format!("mid({:.2}x)", mid / bottom));
            }
            let path = if parts.is_empty() {
                "dark".to_string()
            } else {
                parts.join("+")
            };

            (Some(top_lit || mid_lit), path)
        }

        RegionSignal::Degenerate => (None, "no_signal".to_string()),
    }
}

fn aggregate(votes: &[Option<bool>], policy: RoiAggregation) -> MachineStatus {
    let known: Vec<bool> = votes.iter().flatten().copied().collect();
    if known.is_empty() {
        return MachineStatus::Unknown;
    }

    let lit = known.iter().filter(|&&v| v).count();
    let active = match policy {
        RoiAggregation::Any => lit > 0,
        RoiAggregation::All => lit == known.len(),
        RoiAggregation::Majority => lit * 2 > known.len(),
    };

    if active {
        MachineStatus::Active
    } else {
        MachineStatus::Inactive
    }
}
