//! On-disk configuration for the monitor.
//!
//! The config file is JSON. It is loaded once at startup and re-checked
//! between cycles by [`ConfigWatcher`]; operator switches that change
//! more often live in a separate controls file read by
//! [`ControlsReader`].

mod controls;
mod watcher;

pub use controls::{Controls, ControlsReader};
pub use watcher::ConfigWatcher;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::detect::DetectionMode;
use crate::tracing::prelude::*;

/// Errors raised while loading or validating a config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {problems}")]
    Invalid { problems: String },
}

/// Top-level monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between monitoring cycles.
    pub interval_seconds: u64,

    /// Directory holding history, controls, observations and the
    /// session summary.
    pub state_dir: PathBuf,

    /// Directory the camera uploads frames into.
    pub spool_dir: PathBuf,

    /// Frames older than this are treated as a stale camera feed.
    pub max_frame_age_seconds: u64,

    /// Machines to monitor.
    pub machines: Vec<MachineConfig>,

    /// Indicator detection thresholds.
    pub detection: DetectionTuning,

    /// Alert channels and policy.
    pub alerts: AlertConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 120,
            state_dir: PathBuf::from("/var/lib/argus-monitor"),
            spool_dir: PathBuf::from("/var/spool/argus-monitor/frames"),
            max_frame_age_seconds: 600,
            machines: vec![MachineConfig::default()],
            detection: DetectionTuning::default(),
            alerts: AlertConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express. All problems are
    /// collected into a single error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.interval_seconds == 0 {
            problems.push("interval_seconds must be at least 1".to_string());
        }
        if self.machines.is_empty() {
            problems.push("at least one machine must be configured".to_string());
        }

        let mut seen = HashSet::new();
        for machine in &self.machines {
            if !seen.insert(machine.id.as_str()) {
                problems.push(format!("duplicate machine id {}", machine.id));
            }
            if machine.rois.is_empty() {
                problems.push(format!("machine {} has no regions", machine.id));
            }
            for roi in &machine.rois {
                let [x1, y1, x2, y2] = roi.bounds;
                let in_range = |v: f64| (0.0..=1.0).contains(&v);
                if !(in_range(x1) && in_range(y1) && in_range(x2) && in_range(y2))
                    || x1 >= x2
                    || y1 >= y2
                {
                    problems.push(format!(
                        "machine {} region {} has invalid bounds",
                        machine.id, roi.name
                    ));
                }
                if let Some([top, mid]) = roi.brightness_ratios {
                    if top <= 0.0 || mid <= 0.0 {
                        problems.push(format!(
                            "machine {} region {} has non-positive brightness ratios",
                            machine.id, roi.name
                        ));
                    }
                }
            }
        }

        let ratio_range = 0.0..=1.0;
        if !ratio_range.contains(&self.detection.red_activation_ratio) {
            problems.push("red_activation_ratio must be within 0..=1".to_string());
        }
        if !ratio_range.contains(&self.detection.orange_activation_ratio) {
            problems.push("orange_activation_ratio must be within 0..=1".to_string());
        }
        let [top, mid] = self.detection.brightness_ratios;
        if top <= 0.0 || mid <= 0.0 {
            problems.push("brightness_ratios must be positive".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid {
                problems: problems.join("; "),
            })
        }
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir.join("history.json")
    }

    pub fn controls_path(&self) -> PathBuf {
        self.state_dir.join("controls.json")
    }

    pub fn session_path(&self) -> PathBuf {
        self.state_dir.join("session.json")
    }

    pub fn observations_dir(&self) -> PathBuf {
        self.state_dir.join("observations")
    }
}

/// One monitored machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Stable machine identifier, e.g. `machine_0`.
    pub id: String,

    /// Which extraction heuristic this machine uses.
    #[serde(default)]
    pub mode: DetectionMode,

    /// Regions of interest in normalized frame coordinates.
    #[serde(default)]
    pub rois: Vec<Roi>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            id: "machine_0".to_string(),
            mode: DetectionMode::default(),
            rois: vec![Roi::default()],
        }
    }
}

impl MachineConfig {
    /// Top/mid brightness ratios for a region, falling back to the
    /// tuning defaults when the region carries no override.
    pub fn brightness_ratios_for(&self, region: &str, tuning: &DetectionTuning) -> [f64; 2] {
        self.rois
            .iter()
            .find(|roi| roi.name == region)
            .and_then(|roi| roi.brightness_ratios)
            .unwrap_or(tuning.brightness_ratios)
    }
}

/// A named sub-rectangle of the frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roi {
    pub name: String,

    /// `[x1, y1, x2, y2]` as fractions of the frame size, each within
    /// `0.0..=1.0` with `x1 < x2` and `y1 < y2`.
    pub bounds: [f64; 4],

    /// Per-region override of the brightness ratio pair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness_ratios: Option<[f64; 2]>,
}

impl Default for Roi {
    fn default() -> Self {
        Self {
            name: "indicator".to_string(),
            bounds: [0.0, 0.0, 1.0, 1.0],
            brightness_ratios: None,
        }
    }
}

/// Thresholds for the indicator heuristics.
///
/// `green_activation_ratio` is accepted as a legacy alias for
/// `orange_activation_ratio`; the alias is resolved once at load time
/// and never consulted again.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawDetectionTuning")]
pub struct DetectionTuning {
    /// Minimum red pixel ratio for the working lamp.
    pub red_activation_ratio: f64,

    /// Minimum orange pixel ratio for the machine-on lamp.
    pub orange_activation_ratio: f64,

    /// Red hue wraps around zero: a pixel counts when its hue is at
    /// most `red_hue_low_max` or at least `red_hue_high_min`.
    pub red_hue_low_max: u8,
    pub red_hue_high_min: u8,

    /// Orange hue band, inclusive on both ends.
    pub orange_hue_min: u8,
    pub orange_hue_max: u8,

    /// Saturation and value floors for indicator pixels.
    pub min_saturation: u8,
    pub min_value: u8,

    /// Default `[top, mid]` multiples of the bottom-band baseline for
    /// brightness mode.
    pub brightness_ratios: [f64; 2],

    /// How multiple regions combine into one verdict.
    pub aggregation: RoiAggregation,
}

impl Default for DetectionTuning {
    fn default() -> Self {
        RawDetectionTuning::default().into()
    }
}

/// Wire form of [`DetectionTuning`], carrying the legacy alias.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawDetectionTuning {
    red_activation_ratio: f64,
    orange_activation_ratio: Option<f64>,
    green_activation_ratio: Option<f64>,
    red_hue_low_max: u8,
    red_hue_high_min: u8,
    orange_hue_min: u8,
    orange_hue_max: u8,
    min_saturation: u8,
    min_value: u8,
    brightness_ratios: [f64; 2],
    aggregation: RoiAggregation,
}

impl Default for RawDetectionTuning {
    fn default() -> Self {
        Self {
            red_activation_ratio: 0.5,
            orange_activation_ratio: None,
            green_activation_ratio: None,
            red_hue_low_max: 10,
            red_hue_high_min: 170,
            orange_hue_min: 8,
            orange_hue_max: 30,
            min_saturation: 90,
            min_value: 90,
            brightness_ratios: [1.7, 2.2],
            aggregation: RoiAggregation::Any,
        }
    }
}

impl From<RawDetectionTuning> for DetectionTuning {
    fn from(raw: RawDetectionTuning) -> Self {
        let orange_activation_ratio = match (raw.orange_activation_ratio, raw.green_activation_ratio)
        {
            (Some(orange), _) => orange,
            (None, Some(green)) => {
                warn!(
                    green_activation_ratio = green,
                    "green_activation_ratio is deprecated, use orange_activation_ratio"
                );
                green
            }
            (None, None) => 0.53,
        };

        Self {
            red_activation_ratio: raw.red_activation_ratio,
            orange_activation_ratio,
            red_hue_low_max: raw.red_hue_low_max,
            red_hue_high_min: raw.red_hue_high_min,
            orange_hue_min: raw.orange_hue_min,
            orange_hue_max: raw.orange_hue_max,
            min_saturation: raw.min_saturation,
            min_value: raw.min_value,
            brightness_ratios: raw.brightness_ratios,
            aggregation: raw.aggregation,
        }
    }
}

/// Policy for combining multiple region votes into one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RoiAggregation {
    /// Active when any region is lit.
    #[default]
    Any,
    /// Active only when every voting region is lit.
    All,
    /// Active when more than half of the voting regions are lit.
    Majority,
}

/// Alert policy and delivery channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Machines that may raise alerts. Empty means all machines.
    pub alert_machines: Vec<String>,

    /// Suppress alerts for this long after the monitor starts.
    pub grace_period_minutes: u64,

    /// Base subject for notifications; the machine id and new state are
    /// appended per message.
    pub email_subject: String,

    pub email: Option<EmailConfig>,
    pub sms: Option<SmsConfig>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            alert_machines: vec!["machine_0".to_string()],
            grace_period_minutes: 15,
            email_subject: "Laser Monitor Alert".to_string(),
            email: None,
            sms: None,
        }
    }
}

impl AlertConfig {
    /// Whether alerts are enabled for this machine.
    pub fn covers(&self, machine_id: &str) -> bool {
        self.alert_machines.is_empty() || self.alert_machines.iter().any(|m| m == machine_id)
    }
}

/// HTTP mail relay settings. The API token is taken from the
/// `ARGUS_EMAIL_TOKEN` environment variable at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Relay endpoint, e.g. `https://api.mailgun.net/v3/example.org/messages`.
    pub api_url: String,
    pub from: String,
    pub recipients: Vec<String>,
}

/// Twilio-style SMS settings. Credentials are taken from the
/// `ARGUS_TWILIO_SID` and `ARGUS_TWILIO_TOKEN` environment variables at
/// startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    /// Message endpoint, e.g.
    /// `https://api.twilio.com/2010-04-01/Accounts/AC.../Messages.json`.
    pub api_url: String,
    pub from_number: String,
    pub recipients: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_round_trip_the_default_config() {
        let config = MonitorConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: MonitorConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.interval_seconds, 120);
        assert_eq!(parsed.detection.orange_activation_ratio, 0.53);
        assert_eq!(parsed.machines.len(), 1);
        parsed.validate().unwrap();
    }

    #[test]
    fn should_accept_the_legacy_green_ratio_alias() {
        let tuning: DetectionTuning =
            serde_json::from_str(r#"{"green_activation_ratio": 0.61}"#).unwrap();
        assert_eq!(tuning.orange_activation_ratio, 0.61);
    }

    #[test]
    fn should_prefer_the_orange_ratio_over_the_alias() {
        let tuning: DetectionTuning = serde_json::from_str(
            r#"{"orange_activation_ratio": 0.7, "green_activation_ratio": 0.2}"#,
        )
        .unwrap();
        assert_eq!(tuning.orange_activation_ratio, 0.7);
    }

    #[test]
    fn should_fall_back_to_the_default_orange_ratio() {
        let tuning: DetectionTuning = serde_json::from_str("{}").unwrap();
        assert_eq!(tuning.orange_activation_ratio, 0.53);
    }

    #[test]
    fn should_not_serialize_the_legacy_alias() {
        let json = serde_json::to_string(&DetectionTuning::default()).unwrap();
        assert!(json.contains("orange_activation_ratio"));
        assert!(!json.contains("green_activation_ratio"));
    }

    #[test]
    fn should_reject_a_zero_interval() {
        let mut config = MonitorConfig::default();
        config.interval_seconds = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn should_reject_an_empty_machine_list() {
        let mut config = MonitorConfig::default();
        config.machines.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_duplicate_machine_ids() {
        let mut config = MonitorConfig::default();
        config.machines.push(MachineConfig::default());
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("duplicate machine id"));
    }

    #[test]
    fn should_reject_inverted_roi_bounds() {
        let mut config = MonitorConfig::default();
        config.machines[0].rois[0].bounds = [0.8, 0.0, 0.2, 1.0];
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("invalid bounds"));
    }

    #[test]
    fn should_collect_every_problem_into_one_error() {
        let mut config = MonitorConfig::default();
        config.interval_seconds = 0;
        config.machines[0].rois.clear();
        let error = config.validate().unwrap_err();
        let text = error.to_string();
        assert!(text.contains("interval_seconds"));
        assert!(text.contains("no regions"));
    }

    #[test]
    fn should_cover_all_machines_when_the_allowlist_is_empty() {
        let mut alerts = AlertConfig::default();
        alerts.alert_machines.clear();
        assert!(alerts.covers("machine_7"));
    }

    #[test]
    fn should_only_cover_listed_machines() {
        let alerts = AlertConfig::default();
        assert!(alerts.covers("machine_0"));
        assert!(!alerts.covers("machine_1"));
    }

    #[test]
    fn should_load_a_config_file_from_disk() {
        let path = std::env::temp_dir().join(format!(
            "argus-config-load-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, r#"{"interval_seconds": 300}"#).unwrap();

        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config.interval_seconds, 300);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn should_surface_parse_failures() {
        let path = std::env::temp_dir().join(format!(
            "argus-config-bad-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            MonitorConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn should_surface_a_missing_file_as_io() {
        let path = std::env::temp_dir().join("argus-config-does-not-exist.json");
        assert!(matches!(MonitorConfig::load(&path), Err(ConfigError::Io(_))));
    }
}
