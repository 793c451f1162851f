//! Indicator signal extraction.
//!
//! Extraction measures each configured region of a frame and reports
//! raw numbers; thresholding those numbers into a machine state happens
//! in [`crate::classify`].

mod heuristic;

pub use heuristic::HeuristicExtractor;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::camera::Frame;
use crate::config::{DetectionTuning, MachineConfig};

/// Which heuristic a machine's regions are measured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DetectionMode {
    /// Count red and orange indicator pixels.
    #[default]
    Color,
    /// Compare the brightness of horizontal bands within each region.
    Brightness,
}

/// Raw measurements for one region, before any thresholding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RegionSignal {
    /// Fractions of indicator pixels in the region's top (red) and
    /// middle (orange) thirds.
    Color { red_ratio: f64, orange_ratio: f64 },
    /// Mean luminance of the region's three horizontal bands.
    Brightness { top: f64, mid: f64, bottom: f64 },
    /// The region produced no usable measurement.
    Degenerate,
}

/// Signals keyed by region name. Ordered so logs and observation
/// records are stable across runs.
pub type RegionSignals = BTreeMap<String, RegionSignal>;

/// Errors raised while measuring a frame. Per-region problems degrade
/// to [`RegionSignal::Degenerate`] instead of erroring.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("frame has no pixels")]
    EmptyFrame,
}

/// Measures a machine's configured regions on one frame.
///
/// Tuning is passed per call so a config reload takes effect on the
/// next cycle without rebuilding the extractor.
#[async_trait]
pub trait IndicatorExtractor: Send {
    async fn extract(
        &self,
        frame: &Frame,
        machine: &MachineConfig,
        tuning: &DetectionTuning,
    ) -> Result<RegionSignals, ExtractionError>;
}
