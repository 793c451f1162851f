//! Fixed-function indicator heuristics.
//!
//! Color mode counts red and orange pixels in the top and middle thirds
//! of a region, which is where the working and machine-on lamps sit in
//! the camera's view. Brightness mode compares the mean luminance of a
//! region's three horizontal bands against the bottom band, for setups
//! whose lamps wash out the camera's color response.

use std::ops::Range;

use async_trait::async_trait;
use image::Rgb;

use crate::camera::Frame;
use crate::config::{DetectionTuning, MachineConfig, Roi};
use crate::tracing::prelude::*;

use super::{
    DetectionMode, ExtractionError, IndicatorExtractor, RegionSignal, RegionSignals,
};

/// Measures regions directly on the frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicExtractor;

#[async_trait]
impl IndicatorExtractor for HeuristicExtractor {
    async fn extract(
        &self,
        frame: &Frame,
        machine: &MachineConfig,
        tuning: &DetectionTuning,
    ) -> Result<RegionSignals, ExtractionError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(ExtractionError::EmptyFrame);
        }

        let mut signals = RegionSignals::new();
        for roi in &machine.rois {
            let signal = match machine.mode {
                DetectionMode::Color => measure_color(frame, roi, tuning),
                DetectionMode::Brightness => measure_brightness(frame, roi),
            };
            if matches!(signal, RegionSignal::Degenerate) {
                debug!(
                    machine = %machine.id,
                    region = %roi.name,
                    "Region produced no usable signal"
                );
            }
            signals.insert(roi.name.clone(), signal);
        }
        Ok(signals)
    }
}

/// A region's pixel rectangle within the frame.
struct Rect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

/// Resolve normalized bounds to pixels. `None` when the region rounds
/// down to nothing on this frame.
fn roi_rect(frame: &Frame, bounds: [f64; 4]) -> Option<Rect> {
    let (width, height) = frame.dimensions();
    let [x1, y1, x2, y2] = bounds;

    let px1 = (x1 * f64::from(width)) as u32;
    let py1 = (y1 * f64::from(height)) as u32;
    let px2 = ((x2 * f64::from(width)) as u32).min(width);
    let py2 = ((y2 * f64::from(height)) as u32).min(height);

    if px2 <= px1 || py2 <= py1 {
        return None;
    }
    Some(Rect {
        x: px1,
        y: py1,
        width: px2 - px1,
        height: py2 - py1,
    })
}

fn measure_color(frame: &Frame, roi: &Roi, tuning: &DetectionTuning) -> RegionSignal {
    let Some(rect) = roi_rect(frame, roi.bounds) else {
        return RegionSignal::Degenerate;
    };
    let third = rect.height / 3;
    if third == 0 {
        return RegionSignal::Degenerate;
    }

    let red_ratio = band_ratio(frame, &rect, 0..third, |(h, s, v)| {
        (h <= tuning.red_hue_low_max || h >= tuning.red_hue_high_min)
            && s >= tuning.min_saturation
            && v >= tuning.min_value
    });
    let orange_ratio = band_ratio(frame, &rect, third..third * 2, |(h, s, v)| {
        (tuning.orange_hue_min..=tuning.orange_hue_max).contains(&h)
            && s >= tuning.min_saturation
            && v >= tuning.min_value
    });

    RegionSignal::Color {
        red_ratio,
        orange_ratio,
    }
}

fn measure_brightness(frame: &Frame, roi: &Roi) -> RegionSignal {
    let Some(rect) = roi_rect(frame, roi.bounds) else {
        return RegionSignal::Degenerate;
    };
    let third = rect.height / 3;
    if third == 0 {
        return RegionSignal::Degenerate;
    }

    // The bottom band absorbs the remainder rows.
    let top = mean_luma(frame, &rect, 0..third);
    let mid = mean_luma(frame, &rect, third..third * 2);
    let bottom = mean_luma(frame, &rect, third * 2..rect.height);

    RegionSignal::Brightness { top, mid, bottom }
}

/// Fraction of pixels in the given rows (relative to the rect) matching
/// the predicate.
fn band_ratio(
    frame: &Frame,
    rect: &Rect,
    rows: Range<u32>,
    matches: impl Fn((u8, u8, u8)) -> bool,
) -> f64 {
    let mut lit = 0u64;
    let mut total = 0u64;
    for row in rows {
        for col in 0..rect.width {
            let Rgb([r, g, b]) = *frame.get_pixel(rect.x + col, rect.y + row);
            if matches(rgb_to_hsv(r, g, b)) {
                lit += 1;
            }
            total += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        lit as f64 / total as f64
    }
}

/// Mean BT.601 luminance of the given rows.
fn mean_luma(frame: &Frame, rect: &Rect, rows: Range<u32>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0u64;
    for row in rows {
        for col in 0..rect.width {
            let Rgb([r, g, b]) = *frame.get_pixel(rect.x + col, rect.y + row);
            sum += 0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// RGB to HSV in OpenCV's integer scale: hue 0..=179, saturation and
/// value 0..=255.
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let rf = f64::from(r) / 255.0;
    let gf = f64::from(g) / 255.0;
    let bf = f64::from(b) / 255.0;

    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let hue_degrees = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * ((gf - bf) / delta).rem_euclid(6.0)
    } else if max == gf {
        60.0 * ((bf - rf) / delta + 2.0)
    } else {
        60.0 * ((rf - gf) / delta + 4.0)
    };

    // Truncation keeps a wrapped hue just under 360 inside 0..=179.
    let h = (hue_degrees / 2.0) as u8;
    let s = if max == 0.0 {
        0
    } else {
        (delta / max * 255.0).round() as u8
    };
    let v = (max * 255.0).round() as u8;

    (h, s, v)
}
