//! Window-path feature extraction and classification
//!
//! The batch variant looks at an ordered sample window as a whole: per-axis
//! summary statistics, the magnitude series, and a peak count. Classification
//! compares the vertical excursion `delta_z = max_z - baseline_z` against
//! speed-gated branch thresholds, then grades severity by which of four
//! descending delta-z bands the excursion crosses.
//!
//! Degenerate inputs never panic: statistics over empty or single-sample
//! windows fall back to zero.

use statrs::statistics::Statistics;

use crate::config::WindowThresholds;
use crate::types::{AccelSample, EventType};

use super::rules::{
    BRAKING_CONFIDENCE, BUMP_CONFIDENCE, POTHOLE_CONFIDENCE, SPEED_BUMP_CONFIDENCE,
    VIBRATION_CONFIDENCE,
};

/// Summary statistics for one series.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SeriesStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub range: f64,
    /// Sample standard deviation (N-1 denominator); 0 when fewer than 2 points
    pub std_dev: f64,
}

impl SeriesStats {
    pub fn from_series(series: &[f64]) -> Self {
        if series.is_empty() {
            return Self::default();
        }
        let mean = series.mean();
        let min = Statistics::min(series);
        let max = Statistics::max(series);
        let std_dev = if series.len() < 2 { 0.0 } else { series.std_dev() };
        Self {
            mean,
            min,
            max,
            range: max - min,
            std_dev,
        }
    }
}

/// Everything the window cascade looks at.
#[derive(Debug, Clone, Default)]
pub struct WindowFeatures {
    pub x: SeriesStats,
    pub y: SeriesStats,
    pub z: SeriesStats,
    pub magnitude: SeriesStats,
    pub magnitudes: Vec<f64>,
    /// Interior local maxima of the magnitude series above the peak threshold
    pub peak_count: usize,
    pub sample_count: usize,
}

/// Extract window features. Non-finite samples are dropped up front so
/// they cannot poison the statistics.
pub fn extract_features(samples: &[AccelSample], peak_magnitude_min: f64) -> WindowFeatures {
    let clean: Vec<&AccelSample> = samples.iter().filter(|s| s.is_finite()).collect();
    if clean.is_empty() {
        return WindowFeatures::default();
    }

    let xs: Vec<f64> = clean.iter().map(|s| s.x).collect();
    let ys: Vec<f64> = clean.iter().map(|s| s.y).collect();
    let zs: Vec<f64> = clean.iter().map(|s| s.z).collect();
    let magnitudes: Vec<f64> = clean.iter().map(|s| s.magnitude()).collect();

    let peak_count = count_peaks(&magnitudes, peak_magnitude_min);

    WindowFeatures {
        x: SeriesStats::from_series(&xs),
        y: SeriesStats::from_series(&ys),
        z: SeriesStats::from_series(&zs),
        magnitude: SeriesStats::from_series(&magnitudes),
        magnitudes,
        peak_count,
        sample_count: clean.len(),
    }
}

/// Count interior local maxima exceeding the magnitude threshold. Endpoints
/// never count; degenerate series yield 0.
fn count_peaks(magnitudes: &[f64], threshold: f64) -> usize {
    if magnitudes.len() < 3 {
        return 0;
    }
    magnitudes
        .windows(3)
        .filter(|w| w[1] > w[0] && w[1] > w[2] && w[1] > threshold)
        .count()
}

/// Run the window cascade. Returns (type, confidence) or None.
///
/// Branch order is fixed: speed_bump → pothole → braking → bump → vibration.
pub fn classify_features(
    features: &WindowFeatures,
    speed_kmh: f64,
    t: &WindowThresholds,
) -> Option<(EventType, f64)> {
    if features.sample_count == 0 {
        return None;
    }
    let delta_z = features.z.max - t.baseline_z;
    let max_magnitude = features.magnitude.max;

    if delta_z > t.speed_bump_delta_z_min
        && speed_kmh >= t.speed_bump_speed_lo_kmh
        && speed_kmh <= t.speed_bump_speed_hi_kmh
        && max_magnitude > t.speed_bump_magnitude_min
    {
        return Some((EventType::SpeedBump, SPEED_BUMP_CONFIDENCE));
    }
    if delta_z > t.pothole_delta_z_min
        && speed_kmh > t.speed_bump_speed_hi_kmh
        && max_magnitude > t.pothole_magnitude_min
    {
        return Some((EventType::Pothole, POTHOLE_CONFIDENCE));
    }
    if features.y.range > t.braking_range_y_min
        && max_magnitude > t.braking_magnitude_min
        && speed_kmh > t.braking_speed_min_kmh
    {
        return Some((EventType::Braking, BRAKING_CONFIDENCE));
    }
    if delta_z > t.bump_delta_z_min && max_magnitude > t.bump_magnitude_min {
        return Some((EventType::Bump, BUMP_CONFIDENCE));
    }
    if features.magnitude.std_dev > t.vibration_std_min
        && speed_kmh > t.vibration_speed_min_kmh
        && max_magnitude > t.vibration_magnitude_min
    {
        return Some((EventType::Vibration, VIBRATION_CONFIDENCE));
    }
    None
}

/// Grade window severity by the delta-z excursion: four descending bands,
/// first threshold met wins, anything below the low band is informational.
pub fn banded_severity(delta_z: f64, t: &WindowThresholds) -> u8 {
    if delta_z >= t.severity_critical {
        1
    } else if delta_z >= t.severity_high {
        2
    } else if delta_z >= t.severity_medium {
        3
    } else if delta_z >= t.severity_low {
        4
    } else {
        5
    }
}
