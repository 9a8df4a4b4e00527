//! Classifier thresholds and runtime hot replacement
//!
//! Threshold values are grouped by event-type key. A [`ThresholdStore`] holds
//! the live set behind an `arc_swap::ArcSwap`, so classification reads are
//! lock-free while an operator patches a subset at runtime. A patch replaces
//! whole per-type blocks; keys absent from the patch keep their current
//! values. Shape is enforced by serde only; no further schema validation.
//!
//! Units: acceleration in g, speed in km/h (held constant end-to-end).

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Pothole detection on the single-sample path (rule priority 1).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PotholeThresholds {
    /// Minimum |delta Y| between consecutive samples (g)
    pub delta_y_min: f64,
    /// Minimum |delta Z| between consecutive samples (g)
    pub delta_z_min: f64,
    /// Minimum total magnitude (g)
    pub magnitude_min: f64,
    /// Severity interpolation band over |delta Z| (g): band_lo → grade 5,
    /// band_hi → grade 1
    pub band_lo: f64,
    pub band_hi: f64,
}

impl Default for PotholeThresholds {
    fn default() -> Self {
        Self {
            delta_y_min: 0.30,
            delta_z_min: 0.35,
            magnitude_min: 1.40,
            band_lo: 0.35,
            band_hi: 0.90,
        }
    }
}

/// Hard-braking detection on the single-sample path (rule priority 2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BrakingThresholds {
    pub delta_y_min: f64,
    pub magnitude_min: f64,
    /// Braking only registers in motion (km/h)
    pub speed_min_kmh: f64,
    /// Severity band over |delta Y| (g)
    pub band_lo: f64,
    pub band_hi: f64,
}

impl Default for BrakingThresholds {
    fn default() -> Self {
        Self {
            delta_y_min: 0.32,
            magnitude_min: 1.30,
            speed_min_kmh: 5.0,
            band_lo: 0.32,
            band_hi: 0.80,
        }
    }
}

/// Bump detection on the single-sample path (rule priority 3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BumpThresholds {
    pub delta_z_min: f64,
    pub magnitude_min: f64,
    /// Severity band over |delta Z| (g)
    pub band_lo: f64,
    pub band_hi: f64,
}

impl Default for BumpThresholds {
    fn default() -> Self {
        Self {
            delta_z_min: 0.25,
            magnitude_min: 1.25,
            band_lo: 0.25,
            band_hi: 0.70,
        }
    }
}

/// Vibration / rough-surface detection on the single-sample path
/// (rule priority 4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VibrationThresholds {
    /// Minimum population variance over the recent magnitude window (g²)
    pub variance_min: f64,
    pub magnitude_min: f64,
    /// Severity band over variance (g²)
    pub band_lo: f64,
    pub band_hi: f64,
}

impl Default for VibrationThresholds {
    fn default() -> Self {
        Self {
            variance_min: 0.04,
            magnitude_min: 1.15,
            band_lo: 0.04,
            band_hi: 0.25,
        }
    }
}

/// Window-path thresholds. Classification compares `delta_z = max_z -
/// baseline_z` against per-branch gates, with speed bands separating speed
/// bumps (taken slowly) from potholes (hit at speed).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WindowThresholds {
    /// Calibrated at-rest Z mean (g)
    pub baseline_z: f64,

    // Speed bump: deliberate obstacle crossed inside a speed window
    pub speed_bump_delta_z_min: f64,
    pub speed_bump_speed_lo_kmh: f64,
    pub speed_bump_speed_hi_kmh: f64,
    pub speed_bump_magnitude_min: f64,

    // Pothole: same vertical signature above the speed-bump band
    pub pothole_delta_z_min: f64,
    pub pothole_magnitude_min: f64,

    // Braking: sustained longitudinal spread
    pub braking_range_y_min: f64,
    pub braking_magnitude_min: f64,
    pub braking_speed_min_kmh: f64,

    // Bump: weaker vertical signature, no speed gate
    pub bump_delta_z_min: f64,
    pub bump_magnitude_min: f64,

    // Vibration: dispersion of the magnitude series in motion
    pub vibration_std_min: f64,
    pub vibration_speed_min_kmh: f64,
    pub vibration_magnitude_min: f64,

    /// Interior local maxima above this magnitude count as peaks (g)
    pub peak_magnitude_min: f64,

    // Severity banding over delta_z, descending; first threshold met wins,
    // anything below severity_low is informational
    pub severity_critical: f64,
    pub severity_high: f64,
    pub severity_medium: f64,
    pub severity_low: f64,
}

impl Default for WindowThresholds {
    fn default() -> Self {
        Self {
            baseline_z: 1.0,
            speed_bump_delta_z_min: 0.12,
            speed_bump_speed_lo_kmh: 8.0,
            speed_bump_speed_hi_kmh: 40.0,
            speed_bump_magnitude_min: 1.10,
            pothole_delta_z_min: 0.18,
            pothole_magnitude_min: 1.15,
            braking_range_y_min: 0.35,
            braking_magnitude_min: 1.10,
            braking_speed_min_kmh: 15.0,
            bump_delta_z_min: 0.10,
            bump_magnitude_min: 1.08,
            vibration_std_min: 0.06,
            vibration_speed_min_kmh: 10.0,
            vibration_magnitude_min: 1.05,
            peak_magnitude_min: 1.20,
            severity_critical: 0.291,
            severity_high: 0.22,
            severity_medium: 0.16,
            severity_low: 0.10,
        }
    }
}

/// The full threshold set, keyed by event type plus the window block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct ClassifierThresholds {
    #[serde(default)]
    pub pothole: PotholeThresholds,
    #[serde(default)]
    pub braking: BrakingThresholds,
    #[serde(default)]
    pub bump: BumpThresholds,
    #[serde(default)]
    pub vibration: VibrationThresholds,
    #[serde(default)]
    pub window: WindowThresholds,
}

/// Partial threshold replacement, keyed by event type. Absent keys keep
/// their current values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ThresholdPatch {
    pub pothole: Option<PotholeThresholds>,
    pub braking: Option<BrakingThresholds>,
    pub bump: Option<BumpThresholds>,
    pub vibration: Option<VibrationThresholds>,
    pub window: Option<WindowThresholds>,
}

impl ThresholdPatch {
    /// Merge this patch onto an existing set, returning the new set.
    pub fn apply(&self, current: &ClassifierThresholds) -> ClassifierThresholds {
        ClassifierThresholds {
            pothole: self.pothole.unwrap_or(current.pothole),
            braking: self.braking.unwrap_or(current.braking),
            bump: self.bump.unwrap_or(current.bump),
            vibration: self.vibration.unwrap_or(current.vibration),
            window: self.window.unwrap_or(current.window),
        }
    }
}

/// Live threshold set with lock-free reads and atomic runtime patching.
pub struct ThresholdStore {
    inner: ArcSwap<ClassifierThresholds>,
}

impl ThresholdStore {
    pub fn new(initial: ClassifierThresholds) -> Self {
        Self {
            inner: ArcSwap::from_pointee(initial),
        }
    }

    /// Current threshold set (cheap clone of an Arc).
    pub fn snapshot(&self) -> Arc<ClassifierThresholds> {
        self.inner.load_full()
    }

    /// Replace the full set.
    pub fn replace(&self, thresholds: ClassifierThresholds) {
        self.inner.store(Arc::new(thresholds));
        info!("Classifier thresholds replaced");
    }

    /// Merge a partial patch into the current set atomically.
    pub fn apply_patch(&self, patch: &ThresholdPatch) {
        self.inner.rcu(|current| Arc::new(patch.apply(current)));
        info!(
            pothole = patch.pothole.is_some(),
            braking = patch.braking.is_some(),
            bump = patch.bump.is_some(),
            vibration = patch.vibration.is_some(),
            window = patch.window.is_some(),
            "Classifier threshold patch applied"
        );
    }
}

impl Default for ThresholdStore {
    fn default() -> Self {
        Self::new(ClassifierThresholds::default())
    }
}
