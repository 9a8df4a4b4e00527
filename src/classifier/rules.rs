//! Sample-path rule cascade as an ordered decision table
//!
//! Each row pairs a predicate over the derived sample features with a fixed
//! outcome (event type + branch confidence). Rows are evaluated in priority
//! order and the first match wins; no match means "normal" and the event is
//! suppressed. Keeping the cascade as data keeps thresholds unit-testable
//! independent of control flow.

use crate::config::ClassifierThresholds;
use crate::types::EventType;

// Branch-fixed confidence constants
pub const POTHOLE_CONFIDENCE: f64 = 0.85;
pub const SPEED_BUMP_CONFIDENCE: f64 = 0.82;
pub const BRAKING_CONFIDENCE: f64 = 0.80;
pub const BUMP_CONFIDENCE: f64 = 0.75;
pub const VIBRATION_CONFIDENCE: f64 = 0.70;
pub const NORMAL_CONFIDENCE: f64 = 0.60;

/// Derived features for one sample against its device history.
#[derive(Debug, Clone, Copy)]
pub struct SampleFeatures {
    pub magnitude: f64,
    pub delta_x: f64,
    pub delta_y: f64,
    pub delta_z: f64,
    /// Population variance over the recent magnitude window
    pub variance: f64,
    pub speed_kmh: f64,
}

/// A fired rule: the value that triggered it plus the calibrated band used
/// for severity interpolation.
#[derive(Debug, Clone, Copy)]
pub struct Trigger {
    pub value: f64,
    pub band_lo: f64,
    pub band_hi: f64,
}

/// One (predicate, outcome) row of the cascade.
pub struct SampleRule {
    pub event_type: EventType,
    pub confidence: f64,
    pub trigger: fn(&SampleFeatures, &ClassifierThresholds) -> Option<Trigger>,
}

/// The fixed-priority sample cascade. Order is part of the contract:
/// pothole > braking > bump > vibration.
pub static SAMPLE_RULES: [SampleRule; 4] = [
    SampleRule {
        event_type: EventType::Pothole,
        confidence: POTHOLE_CONFIDENCE,
        trigger: |f, t| {
            let p = &t.pothole;
            if f.delta_y.abs() > p.delta_y_min
                && f.delta_z.abs() > p.delta_z_min
                && f.magnitude > p.magnitude_min
            {
                Some(Trigger {
                    value: f.delta_z.abs(),
                    band_lo: p.band_lo,
                    band_hi: p.band_hi,
                })
            } else {
                None
            }
        },
    },
    SampleRule {
        event_type: EventType::Braking,
        confidence: BRAKING_CONFIDENCE,
        trigger: |f, t| {
            let b = &t.braking;
            if f.delta_y.abs() > b.delta_y_min
                && f.magnitude > b.magnitude_min
                && f.speed_kmh > b.speed_min_kmh
            {
                Some(Trigger {
                    value: f.delta_y.abs(),
                    band_lo: b.band_lo,
                    band_hi: b.band_hi,
                })
            } else {
                None
            }
        },
    },
    SampleRule {
        event_type: EventType::Bump,
        confidence: BUMP_CONFIDENCE,
        trigger: |f, t| {
            let b = &t.bump;
            if f.delta_z.abs() > b.delta_z_min && f.magnitude > b.magnitude_min {
                Some(Trigger {
                    value: f.delta_z.abs(),
                    band_lo: b.band_lo,
                    band_hi: b.band_hi,
                })
            } else {
                None
            }
        },
    },
    SampleRule {
        event_type: EventType::Vibration,
        confidence: VIBRATION_CONFIDENCE,
        trigger: |f, t| {
            let v = &t.vibration;
            if f.variance > v.variance_min && f.magnitude > v.magnitude_min {
                Some(Trigger {
                    value: f.variance,
                    band_lo: v.band_lo,
                    band_hi: v.band_hi,
                })
            } else {
                None
            }
        },
    },
];

/// Map a triggering value across its calibrated (lo, hi) band onto the
/// 5..1 grade scale, clamped to [1, 5].
pub fn band_severity(value: f64, band_lo: f64, band_hi: f64) -> u8 {
    if !value.is_finite() || band_hi <= band_lo {
        return 5;
    }
    let ratio = ((value - band_lo) / (band_hi - band_lo)).clamp(0.0, 1.0);
    let grade = (5.0 - 4.0 * ratio).round();
    grade.clamp(1.0, 5.0) as u8
}

/// Evaluate the cascade, first match wins. Returns (type, severity,
/// confidence) or None for a normal sample.
pub fn evaluate_sample(
    features: &SampleFeatures,
    thresholds: &ClassifierThresholds,
) -> Option<(EventType, u8, f64)> {
    for rule in &SAMPLE_RULES {
        if let Some(trigger) = (rule.trigger)(features, thresholds) {
            let severity = band_severity(trigger.value, trigger.band_lo, trigger.band_hi);
            return Some((rule.event_type, severity, rule.confidence));
        }
    }
    None
}
