//! Signal Classifier - per-device sample history and event classification
//!
//! Turns noisy raw accelerometer samples into discrete typed events under
//! fixed heuristic thresholds. Maintains a bounded ring-buffer history per
//! device so consecutive-sample deltas and short-window variance can be
//! computed; different devices are fully concurrent (per-device mutex under
//! a shared read-mostly map), while one device's stream must arrive in
//! order; resequencing is the ingress collaborator's contract.

pub mod rules;
pub mod window;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use statrs::statistics::Statistics;
use tracing::{debug, trace};

use crate::config::ThresholdStore;
use crate::types::{AccelSample, AccelSnapshot, ClassifiedEvent, SampleContext};

use rules::SampleFeatures;
use window::{banded_severity, classify_features, extract_features};

/// Bounded per-device history capacity
pub const HISTORY_CAPACITY: usize = 10;

/// Number of recent magnitudes entering the variance computation
pub const VARIANCE_WINDOW: usize = 5;

/// Minimum history points before a sample can be classified
pub const MIN_HISTORY: usize = 3;

/// Fixed-capacity ring buffer of recent samples for one device.
///
/// Exclusively owned and mutated by the classifier; oldest sample is evicted
/// on overflow. Order-sensitive.
#[derive(Debug, Default)]
pub struct DeviceHistory {
    samples: VecDeque<AccelSample>,
}

impl DeviceHistory {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Push a sample, evicting the oldest at capacity. O(1).
    pub fn push(&mut self, sample: AccelSample) {
        if self.samples.len() == HISTORY_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The newest sample and its immediate predecessor, if present.
    fn last_two(&self) -> Option<(&AccelSample, &AccelSample)> {
        let n = self.samples.len();
        if n < 2 {
            return None;
        }
        Some((&self.samples[n - 2], &self.samples[n - 1]))
    }

    /// Magnitudes of the most recent `n` samples, oldest first.
    fn recent_magnitudes(&self, n: usize) -> Vec<f64> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).map(|s| s.magnitude()).collect()
    }
}

/// Running classifier counters, for observability.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifierStats {
    pub samples_processed: u64,
    pub windows_processed: u64,
    pub events_emitted: u64,
    pub samples_rejected: u64,
}

/// Stateful per-device signal classifier.
///
/// Classification is stateless per call except for the device history; the
/// threshold set is read through a lock-free snapshot so runtime patches
/// take effect on the next call.
pub struct SignalClassifier {
    thresholds: Arc<ThresholdStore>,
    histories: RwLock<HashMap<String, Arc<Mutex<DeviceHistory>>>>,
    samples_processed: AtomicU64,
    windows_processed: AtomicU64,
    events_emitted: AtomicU64,
    samples_rejected: AtomicU64,
}

impl std::fmt::Debug for SignalClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalClassifier")
            .field(
                "devices",
                &self.histories.read().map(|h| h.len()).unwrap_or(0),
            )
            .field(
                "samples_processed",
                &self.samples_processed.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl SignalClassifier {
    pub fn new(thresholds: Arc<ThresholdStore>) -> Self {
        Self {
            thresholds,
            histories: RwLock::new(HashMap::new()),
            samples_processed: AtomicU64::new(0),
            windows_processed: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
            samples_rejected: AtomicU64::new(0),
        }
    }

    /// The threshold store backing this classifier (for runtime patching).
    pub fn thresholds(&self) -> &Arc<ThresholdStore> {
        &self.thresholds
    }

    pub fn stats(&self) -> ClassifierStats {
        ClassifierStats {
            samples_processed: self.samples_processed.load(Ordering::Relaxed),
            windows_processed: self.windows_processed.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            samples_rejected: self.samples_rejected.load(Ordering::Relaxed),
        }
    }

    /// Number of devices with live history.
    pub fn device_count(&self) -> usize {
        self.histories.read().map(|h| h.len()).unwrap_or(0)
    }

    /// Classify one sample against the device's history.
    ///
    /// Returns `None` for: malformed samples (fail closed, history left
    /// untouched), insufficient history (< 3 points), and normal samples.
    pub fn classify_sample(
        &self,
        device_id: &str,
        sample: AccelSample,
        ctx: &SampleContext,
    ) -> Option<ClassifiedEvent> {
        self.samples_processed.fetch_add(1, Ordering::Relaxed);

        if !sample.is_finite() {
            self.samples_rejected.fetch_add(1, Ordering::Relaxed);
            debug!(device_id, "Rejected non-finite sample");
            return None;
        }

        let history = self.history_for(device_id);
        let features = {
            let mut history = history.lock().ok()?;
            history.push(sample);
            if history.len() < MIN_HISTORY {
                return None;
            }
            let (prev, curr) = history.last_two()?;
            let magnitudes = history.recent_magnitudes(VARIANCE_WINDOW);
            SampleFeatures {
                magnitude: curr.magnitude(),
                delta_x: curr.x - prev.x,
                delta_y: curr.y - prev.y,
                delta_z: curr.z - prev.z,
                variance: population_variance(&magnitudes),
                speed_kmh: ctx.speed_kmh,
            }
        };

        let thresholds = self.thresholds.snapshot();
        match rules::evaluate_sample(&features, &thresholds) {
            Some((event_type, severity, confidence)) => {
                self.events_emitted.fetch_add(1, Ordering::Relaxed);
                debug!(
                    device_id,
                    event_type = event_type.short_code(),
                    severity,
                    confidence,
                    "Sample classified"
                );
                Some(ClassifiedEvent {
                    event_type,
                    severity,
                    confidence,
                    road_type: ctx.road_type,
                    snapshot: AccelSnapshot {
                        x: sample.x,
                        y: sample.y,
                        z: sample.z,
                        magnitude: features.magnitude,
                        delta_x: features.delta_x,
                        delta_y: features.delta_y,
                        delta_z: features.delta_z,
                        variance: features.variance,
                    },
                    location: ctx.location,
                    speed_kmh: ctx.speed_kmh,
                    observed_at: sample.timestamp.unwrap_or_else(Utc::now),
                })
            }
            None => {
                trace!(device_id, "Sample normal; suppressed");
                None
            }
        }
    }

    /// Classify an ordered sample window as a whole, yielding at most one
    /// event. The window path computes its own statistics and does not touch
    /// the per-sample device history.
    pub fn classify_window(
        &self,
        device_id: &str,
        samples: &[AccelSample],
        ctx: &SampleContext,
    ) -> Option<ClassifiedEvent> {
        self.windows_processed.fetch_add(1, Ordering::Relaxed);

        let thresholds = self.thresholds.snapshot();
        let w = &thresholds.window;
        let features = extract_features(samples, w.peak_magnitude_min);
        if features.sample_count == 0 {
            debug!(device_id, "Empty or fully malformed window; no event");
            return None;
        }

        let (event_type, confidence) = classify_features(&features, ctx.speed_kmh, w)?;
        let delta_z = features.z.max - w.baseline_z;
        let severity = banded_severity(delta_z, w);

        self.events_emitted.fetch_add(1, Ordering::Relaxed);
        debug!(
            device_id,
            event_type = event_type.short_code(),
            severity,
            delta_z,
            peaks = features.peak_count,
            samples = features.sample_count,
            "Window classified"
        );

        Some(ClassifiedEvent {
            event_type,
            severity,
            confidence,
            road_type: ctx.road_type,
            snapshot: AccelSnapshot {
                x: features.x.mean,
                y: features.y.mean,
                z: features.z.mean,
                magnitude: features.magnitude.max,
                delta_x: features.x.range,
                delta_y: features.y.range,
                delta_z,
                variance: features.magnitude.std_dev * features.magnitude.std_dev,
            },
            location: ctx.location,
            speed_kmh: ctx.speed_kmh,
            observed_at: samples
                .iter()
                .rev()
                .find_map(|s| s.timestamp)
                .unwrap_or_else(Utc::now),
        })
    }

    /// Drop the history for a device whose stream has ended.
    pub fn forget_device(&self, device_id: &str) {
        if let Ok(mut histories) = self.histories.write() {
            histories.remove(device_id);
        }
    }

    fn history_for(&self, device_id: &str) -> Arc<Mutex<DeviceHistory>> {
        if let Ok(histories) = self.histories.read() {
            if let Some(history) = histories.get(device_id) {
                return Arc::clone(history);
            }
        }
        let mut histories = match self.histories.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            histories
                .entry(device_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(DeviceHistory::new()))),
        )
    }
}

/// Mean-based population variance; 0 for empty or single-value series.
fn population_variance(series: &[f64]) -> f64 {
    if series.len() < 2 {
        return 0.0;
    }
    series.population_variance()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use crate::types::{EventType, RoadType};

    fn ctx(speed_kmh: f64) -> SampleContext {
        SampleContext {
            location: GeoPoint::new(59.437, 24.7536),
            speed_kmh,
            road_type: RoadType::Asphalt,
        }
    }

    fn classifier() -> SignalClassifier {
        SignalClassifier::new(Arc::new(ThresholdStore::default()))
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let mut history = DeviceHistory::new();
        for i in 0..15 {
            history.push(AccelSample::new(i as f64, 0.0, 1.0));
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);
        // Oldest five evicted
        let (prev, curr) = history.last_two().unwrap();
        assert_eq!(curr.x, 14.0);
        assert_eq!(prev.x, 13.0);
        assert_eq!(history.recent_magnitudes(VARIANCE_WINDOW).len(), 5);
    }

    #[test]
    fn test_requires_three_history_points() {
        let c = classifier();
        // A hard spike on the very first samples must not classify
        let spike = AccelSample::new(0.0, 0.5, 1.6);
        assert!(c.classify_sample("dev-1", spike, &ctx(30.0)).is_none());
        assert!(c.classify_sample("dev-1", spike, &ctx(30.0)).is_none());
    }

    #[test]
    fn test_constant_stream_never_emits() {
        let c = classifier();
        for _ in 0..50 {
            let sample = AccelSample::new(0.05, -0.02, 0.99);
            assert!(c.classify_sample("dev-1", sample, &ctx(60.0)).is_none());
        }
        assert_eq!(c.stats().events_emitted, 0);
    }

    #[test]
    fn test_pothole_spike_classifies() {
        let c = classifier();
        for _ in 0..4 {
            c.classify_sample("dev-1", AccelSample::new(0.0, 0.0, 1.0), &ctx(45.0));
        }
        let spike = AccelSample::new(0.1, 0.45, 1.55);
        let event = c
            .classify_sample("dev-1", spike, &ctx(45.0))
            .expect("spike should classify");
        assert_eq!(event.event_type, EventType::Pothole);
        assert!(event.severity >= 1 && event.severity <= 5);
        assert_eq!(event.confidence, rules::POTHOLE_CONFIDENCE);
        assert_eq!(event.road_type, RoadType::Asphalt);
    }

    #[test]
    fn test_malformed_sample_leaves_history_untouched() {
        let c = classifier();
        for _ in 0..4 {
            c.classify_sample("dev-1", AccelSample::new(0.0, 0.0, 1.0), &ctx(45.0));
        }
        assert!(c
            .classify_sample("dev-1", AccelSample::new(f64::NAN, 0.0, 1.0), &ctx(45.0))
            .is_none());
        // Delta still computed against the last good sample
        let spike = AccelSample::new(0.1, 0.45, 1.55);
        let event = c.classify_sample("dev-1", spike, &ctx(45.0)).unwrap();
        assert_eq!(event.event_type, EventType::Pothole);
        assert_eq!(c.stats().samples_rejected, 1);
    }

    #[test]
    fn test_devices_are_isolated() {
        let c = classifier();
        for _ in 0..4 {
            c.classify_sample("dev-a", AccelSample::new(0.0, 0.0, 1.0), &ctx(45.0));
        }
        // dev-b has no history; its first spike must not classify
        let spike = AccelSample::new(0.1, 0.45, 1.55);
        assert!(c.classify_sample("dev-b", spike, &ctx(45.0)).is_none());
        // dev-a classifies the same spike
        assert!(c.classify_sample("dev-a", spike, &ctx(45.0)).is_some());
        assert_eq!(c.device_count(), 2);
    }

    #[test]
    fn test_window_critical_pothole() {
        let c = classifier();
        let mut samples: Vec<AccelSample> =
            (0..8).map(|_| AccelSample::new(0.0, 0.0, 1.0)).collect();
        samples[4] = AccelSample::new(0.0, 0.0, 1.30); // delta_z = 0.30 > 0.291

        let event = c
            .classify_window("dev-1", &samples, &ctx(60.0))
            .expect("window should classify");
        assert_eq!(event.event_type, EventType::Pothole);
        assert_eq!(event.severity, 1);
    }

    #[test]
    fn test_threshold_patch_takes_effect() {
        use crate::config::{BumpThresholds, ThresholdPatch};
        let c = classifier();
        for _ in 0..4 {
            c.classify_sample("dev-1", AccelSample::new(0.0, 0.0, 1.0), &ctx(45.0));
        }
        // Raise the bump gate so a moderate z-spike no longer fires
        c.thresholds().apply_patch(&ThresholdPatch {
            bump: Some(BumpThresholds {
                delta_z_min: 5.0,
                magnitude_min: 5.0,
                band_lo: 5.0,
                band_hi: 10.0,
            }),
            ..Default::default()
        });
        let moderate = AccelSample::new(0.0, 0.1, 1.30);
        assert!(c.classify_sample("dev-1", moderate, &ctx(45.0)).is_none());
    }
}
