//! Shared data structures for the road-surface hazard pipeline
//!
//! This module defines the core types flowing through the system:
//! - Ingest: AccelSample, SampleContext (one reading from one device)
//! - Classification: ClassifiedEvent with severity/confidence scores
//! - Aggregation: ObstacleCluster with severity/road-info aggregates
//! - Advisory: Warning (transient proximity decision)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::geo::GeoPoint;

// ============================================================================
// Event Classification
// ============================================================================

/// Road-surface anomaly type produced by the signal classifier.
///
/// `Normal` is an internal outcome only; it is suppressed before events
/// reach the cluster aggregator.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Pothole,
    SpeedBump,
    Bump,
    Braking,
    Vibration,
    #[default]
    Normal,
}

impl EventType {
    /// Display label for operator-facing messages ("hazard" fallback is
    /// handled by the advisor for unmapped types).
    pub fn display_name(&self) -> &'static str {
        match self {
            EventType::Pothole => "pothole",
            EventType::SpeedBump => "speed bump",
            EventType::Bump => "bump",
            EventType::Braking => "hard braking",
            EventType::Vibration => "rough surface",
            EventType::Normal => "normal",
        }
    }

    /// Short code for structured logging
    pub fn short_code(&self) -> &'static str {
        match self {
            EventType::Pothole => "POTHOLE",
            EventType::SpeedBump => "SPEED_BUMP",
            EventType::Bump => "BUMP",
            EventType::Braking => "BRAKING",
            EventType::Vibration => "VIBRATION",
            EventType::Normal => "NORMAL",
        }
    }

    /// Danger ordering used when no type holds a majority share in a
    /// cluster: lower rank is more dangerous.
    pub fn danger_rank(&self) -> u8 {
        match self {
            EventType::Pothole => 0,
            EventType::SpeedBump => 1,
            EventType::Bump => 2,
            EventType::Braking => 3,
            EventType::Vibration => 4,
            EventType::Normal => 5,
        }
    }

    /// Compatibility group for cluster merging. Events only merge into a
    /// cluster whose consolidated type sits in the same group.
    pub fn compat_group(&self) -> Option<CompatGroup> {
        match self {
            EventType::Pothole | EventType::Bump => Some(CompatGroup::Surface),
            EventType::SpeedBump => Some(CompatGroup::SpeedBump),
            EventType::Braking => Some(CompatGroup::Braking),
            EventType::Vibration => Some(CompatGroup::Vibration),
            EventType::Normal => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Disjoint partition of event types eligible to merge into one cluster.
///
/// Potholes and bumps describe the same class of surface defect and are
/// frequently mis-distinguished by a single device, so they share a group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CompatGroup {
    /// Pothole + bump (surface defects)
    Surface,
    SpeedBump,
    Braking,
    Vibration,
}

/// Road surface type reported by the ingress collaborator.
///
/// Unknown or unmapped strings deserialize to `Unknown` rather than erroring,
/// to tolerate schema drift from upstream producers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoadType {
    Asphalt,
    Gravel,
    Dirt,
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::str::FromStr for RoadType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "asphalt" => RoadType::Asphalt,
            "gravel" => RoadType::Gravel,
            "dirt" => RoadType::Dirt,
            _ => RoadType::Unknown,
        })
    }
}

impl std::fmt::Display for RoadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoadType::Asphalt => write!(f, "asphalt"),
            RoadType::Gravel => write!(f, "gravel"),
            RoadType::Dirt => write!(f, "dirt"),
            RoadType::Unknown => write!(f, "unknown"),
        }
    }
}

// ============================================================================
// Raw Samples
// ============================================================================

/// One accelerometer reading in g (1.0 g at rest).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AccelSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Device-side capture time, if the producer supplied one
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl AccelSample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            timestamp: None,
        }
    }

    /// Euclidean magnitude across all three axes
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// All axis values are finite (malformed samples fail closed)
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Per-call context accompanying a sample or window: where the device is,
/// how fast it is moving, and what surface it reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SampleContext {
    pub location: GeoPoint,
    /// Vehicle speed in km/h
    pub speed_kmh: f64,
    #[serde(default)]
    pub road_type: RoadType,
}

/// Accelerometer snapshot carried on a classified event: the triggering
/// values at classification time, for downstream audit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct AccelSnapshot {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub magnitude: f64,
    pub delta_x: f64,
    pub delta_y: f64,
    pub delta_z: f64,
    /// Population variance over the recent magnitude window
    pub variance: f64,
}

// ============================================================================
// Classified Events
// ============================================================================

/// Discrete typed event produced by the signal classifier from one sample
/// or one sample window. At most one event per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedEvent {
    pub event_type: EventType,
    /// Ordinal severity 1 (critical) to 5 (informational); lower is worse
    pub severity: u8,
    /// Classifier confidence in [0, 1]
    pub confidence: f64,
    pub road_type: RoadType,
    pub snapshot: AccelSnapshot,
    pub location: GeoPoint,
    pub speed_kmh: f64,
    pub observed_at: DateTime<Utc>,
}

// ============================================================================
// Obstacle Clusters
// ============================================================================

/// Lifecycle status of an obstacle cluster.
///
/// `Verified` and `Rejected` are set by an external admin collaborator;
/// this core only ever transitions Active → Expired.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    #[default]
    Active,
    Expired,
    Verified,
    Rejected,
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterStatus::Active => write!(f, "active"),
            ClusterStatus::Expired => write!(f, "expired"),
            ClusterStatus::Verified => write!(f, "verified"),
            ClusterStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// Cluster center and its fixed matching radius.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClusterLocation {
    pub lat: f64,
    pub lon: f64,
    /// Fixed radius constant; never grows with merges
    pub radius_m: f64,
}

impl ClusterLocation {
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat,
            lon: self.lon,
        }
    }
}

/// Severity aggregate over every event merged into a cluster.
///
/// Severity is ordinal with 1 = critical, so `max` (most-severe-ever) is the
/// numerically *lowest* value observed and `min` (least-severe-ever) the
/// numerically *highest*. Recompute logic lives in `cluster::merge`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SeverityStats {
    /// Arithmetic mean of the full history
    pub average: f64,
    /// Most severe ever observed (numeric minimum)
    pub max: u8,
    /// Least severe ever observed (numeric maximum)
    pub min: u8,
    /// Most frequent value; ties broken by first to reach the peak count
    /// in chronological order
    pub mode: u8,
    /// Every severity value merged, in arrival order
    pub history: Vec<u8>,
}

/// Road-speed aggregate over every event merged into a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoadInfo {
    pub avg_speed_kmh: f64,
    /// Population variance over all speeds seen
    pub speed_variance: f64,
    pub speeds: Vec<f64>,
}

/// Aggregated, persistent representation of a recurring physical road
/// hazard, consolidated from independent reports by many devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObstacleCluster {
    pub id: Uuid,
    pub obstacle_type: EventType,
    pub location: ClusterLocation,
    pub severity: SeverityStats,
    /// Monotone corroboration score, capped at 0.99
    pub confidence: f64,
    pub report_count: u32,
    /// Distinct devices that have contributed a report
    pub device_ids: BTreeSet<String>,
    /// Contributing event types seen so far, for type consolidation
    pub type_counts: BTreeMap<EventType, u32>,
    pub first_reported: DateTime<Utc>,
    pub last_reported: DateTime<Utc>,
    pub status: ClusterStatus,
    /// Sliding TTL deadline; refreshed on every merge
    pub expires_at: DateTime<Utc>,
    pub road_info: RoadInfo,
}

// ============================================================================
// Warnings
// ============================================================================

/// Transient proximity warning decision. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warning {
    pub distance_m: f64,
    pub message: String,
    pub severity: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnitude_at_rest() {
        let sample = AccelSample::new(0.0, 0.0, 1.0);
        assert!((sample.magnitude() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_sample_detected() {
        assert!(!AccelSample::new(f64::NAN, 0.0, 1.0).is_finite());
        assert!(!AccelSample::new(0.0, f64::INFINITY, 1.0).is_finite());
        assert!(AccelSample::new(0.1, -0.2, 0.98).is_finite());
    }

    #[test]
    fn test_compat_groups_are_disjoint() {
        assert_eq!(
            EventType::Pothole.compat_group(),
            EventType::Bump.compat_group()
        );
        assert_ne!(
            EventType::Pothole.compat_group(),
            EventType::SpeedBump.compat_group()
        );
        assert_ne!(
            EventType::Braking.compat_group(),
            EventType::Vibration.compat_group()
        );
        assert_eq!(EventType::Normal.compat_group(), None);
    }

    #[test]
    fn test_danger_order() {
        assert!(EventType::Pothole.danger_rank() < EventType::SpeedBump.danger_rank());
        assert!(EventType::SpeedBump.danger_rank() < EventType::Bump.danger_rank());
        assert!(EventType::Bump.danger_rank() < EventType::Braking.danger_rank());
        assert!(EventType::Braking.danger_rank() < EventType::Vibration.danger_rank());
    }

    #[test]
    fn test_unknown_road_type_passthrough() {
        let road: RoadType = serde_json::from_str("\"cobblestone\"").unwrap();
        assert_eq!(road, RoadType::Unknown);
        let road: RoadType = serde_json::from_str("\"gravel\"").unwrap();
        assert_eq!(road, RoadType::Gravel);
    }

    #[test]
    fn test_event_type_as_map_key_roundtrip() {
        let mut counts: BTreeMap<EventType, u32> = BTreeMap::new();
        counts.insert(EventType::Pothole, 7);
        counts.insert(EventType::Bump, 3);
        let json = serde_json::to_string(&counts).unwrap();
        let back: BTreeMap<EventType, u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, counts);
    }
}
