//! Cluster aggregate merge semantics
//!
//! All statistics a cluster carries are recomputed here from full histories
//! on every merge: severity average/max/min/mode, the corroboration
//! confidence ramp, road-speed aggregates, and the consolidated obstacle
//! type. Index lookup and locking live in the parent module; nothing here
//! touches shared state.

use chrono::{DateTime, Duration, Utc};
use statrs::statistics::Statistics;
use uuid::Uuid;

use crate::config::ClusterParams;
use crate::types::{
    ClassifiedEvent, ClusterLocation, ClusterStatus, EventType, ObstacleCluster, RoadInfo,
    SeverityStats,
};

impl SeverityStats {
    /// Aggregate seeded from a single event: every statistic equals the
    /// one observed value.
    pub fn seed(severity: u8) -> Self {
        Self {
            average: severity as f64,
            max: severity,
            min: severity,
            mode: severity,
            history: vec![severity],
        }
    }

    /// Append one severity value and recompute the full aggregate.
    pub fn record(&mut self, severity: u8) {
        self.history.push(severity);
        self.recompute();
    }

    fn recompute(&mut self) {
        if self.history.is_empty() {
            *self = Self::default();
            return;
        }
        let sum: u32 = self.history.iter().map(|&v| v as u32).sum();
        self.average = sum as f64 / self.history.len() as f64;
        // Ordinal scale: most severe = numeric minimum
        self.max = *self.history.iter().min().unwrap_or(&0);
        self.min = *self.history.iter().max().unwrap_or(&0);
        self.mode = chronological_mode(&self.history);
    }
}

/// Most frequent value; on a tie, the first value to reach the peak count
/// scanning in chronological order wins.
fn chronological_mode(history: &[u8]) -> u8 {
    let mut counts = std::collections::HashMap::new();
    let mut best_value = history.first().copied().unwrap_or(0);
    let mut best_count = 0usize;
    for &value in history {
        let count = counts.entry(value).or_insert(0usize);
        *count += 1;
        if *count > best_count {
            best_count = *count;
            best_value = value;
        }
    }
    best_value
}

impl RoadInfo {
    pub fn seed(speed_kmh: f64) -> Self {
        Self {
            avg_speed_kmh: speed_kmh,
            speed_variance: 0.0,
            speeds: vec![speed_kmh],
        }
    }

    /// Append one speed observation and recompute mean + population variance.
    pub fn record(&mut self, speed_kmh: f64) {
        self.speeds.push(speed_kmh);
        let speeds = self.speeds.as_slice();
        self.avg_speed_kmh = speeds.mean();
        self.speed_variance = if speeds.len() < 2 {
            0.0
        } else {
            speeds.population_variance()
        };
    }
}

/// Corroboration confidence after `report_count` reports: base at the first
/// report, one increment per additional report, hard-capped.
pub fn confidence_for(report_count: u32, params: &ClusterParams) -> f64 {
    let raw = params.confidence_base
        + params.confidence_increment * (report_count.saturating_sub(1) as f64);
    raw.min(params.confidence_cap)
}

impl ObstacleCluster {
    /// Create a fresh cluster from the first qualifying event.
    pub fn create_from(
        event: &ClassifiedEvent,
        device_id: &str,
        params: &ClusterParams,
        now: DateTime<Utc>,
    ) -> Self {
        let mut type_counts = std::collections::BTreeMap::new();
        type_counts.insert(event.event_type, 1);
        Self {
            id: Uuid::new_v4(),
            obstacle_type: event.event_type,
            location: ClusterLocation {
                lat: event.location.lat,
                lon: event.location.lon,
                radius_m: params.radius_m,
            },
            severity: SeverityStats::seed(event.severity),
            confidence: confidence_for(1, params),
            report_count: 1,
            device_ids: std::iter::once(device_id.to_string()).collect(),
            type_counts,
            first_reported: now,
            last_reported: now,
            status: ClusterStatus::Active,
            expires_at: now + Duration::days(params.ttl_days),
            road_info: RoadInfo::seed(event.speed_kmh),
        }
    }

    /// Merge a compatible nearby event into this cluster, refreshing the
    /// sliding TTL.
    pub fn merge_event(
        &mut self,
        event: &ClassifiedEvent,
        device_id: &str,
        params: &ClusterParams,
        now: DateTime<Utc>,
    ) {
        self.report_count += 1;
        self.device_ids.insert(device_id.to_string());
        self.severity.record(event.severity);
        self.confidence = confidence_for(self.report_count, params);
        self.road_info.record(event.speed_kmh);
        *self.type_counts.entry(event.event_type).or_insert(0) += 1;
        self.obstacle_type = consolidated_type(&self.type_counts, params.majority_share)
            .unwrap_or(self.obstacle_type);
        self.last_reported = now;
        self.expires_at = now + Duration::days(params.ttl_days);
    }
}

/// Consolidate the cluster's obstacle type from its contributing event
/// types: a type holding at least the majority share is adopted outright;
/// otherwise the most dangerous type present wins.
fn consolidated_type(
    type_counts: &std::collections::BTreeMap<EventType, u32>,
    majority_share: f64,
) -> Option<EventType> {
    let total: u32 = type_counts.values().sum();
    if total == 0 {
        return None;
    }
    if let Some((&event_type, _)) = type_counts
        .iter()
        .find(|(_, &count)| count as f64 / total as f64 >= majority_share)
    {
        return Some(event_type);
    }
    type_counts
        .keys()
        .min_by_key(|event_type| event_type.danger_rank())
        .copied()
}
