//! Warning Advisor - proximity warning decisions
//!
//! Given a live user position and the currently active clusters, decides
//! whether a hazard is close enough and severe enough to surface, and
//! formats the operator-facing message. Warnings are transient; nothing
//! here is persisted.

use tracing::debug;

use crate::config::AdvisorParams;
use crate::geo::{haversine_m, GeoPoint};
use crate::types::{EventType, ObstacleCluster, Warning};

/// Stateless proximity advisor.
#[derive(Debug, Clone)]
pub struct WarningAdvisor {
    params: AdvisorParams,
}

impl WarningAdvisor {
    pub fn new(params: AdvisorParams) -> Self {
        Self { params }
    }

    /// Whether a hazard at `cluster_pos` with the given severity warrants a
    /// warning for a user at `user_pos`. Returns the decision plus the
    /// distance in meters.
    pub fn should_warn(
        &self,
        user_pos: GeoPoint,
        cluster_pos: GeoPoint,
        severity: u8,
    ) -> (bool, f64) {
        let distance = haversine_m(user_pos, cluster_pos);
        let warn = severity <= self.params.max_severity && distance <= self.params.warning_radius_m;
        (warn, distance)
    }

    /// Format the warning message: "{SEVERITY}: {TYPE} in {distance}m".
    pub fn format_message(&self, event_type: EventType, severity: u8, distance_m: f64) -> String {
        let severity_label = match severity {
            1 => "CRITICAL",
            2 => "HIGH",
            3 => "MEDIUM",
            _ => "LOW",
        };
        let type_label = match event_type {
            EventType::Pothole => "pothole",
            EventType::SpeedBump => "speed bump",
            EventType::Bump => "bump",
            EventType::Braking => "hard-braking zone",
            EventType::Vibration => "rough surface",
            _ => "hazard",
        };
        format!("{severity_label}: {type_label} in {:.0}m", distance_m)
    }

    /// Pick the nearest qualifying active cluster for the user position,
    /// if any, and build its warning.
    pub fn advise(&self, user_pos: GeoPoint, clusters: &[ObstacleCluster]) -> Option<Warning> {
        let mut best: Option<(f64, &ObstacleCluster)> = None;
        for cluster in clusters {
            // Most-severe-ever drives the warning decision
            let severity = cluster.severity.max;
            let (warn, distance) = self.should_warn(user_pos, cluster.location.point(), severity);
            if !warn {
                continue;
            }
            match &best {
                Some((nearest, _)) if *nearest <= distance => {}
                _ => best = Some((distance, cluster)),
            }
        }
        best.map(|(distance, cluster)| {
            let severity = cluster.severity.max;
            debug!(
                cluster_id = %cluster.id,
                distance_m = distance,
                severity,
                "Proximity warning raised"
            );
            Warning {
                distance_m: distance,
                message: self.format_message(cluster.obstacle_type, severity, distance),
                severity,
            }
        })
    }
}

impl Default for WarningAdvisor {
    fn default() -> Self {
        Self::new(AdvisorParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advisor() -> WarningAdvisor {
        WarningAdvisor::default()
    }

    /// A cluster position `meters` north of the reference point.
    fn north_of(p: GeoPoint, meters: f64) -> GeoPoint {
        GeoPoint::new(p.lat + meters / 111_195.0, p.lon)
    }

    #[test]
    fn test_should_warn_truth_table() {
        let a = advisor();
        let user = GeoPoint::new(59.437, 24.7536);

        // severity 1 at 50 m → warn
        let (warn, d) = a.should_warn(user, north_of(user, 50.0), 1);
        assert!(warn);
        assert!((d - 50.0).abs() < 1.0);

        // severity 3 at 50 m → no warn
        let (warn, _) = a.should_warn(user, north_of(user, 50.0), 3);
        assert!(!warn);

        // severity 1 at 500 m → no warn (radius 200 m)
        let (warn, d) = a.should_warn(user, north_of(user, 500.0), 1);
        assert!(!warn);
        assert!((d - 500.0).abs() < 5.0);
    }

    #[test]
    fn test_message_format() {
        let a = advisor();
        assert_eq!(
            a.format_message(EventType::Pothole, 1, 42.4),
            "CRITICAL: pothole in 42m"
        );
        assert_eq!(
            a.format_message(EventType::SpeedBump, 2, 120.0),
            "HIGH: speed bump in 120m"
        );
        assert_eq!(
            a.format_message(EventType::Normal, 5, 10.0),
            "LOW: hazard in 10m"
        );
    }

    #[test]
    fn test_advise_picks_nearest_qualifying() {
        use crate::config::ClusterParams;
        use crate::types::{AccelSnapshot, ClassifiedEvent, RoadType};
        use chrono::Utc;

        let a = advisor();
        let user = GeoPoint::new(59.437, 24.7536);
        let params = ClusterParams::default();

        let make = |pos: GeoPoint, severity: u8| {
            let event = ClassifiedEvent {
                event_type: EventType::Pothole,
                severity,
                confidence: 0.85,
                road_type: RoadType::Asphalt,
                snapshot: AccelSnapshot::default(),
                location: pos,
                speed_kmh: 40.0,
                observed_at: Utc::now(),
            };
            ObstacleCluster::create_from(&event, "dev-1", &params, Utc::now())
        };

        let clusters = vec![
            make(north_of(user, 150.0), 1),
            make(north_of(user, 60.0), 2),
            make(north_of(user, 30.0), 4), // too mild to warn
        ];

        let warning = a.advise(user, &clusters).expect("should warn");
        assert!((warning.distance_m - 60.0).abs() < 1.0);
        assert_eq!(warning.severity, 2);
        assert!(warning.message.starts_with("HIGH: pothole"));
    }

    #[test]
    fn test_advise_none_when_nothing_qualifies() {
        let a = advisor();
        let user = GeoPoint::new(59.437, 24.7536);
        assert!(a.advise(user, &[]).is_none());
    }
}
