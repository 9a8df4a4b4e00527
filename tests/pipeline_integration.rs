//! End-to-End Pipeline Integration Tests
//!
//! Drives raw accelerometer streams through the full ingest path
//! (classifier -> clusterer -> store) and checks the resulting clusters,
//! expiry behavior, and proximity warnings. Uses the in-memory store for
//! behavioral tests and a sled store under a tempdir for persistence.

use std::sync::Arc;

use chrono::{Duration, Utc};

use roadpulse::cluster::lifecycle::ClusterLifecycle;
use roadpulse::config::DetectionConfig;
use roadpulse::pipeline::IngestPipeline;
use roadpulse::storage::{ClusterStore, MemoryClusterStore, SledClusterStore};
use roadpulse::types::{AccelSample, ClusterStatus, EventType, RoadType, SampleContext};
use roadpulse::{ClusterOutcome, GeoPoint, WarningAdvisor};

const TALLINN: GeoPoint = GeoPoint {
    lat: 59.437,
    lon: 24.7536,
};

fn memory_pipeline() -> (IngestPipeline, Arc<dyn ClusterStore>) {
    let store: Arc<dyn ClusterStore> = Arc::new(MemoryClusterStore::new());
    let pipeline = IngestPipeline::new(&DetectionConfig::default(), Arc::clone(&store));
    (pipeline, store)
}

fn ctx_at(location: GeoPoint, speed_kmh: f64) -> SampleContext {
    SampleContext {
        location,
        speed_kmh,
        road_type: RoadType::Asphalt,
    }
}

/// Feed enough level driving to build device history.
fn warm_up(pipeline: &IngestPipeline, device: &str, location: GeoPoint) {
    for _ in 0..5 {
        pipeline
            .process_sample(device, AccelSample::new(0.0, 0.0, 1.0), &ctx_at(location, 45.0))
            .unwrap();
    }
}

/// A point roughly `meters` north of the reference.
fn north_of(p: GeoPoint, meters: f64) -> GeoPoint {
    GeoPoint::new(p.lat + meters / 111_195.0, p.lon)
}

// ============================================================================
// Stream-to-Cluster Behavior
// ============================================================================

#[test]
fn test_pothole_spike_produces_active_cluster() {
    let (pipeline, store) = memory_pipeline();
    warm_up(&pipeline, "car-1", TALLINN);

    let outcome = pipeline
        .process_sample(
            "car-1",
            AccelSample::new(0.1, 0.45, 1.55),
            &ctx_at(TALLINN, 45.0),
        )
        .unwrap()
        .expect("spike should produce a cluster");

    let cluster = store.get(outcome.cluster_id()).unwrap().unwrap();
    assert_eq!(cluster.status, ClusterStatus::Active);
    assert_eq!(cluster.obstacle_type, EventType::Pothole);
    assert_eq!(cluster.report_count, 1);
    assert!((cluster.confidence - 0.40).abs() < 1e-9);
    assert!(cluster.expires_at > Utc::now() + Duration::days(14));
}

#[test]
fn test_corroborating_devices_raise_confidence() {
    let (pipeline, store) = memory_pipeline();

    let mut cluster_id = None;
    for n in 1..=5 {
        let device = format!("car-{n}");
        warm_up(&pipeline, &device, TALLINN);
        let outcome = pipeline
            .process_sample(
                &device,
                AccelSample::new(0.1, 0.45, 1.55),
                &ctx_at(north_of(TALLINN, (n % 3) as f64 * 5.0), 45.0),
            )
            .unwrap()
            .expect("each spike should cluster");
        match (n, outcome) {
            (1, ClusterOutcome::Created(id)) => cluster_id = Some(id),
            (1, other) => panic!("first report should create, got {other:?}"),
            (_, ClusterOutcome::Merged(id)) => assert_eq!(Some(id), cluster_id),
            (_, other) => panic!("later reports should merge, got {other:?}"),
        }
    }

    let cluster = store.get(cluster_id.unwrap()).unwrap().unwrap();
    assert_eq!(cluster.report_count, 5);
    assert_eq!(cluster.device_ids.len(), 5);
    // 0.40 + 4 * 0.10
    assert!((cluster.confidence - 0.80).abs() < 1e-9);
}

#[test]
fn test_distinct_locations_stay_separate() {
    let (pipeline, store) = memory_pipeline();
    let far = north_of(TALLINN, 500.0);

    for (device, location) in [("car-1", TALLINN), ("car-2", far)] {
        warm_up(&pipeline, device, location);
        let outcome = pipeline
            .process_sample(
                device,
                AccelSample::new(0.1, 0.45, 1.55),
                &ctx_at(location, 45.0),
            )
            .unwrap()
            .expect("spike should cluster");
        assert!(matches!(outcome, ClusterOutcome::Created(_)));
    }

    assert_eq!(store.active_clusters().unwrap().len(), 2);
}

#[test]
fn test_braking_and_pothole_never_share_a_cluster() {
    let (pipeline, store) = memory_pipeline();

    warm_up(&pipeline, "car-1", TALLINN);
    pipeline
        .process_sample(
            "car-1",
            AccelSample::new(0.1, 0.45, 1.55),
            &ctx_at(TALLINN, 45.0),
        )
        .unwrap()
        .expect("pothole spike");

    // Strong lateral deceleration without the vertical signature
    warm_up(&pipeline, "car-2", TALLINN);
    let outcome = pipeline
        .process_sample(
            "car-2",
            AccelSample::new(0.05, 0.90, 1.05),
            &ctx_at(TALLINN, 45.0),
        )
        .unwrap()
        .expect("braking event");
    assert!(matches!(outcome, ClusterOutcome::Created(_)));

    let active = store.active_clusters().unwrap();
    assert_eq!(active.len(), 2);
    let types: Vec<EventType> = active.iter().map(|c| c.obstacle_type).collect();
    assert!(types.contains(&EventType::Pothole));
    assert!(types.contains(&EventType::Braking));
}

#[test]
fn test_window_speed_gates_speed_bump_vs_pothole() {
    let (pipeline, store) = memory_pipeline();

    let mut samples = Vec::new();
    for i in 0..20 {
        let z = if (8..12).contains(&i) { 1.30 } else { 1.0 };
        samples.push(AccelSample::new(0.0, 0.0, z));
    }

    // Same deflection at urban speed: speed bump
    let slow = pipeline
        .process_window("car-1", &samples, &ctx_at(TALLINN, 20.0))
        .unwrap()
        .expect("slow window should classify");
    let slow_cluster = store.get(slow.cluster_id()).unwrap().unwrap();
    assert_eq!(slow_cluster.obstacle_type, EventType::SpeedBump);

    // At highway speed the same profile is a pothole impact
    let far = north_of(TALLINN, 400.0);
    let fast = pipeline
        .process_window("car-2", &samples, &ctx_at(far, 60.0))
        .unwrap()
        .expect("fast window should classify");
    let fast_cluster = store.get(fast.cluster_id()).unwrap().unwrap();
    assert_eq!(fast_cluster.obstacle_type, EventType::Pothole);
}

// ============================================================================
// Expiry and Warnings
// ============================================================================

#[test]
fn test_sweep_expires_stale_but_not_refreshed_clusters() {
    let (pipeline, store) = memory_pipeline();
    let far = north_of(TALLINN, 500.0);

    warm_up(&pipeline, "car-1", TALLINN);
    let stale = pipeline
        .process_sample(
            "car-1",
            AccelSample::new(0.1, 0.45, 1.55),
            &ctx_at(TALLINN, 45.0),
        )
        .unwrap()
        .unwrap();

    warm_up(&pipeline, "car-2", far);
    let fresh = pipeline
        .process_sample(
            "car-2",
            AccelSample::new(0.1, 0.45, 1.55),
            &ctx_at(far, 45.0),
        )
        .unwrap()
        .unwrap();

    // Age the first cluster's deadline directly through the store
    let mut aged = store.get(stale.cluster_id()).unwrap().unwrap();
    aged.expires_at = Utc::now() - Duration::hours(1);
    store.update(&aged).unwrap();

    let lifecycle = ClusterLifecycle::new(Arc::clone(&store), std::time::Duration::from_secs(60));
    let expired = lifecycle.sweep_expired().unwrap();
    assert_eq!(expired, 1);

    assert_eq!(
        store.get(stale.cluster_id()).unwrap().unwrap().status,
        ClusterStatus::Expired
    );
    assert_eq!(
        store.get(fresh.cluster_id()).unwrap().unwrap().status,
        ClusterStatus::Active
    );
}

#[test]
fn test_warning_raised_for_nearby_severe_cluster_only() {
    let (pipeline, store) = memory_pipeline();
    warm_up(&pipeline, "car-1", TALLINN);
    // delta_z of 0.85 sits near the top of the pothole band: grade 1
    pipeline
        .process_sample(
            "car-1",
            AccelSample::new(0.1, 0.50, 1.85),
            &ctx_at(TALLINN, 45.0),
        )
        .unwrap()
        .expect("severe pothole");

    let advisor = WarningAdvisor::default();
    let active = store.active_clusters().unwrap();

    let near = north_of(TALLINN, 100.0);
    let warning = advisor.advise(near, &active).expect("should warn at 100 m");
    assert!(warning.severity <= 2);
    assert!(warning.message.contains("pothole"));

    let far = north_of(TALLINN, 1_000.0);
    assert!(advisor.advise(far, &active).is_none());
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn test_clusters_survive_store_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replay_db");

    let created_id = {
        let store: Arc<dyn ClusterStore> = Arc::new(SledClusterStore::open(&path).unwrap());
        let pipeline = IngestPipeline::new(&DetectionConfig::default(), Arc::clone(&store));
        warm_up(&pipeline, "car-1", TALLINN);
        pipeline
            .process_sample(
                "car-1",
                AccelSample::new(0.1, 0.45, 1.55),
                &ctx_at(TALLINN, 45.0),
            )
            .unwrap()
            .expect("spike should cluster")
            .cluster_id()
    };

    let reopened = SledClusterStore::open(&path).unwrap();
    let cluster = reopened.get(created_id).unwrap().expect("cluster persisted");
    assert_eq!(cluster.obstacle_type, EventType::Pothole);
    assert_eq!(cluster.report_count, 1);
    assert_eq!(cluster.status, ClusterStatus::Active);
}
