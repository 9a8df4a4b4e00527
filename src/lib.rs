//! RoadPulse: Road Surface Hazard Detection
//!
//! Crowd-sourced detection of road surface hazards from vehicle
//! accelerometer streams, with spatial consolidation of reports.
//!
//! ## Architecture
//!
//! - **Signal Classifier**: Per-device anomaly classification (point and window paths)
//! - **Obstacle Clusterer**: Spatial find-or-create consolidation of reports
//! - **Cluster Lifecycle**: Sliding-TTL expiry sweeps
//! - **Warning Advisor**: Proximity warnings for live positions

pub mod advisor;
pub mod classifier;
pub mod cluster;
pub mod config;
pub mod geo;
pub mod pipeline;
pub mod storage;
pub mod types;

// Re-export configuration
pub use config::{ClassifierThresholds, DetectionConfig, ThresholdPatch, ThresholdStore};

// Re-export commonly used types
pub use types::{
    AccelSample, AccelSnapshot, ClassifiedEvent, ClusterStatus, EventType, ObstacleCluster,
    RoadType, SampleContext, Warning,
};

// Re-export geo primitives
pub use geo::{haversine_m, GeoPoint};

// Re-export the processing components
pub use advisor::WarningAdvisor;
pub use classifier::SignalClassifier;
pub use cluster::{lifecycle::ClusterLifecycle, ClusterOutcome, ObstacleClusterer};
pub use pipeline::IngestPipeline;

// Re-export storage
pub use storage::{ClusterStore, MemoryClusterStore, SledClusterStore, StorageError};
