//! Cluster storage collaborator
//!
//! Abstracts obstacle-cluster persistence behind the `ClusterStore` trait so
//! backends can be swapped without touching aggregation logic:
//! - `MemoryClusterStore`: in-memory store for tests and minimal deployments
//! - `SledClusterStore`: embedded sled backend for single-node deployments
//!
//! Storage failures during find-or-create surface as `StorageError` with a
//! transient/permanent distinction so callers may retry a whole batch.
//! Retries imply at-least-once cluster creation.

mod sled_store;

pub use sled_store::SledClusterStore;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::types::{ClusterStatus, ObstacleCluster};

/// Trait for pluggable cluster persistence backends.
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across tasks.
pub trait ClusterStore: Send + Sync {
    /// All clusters with status = Active (full records).
    fn active_clusters(&self) -> Result<Vec<ObstacleCluster>, StorageError>;

    /// Fetch one cluster by id.
    fn get(&self, id: Uuid) -> Result<Option<ObstacleCluster>, StorageError>;

    /// Insert a new cluster. Inserting an existing id overwrites it.
    fn insert(&self, cluster: &ObstacleCluster) -> Result<(), StorageError>;

    /// Update an existing cluster's fields by id.
    fn update(&self, cluster: &ObstacleCluster) -> Result<(), StorageError>;

    /// Bulk-transition every Active cluster whose deadline passed the cutoff
    /// to Expired. Returns the number of clusters transitioned. Only flips
    /// status; aggregate fields are never rewritten.
    fn expire_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError>;

    /// Filtered listing for admin tooling.
    fn list_by_status(
        &self,
        status: ClusterStatus,
        limit: usize,
    ) -> Result<Vec<ObstacleCluster>, StorageError>;

    /// Backend name for logging.
    fn backend_name(&self) -> &'static str;
}

/// Storage errors. `Transient` failures are retryable; everything else is
/// a caller bug or data problem.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("transient storage error: {0}")]
    Transient(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("cluster {0} not found")]
    NotFound(Uuid),
}

impl StorageError {
    /// Whether the caller may retry the whole batch.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

/// In-memory cluster store for tests and minimal deployments.
///
/// Thread-safe via `RwLock`. Not durable; data lost on restart.
#[derive(Default)]
pub struct MemoryClusterStore {
    clusters: RwLock<HashMap<Uuid, ObstacleCluster>>,
}

impl MemoryClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total cluster count across all statuses.
    pub fn len(&self) -> usize {
        self.clusters.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ClusterStore for MemoryClusterStore {
    fn active_clusters(&self) -> Result<Vec<ObstacleCluster>, StorageError> {
        let clusters = self
            .clusters
            .read()
            .map_err(|e| StorageError::Storage(e.to_string()))?;
        Ok(clusters
            .values()
            .filter(|c| c.status == ClusterStatus::Active)
            .cloned()
            .collect())
    }

    fn get(&self, id: Uuid) -> Result<Option<ObstacleCluster>, StorageError> {
        let clusters = self
            .clusters
            .read()
            .map_err(|e| StorageError::Storage(e.to_string()))?;
        Ok(clusters.get(&id).cloned())
    }

    fn insert(&self, cluster: &ObstacleCluster) -> Result<(), StorageError> {
        let mut clusters = self
            .clusters
            .write()
            .map_err(|e| StorageError::Storage(e.to_string()))?;
        clusters.insert(cluster.id, cluster.clone());
        Ok(())
    }

    fn update(&self, cluster: &ObstacleCluster) -> Result<(), StorageError> {
        let mut clusters = self
            .clusters
            .write()
            .map_err(|e| StorageError::Storage(e.to_string()))?;
        match clusters.get_mut(&cluster.id) {
            Some(existing) => {
                *existing = cluster.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(cluster.id)),
        }
    }

    fn expire_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut clusters = self
            .clusters
            .write()
            .map_err(|e| StorageError::Storage(e.to_string()))?;
        let mut expired = 0;
        for cluster in clusters.values_mut() {
            if cluster.status == ClusterStatus::Active && cluster.expires_at < cutoff {
                cluster.status = ClusterStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }

    fn list_by_status(
        &self,
        status: ClusterStatus,
        limit: usize,
    ) -> Result<Vec<ObstacleCluster>, StorageError> {
        let clusters = self
            .clusters
            .read()
            .map_err(|e| StorageError::Storage(e.to_string()))?;
        Ok(clusters
            .values()
            .filter(|c| c.status == status)
            .take(limit)
            .cloned()
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterParams;
    use crate::geo::GeoPoint;
    use crate::types::{AccelSnapshot, ClassifiedEvent, EventType, RoadType};
    use chrono::Duration;

    pub(crate) fn make_cluster(expires_in_days: i64) -> ObstacleCluster {
        let event = ClassifiedEvent {
            event_type: EventType::Pothole,
            severity: 2,
            confidence: 0.85,
            road_type: RoadType::Asphalt,
            snapshot: AccelSnapshot::default(),
            location: GeoPoint::new(59.437, 24.7536),
            speed_kmh: 40.0,
            observed_at: Utc::now(),
        };
        let params = ClusterParams {
            ttl_days: expires_in_days,
            ..Default::default()
        };
        ObstacleCluster::create_from(&event, "dev-1", &params, Utc::now())
    }

    #[test]
    fn test_insert_and_active_listing() {
        let store = MemoryClusterStore::new();
        let cluster = make_cluster(15);
        store.insert(&cluster).unwrap();
        let active = store.active_clusters().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, cluster.id);
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let store = MemoryClusterStore::new();
        let cluster = make_cluster(15);
        let err = store.update(&cluster).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_expire_before_flips_only_past_deadlines() {
        let store = MemoryClusterStore::new();
        let stale = make_cluster(15);
        let fresh = make_cluster(15);
        store.insert(&stale).unwrap();
        store.insert(&fresh).unwrap();

        let cutoff = Utc::now() + Duration::days(15) - Duration::seconds(5);
        assert_eq!(store.expire_before(cutoff).unwrap(), 0);

        let cutoff = Utc::now() + Duration::days(15) + Duration::seconds(5);
        assert_eq!(store.expire_before(cutoff).unwrap(), 2);
        assert!(store.active_clusters().unwrap().is_empty());
        assert_eq!(
            store.list_by_status(ClusterStatus::Expired, 10).unwrap().len(),
            2
        );

        // Idempotent
        assert_eq!(store.expire_before(cutoff).unwrap(), 0);
    }

    #[test]
    fn test_expired_clusters_keep_aggregates() {
        let store = MemoryClusterStore::new();
        let cluster = make_cluster(0);
        store.insert(&cluster).unwrap();
        store.expire_before(Utc::now() + Duration::seconds(1)).unwrap();
        let stored = store.get(cluster.id).unwrap().unwrap();
        assert_eq!(stored.status, ClusterStatus::Expired);
        assert_eq!(stored.report_count, cluster.report_count);
        assert_eq!(stored.severity.history, cluster.severity.history);
    }
}
