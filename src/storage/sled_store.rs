//! Sled-backed cluster store
//!
//! Embedded persistent backend for single-node deployments. Clusters are
//! stored as serde_json values keyed by their uuid bytes. Corrupted entries
//! are skipped with a warning rather than failing whole scans, so one bad
//! record cannot take down ingestion.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::{ClusterStatus, ObstacleCluster};

use super::{ClusterStore, StorageError};

/// Persistent cluster store backed by sled.
#[derive(Clone)]
pub struct SledClusterStore {
    db: Arc<sled::Db>,
}

impl SledClusterStore {
    /// Open or create the cluster database.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref).map_err(|e| StorageError::Transient(e.to_string()))?;
        info!(path = %path_ref.display(), "Cluster storage opened");
        Ok(Self { db: Arc::new(db) })
    }

    /// Total cluster count across all statuses.
    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    fn put(&self, cluster: &ObstacleCluster) -> Result<(), StorageError> {
        let value = serde_json::to_vec(cluster)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.db
            .insert(cluster.id.as_bytes(), value)
            .map_err(|e| StorageError::Transient(e.to_string()))?;
        self.db
            .flush()
            .map_err(|e| StorageError::Transient(e.to_string()))?;
        Ok(())
    }

    fn scan<F>(&self, mut keep: F) -> Result<Vec<ObstacleCluster>, StorageError>
    where
        F: FnMut(&ObstacleCluster) -> bool,
    {
        let mut clusters = Vec::new();
        for item in self.db.iter() {
            let (_key, value) = item.map_err(|e| StorageError::Transient(e.to_string()))?;
            match serde_json::from_slice::<ObstacleCluster>(&value) {
                Ok(cluster) => {
                    if keep(&cluster) {
                        clusters.push(cluster);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted cluster record");
                }
            }
        }
        Ok(clusters)
    }
}

impl ClusterStore for SledClusterStore {
    fn active_clusters(&self) -> Result<Vec<ObstacleCluster>, StorageError> {
        self.scan(|c| c.status == ClusterStatus::Active)
    }

    fn get(&self, id: Uuid) -> Result<Option<ObstacleCluster>, StorageError> {
        match self
            .db
            .get(id.as_bytes())
            .map_err(|e| StorageError::Transient(e.to_string()))?
        {
            Some(value) => {
                let cluster = serde_json::from_slice(&value)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(cluster))
            }
            None => Ok(None),
        }
    }

    fn insert(&self, cluster: &ObstacleCluster) -> Result<(), StorageError> {
        self.put(cluster)
    }

    fn update(&self, cluster: &ObstacleCluster) -> Result<(), StorageError> {
        if self
            .db
            .get(cluster.id.as_bytes())
            .map_err(|e| StorageError::Transient(e.to_string()))?
            .is_none()
        {
            return Err(StorageError::NotFound(cluster.id));
        }
        self.put(cluster)
    }

    fn expire_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let stale = self.scan(|c| c.status == ClusterStatus::Active && c.expires_at < cutoff)?;
        let mut expired = 0;
        for mut cluster in stale {
            cluster.status = ClusterStatus::Expired;
            self.put(&cluster)?;
            expired += 1;
        }
        Ok(expired)
    }

    fn list_by_status(
        &self,
        status: ClusterStatus,
        limit: usize,
    ) -> Result<Vec<ObstacleCluster>, StorageError> {
        let mut clusters = self.scan(|c| c.status == status)?;
        clusters.truncate(limit);
        Ok(clusters)
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::make_cluster;
    use chrono::Duration;

    #[test]
    fn test_open_insert_and_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = make_cluster(15);
        {
            let store = SledClusterStore::open(dir.path()).unwrap();
            store.insert(&cluster).unwrap();
        }
        let store = SledClusterStore::open(dir.path()).unwrap();
        let loaded = store.get(cluster.id).unwrap().unwrap();
        assert_eq!(loaded.id, cluster.id);
        assert_eq!(loaded.report_count, 1);
    }

    #[test]
    fn test_trait_object_usable() {
        let dir = tempfile::tempdir().unwrap();
        let store: Box<dyn ClusterStore> = Box::new(SledClusterStore::open(dir.path()).unwrap());
        assert_eq!(store.backend_name(), "sled");
        store.insert(&make_cluster(15)).unwrap();
        assert_eq!(store.active_clusters().unwrap().len(), 1);
    }

    #[test]
    fn test_expire_before_persists_transition() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledClusterStore::open(dir.path()).unwrap();
        store.insert(&make_cluster(15)).unwrap();

        let cutoff = Utc::now() + Duration::days(16);
        assert_eq!(store.expire_before(cutoff).unwrap(), 1);
        assert!(store.active_clusters().unwrap().is_empty());
        assert_eq!(
            store
                .list_by_status(ClusterStatus::Expired, 10)
                .unwrap()
                .len(),
            1
        );
    }
}
