//! Cluster aggregation - spatial find-or-create/merge
//!
//! Given a classified event, the `ObstacleClusterer` finds the nearest
//! compatible active cluster within the fixed matching radius and merges the
//! event into it, or creates a new cluster. The whole find+create/merge
//! sequence for a spatial neighborhood runs under a per-grid-cell mutex, so
//! near-simultaneous reports of one hazard from different devices cannot
//! race into two creation paths, and merges of one cluster serialize.
//!
//! Lookup sits behind the `ClusterIndex` trait; the provided linear scan is
//! O(active clusters) per event, and a grid/geohash index can replace it
//! without touching merge semantics.

pub mod lifecycle;
mod merge;

pub use merge::confidence_for;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ClusterParams;
use crate::geo::{grid_cell, haversine_m, GeoPoint};
use crate::storage::{ClusterStore, StorageError};
use crate::types::{ClassifiedEvent, CompatGroup, ObstacleCluster};

/// Cluster aggregation errors.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// Storage failed; retryable when the inner error is transient. Retries
    /// give at-least-once cluster creation.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Events without a compatibility group (normal) cannot be clustered
    #[error("event type {0} is not clusterable")]
    NotClusterable(crate::types::EventType),
}

/// Lookup seam: find the nearest active cluster compatible with an event.
///
/// Implementations must not mutate anything; merge logic stays in the
/// clusterer regardless of how lookup is indexed.
pub trait ClusterIndex: Send + Sync {
    /// Nearest Active cluster strictly inside `radius_m` of `location`
    /// whose consolidated type shares `group`.
    fn nearest_active(
        &self,
        store: &dyn ClusterStore,
        location: GeoPoint,
        group: CompatGroup,
        radius_m: f64,
    ) -> Result<Option<ObstacleCluster>, StorageError>;
}

/// Linear scan over all active clusters.
#[derive(Debug, Default)]
pub struct LinearScanIndex;

impl ClusterIndex for LinearScanIndex {
    fn nearest_active(
        &self,
        store: &dyn ClusterStore,
        location: GeoPoint,
        group: CompatGroup,
        radius_m: f64,
    ) -> Result<Option<ObstacleCluster>, StorageError> {
        let mut nearest: Option<(f64, ObstacleCluster)> = None;
        for cluster in store.active_clusters()? {
            if cluster.obstacle_type.compat_group() != Some(group) {
                continue;
            }
            let distance = haversine_m(location, cluster.location.point());
            if distance >= radius_m {
                continue;
            }
            match &nearest {
                Some((best, _)) if *best <= distance => {}
                _ => nearest = Some((distance, cluster)),
            }
        }
        Ok(nearest.map(|(_, cluster)| cluster))
    }
}

/// Outcome of a find-or-create call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterOutcome {
    Created(Uuid),
    Merged(Uuid),
}

impl ClusterOutcome {
    pub fn cluster_id(&self) -> Uuid {
        match self {
            ClusterOutcome::Created(id) | ClusterOutcome::Merged(id) => *id,
        }
    }
}

/// The cluster aggregator. One instance is constructed at startup and
/// passed by reference to every call site; no ambient singleton.
///
/// Known limitation: two clusters created independently (storage retry
/// duplication, or reports racing across a lock-cell boundary) coexist
/// within radius; there is no automatic self-merge.
pub struct ObstacleClusterer {
    store: Arc<dyn ClusterStore>,
    index: Box<dyn ClusterIndex>,
    params: ClusterParams,
    /// Per-grid-cell locks guarding the find+create/merge sequence
    cell_locks: Mutex<HashMap<crate::geo::GridCell, Arc<Mutex<()>>>>,
}

impl ObstacleClusterer {
    pub fn new(store: Arc<dyn ClusterStore>, params: ClusterParams) -> Self {
        Self::with_index(store, Box::new(LinearScanIndex), params)
    }

    /// Construct with a custom lookup index.
    pub fn with_index(
        store: Arc<dyn ClusterStore>,
        index: Box<dyn ClusterIndex>,
        params: ClusterParams,
    ) -> Self {
        info!(
            backend = store.backend_name(),
            radius_m = params.radius_m,
            ttl_days = params.ttl_days,
            "Obstacle clusterer ready"
        );
        Self {
            store,
            index,
            params,
            cell_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn params(&self) -> &ClusterParams {
        &self.params
    }

    pub fn store(&self) -> &Arc<dyn ClusterStore> {
        &self.store
    }

    /// Find the nearest compatible active cluster for the event and merge
    /// into it, or create a new cluster.
    pub fn find_or_create(
        &self,
        event: &ClassifiedEvent,
        device_id: &str,
    ) -> Result<ClusterOutcome, ClusterError> {
        self.find_or_create_at(event, device_id, Utc::now())
    }

    /// Clock-injected variant; the public entry point passes wall time.
    pub fn find_or_create_at(
        &self,
        event: &ClassifiedEvent,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ClusterOutcome, ClusterError> {
        let group = event
            .event_type
            .compat_group()
            .ok_or(ClusterError::NotClusterable(event.event_type))?;

        // The neighborhood lock is held across lookup and write so the
        // check-then-act sequence is atomic for this grid cell.
        let cell_lock = self.cell_lock(event.location);
        let _guard = cell_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let nearest = self.index.nearest_active(
            self.store.as_ref(),
            event.location,
            group,
            self.params.radius_m,
        )?;

        match nearest {
            Some(mut cluster) => {
                cluster.merge_event(event, device_id, &self.params, now);
                self.store.update(&cluster)?;
                debug!(
                    cluster_id = %cluster.id,
                    event_type = event.event_type.short_code(),
                    report_count = cluster.report_count,
                    confidence = cluster.confidence,
                    "Merged event into cluster"
                );
                Ok(ClusterOutcome::Merged(cluster.id))
            }
            None => {
                let cluster = ObstacleCluster::create_from(event, device_id, &self.params, now);
                self.store.insert(&cluster)?;
                info!(
                    cluster_id = %cluster.id,
                    event_type = event.event_type.short_code(),
                    lat = event.location.lat,
                    lon = event.location.lon,
                    "Created obstacle cluster"
                );
                Ok(ClusterOutcome::Created(cluster.id))
            }
        }
    }

    fn cell_lock(&self, location: GeoPoint) -> Arc<Mutex<()>> {
        let cell = grid_cell(location, self.params.lock_cell_deg);
        let mut locks = self
            .cell_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(cell).or_insert_with(|| Arc::new(Mutex::new(()))))
    }
}
