//! Cluster lifecycle - periodic TTL expiry sweep
//!
//! Transitions active clusters whose sliding deadline has passed to
//! Expired. The sweep only flips status through the store's bulk expiry
//! predicate and never rewrites aggregates, so it is idempotent and safe
//! to run concurrently with ongoing merges.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::storage::{ClusterStore, StorageError};

/// Periodic expiry sweeper over a cluster store.
pub struct ClusterLifecycle {
    store: Arc<dyn ClusterStore>,
    interval: Duration,
}

impl ClusterLifecycle {
    pub fn new(store: Arc<dyn ClusterStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Expire every active cluster whose deadline has passed. Returns the
    /// number of clusters transitioned.
    pub fn sweep_expired(&self) -> Result<usize, StorageError> {
        self.sweep_expired_as_of(Utc::now())
    }

    /// Clock-injected sweep; admin tooling and tests pass an explicit cutoff.
    pub fn sweep_expired_as_of(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let expired = self.store.expire_before(now)?;
        if expired > 0 {
            info!(expired, "Expired stale obstacle clusters");
        } else {
            debug!("Expiry sweep found nothing to do");
        }
        Ok(expired)
    }

    /// Run the sweep loop (call from `tokio::spawn`). Never returns under
    /// normal operation; storage failures are logged and the loop continues
    /// on the next tick.
    pub async fn run(self) {
        info!(
            interval_secs = self.interval.as_secs(),
            backend = self.store.backend_name(),
            "Cluster lifecycle sweeper started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_expired() {
                error!(error = %e, transient = e.is_transient(), "Expiry sweep failed");
            }
        }
    }
}
