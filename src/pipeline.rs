//! Ingest Pipeline - classifier-to-clusterer wiring
//!
//! Ties the per-device signal classifier to the obstacle clusterer so a
//! caller can feed raw samples (or batched windows) and get back the
//! cluster outcome, if the input produced a reportable event. This is the
//! main entry point for device ingest; the replay binary and the
//! integration tests both drive it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::classifier::SignalClassifier;
use crate::cluster::{ClusterError, ClusterOutcome, ObstacleClusterer};
use crate::config::DetectionConfig;
use crate::storage::ClusterStore;
use crate::types::{AccelSample, ClassifiedEvent, SampleContext};

/// Running pipeline counters, for observability.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    pub events_ingested: u64,
    pub clusters_created: u64,
    pub clusters_merged: u64,
    pub ingest_errors: u64,
}

/// End-to-end ingest path: classify, then consolidate.
pub struct IngestPipeline {
    classifier: SignalClassifier,
    clusterer: ObstacleClusterer,
    clusters_created: AtomicU64,
    clusters_merged: AtomicU64,
    ingest_errors: AtomicU64,
}

impl IngestPipeline {
    pub fn new(config: &DetectionConfig, store: Arc<dyn ClusterStore>) -> Self {
        let thresholds = Arc::new(crate::config::ThresholdStore::new(config.classifier.clone()));
        Self {
            classifier: SignalClassifier::new(thresholds),
            clusterer: ObstacleClusterer::new(store, config.cluster.clone()),
            clusters_created: AtomicU64::new(0),
            clusters_merged: AtomicU64::new(0),
            ingest_errors: AtomicU64::new(0),
        }
    }

    pub fn classifier(&self) -> &SignalClassifier {
        &self.classifier
    }

    pub fn clusterer(&self) -> &ObstacleClusterer {
        &self.clusterer
    }

    /// Feed a single accelerometer sample. Returns the cluster outcome if
    /// the sample classified as a reportable hazard.
    pub fn process_sample(
        &self,
        device_id: &str,
        sample: AccelSample,
        ctx: &SampleContext,
    ) -> Result<Option<ClusterOutcome>, ClusterError> {
        match self.classifier.classify_sample(device_id, sample, ctx) {
            Some(event) => self.consolidate(device_id, &event).map(Some),
            None => Ok(None),
        }
    }

    /// Feed a batched window of samples for one device.
    pub fn process_window(
        &self,
        device_id: &str,
        samples: &[AccelSample],
        ctx: &SampleContext,
    ) -> Result<Option<ClusterOutcome>, ClusterError> {
        match self.classifier.classify_window(device_id, samples, ctx) {
            Some(event) => self.consolidate(device_id, &event).map(Some),
            None => Ok(None),
        }
    }

    fn consolidate(
        &self,
        device_id: &str,
        event: &ClassifiedEvent,
    ) -> Result<ClusterOutcome, ClusterError> {
        match self.clusterer.find_or_create(event, device_id) {
            Ok(outcome) => {
                match outcome {
                    ClusterOutcome::Created(id) => {
                        self.clusters_created.fetch_add(1, Ordering::Relaxed);
                        info!(
                            device_id,
                            cluster_id = %id,
                            event_type = event.event_type.short_code(),
                            severity = event.severity,
                            "New obstacle cluster"
                        );
                    }
                    ClusterOutcome::Merged(id) => {
                        self.clusters_merged.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            device_id,
                            cluster_id = %id,
                            event_type = event.event_type.short_code(),
                            "Report merged into existing cluster"
                        );
                    }
                }
                Ok(outcome)
            }
            Err(err) => {
                self.ingest_errors.fetch_add(1, Ordering::Relaxed);
                warn!(device_id, error = %err, "Failed to consolidate event");
                Err(err)
            }
        }
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            events_ingested: self.classifier.stats().events_emitted,
            clusters_created: self.clusters_created.load(Ordering::Relaxed),
            clusters_merged: self.clusters_merged.load(Ordering::Relaxed),
            ingest_errors: self.ingest_errors.load(Ordering::Relaxed),
        }
    }
}
