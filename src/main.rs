//! roadpulse-replay - Offline trace replay tool
//!
//! Streams recorded accelerometer traces (JSONL, one sample per line)
//! through the full ingest pipeline and reports what clusters the run
//! produced. Useful for threshold tuning against captured drives.
//!
//! # Usage
//!
//! ```bash
//! # Replay a trace into a throwaway in-memory store
//! roadpulse-replay --input drive.jsonl --memory
//!
//! # Replay into the persistent sled store, then print a proximity check
//! roadpulse-replay --input drive.jsonl --warn-at 59.437,24.7536
//! ```
//!
//! # Environment Variables
//!
//! - `ROADPULSE_CONFIG`: Path to the TOML config file
//! - `RUST_LOG`: Logging level (default: info)

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};

use roadpulse::cluster::lifecycle::ClusterLifecycle;
use roadpulse::config::DetectionConfig;
use roadpulse::pipeline::IngestPipeline;
use roadpulse::storage::{ClusterStore, MemoryClusterStore, SledClusterStore};
use roadpulse::types::{AccelSample, ClusterStatus, RoadType, SampleContext};
use roadpulse::{GeoPoint, WarningAdvisor};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "roadpulse-replay")]
#[command(about = "Replay recorded accelerometer traces through the hazard pipeline")]
#[command(version)]
struct CliArgs {
    /// Path to the JSONL trace file (one sample record per line)
    #[arg(long)]
    input: PathBuf,

    /// Path to the TOML config file (overrides ROADPULSE_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use a throwaway in-memory store instead of the sled database
    #[arg(long)]
    memory: bool,

    /// Override the sled database path from the config
    #[arg(long)]
    db: Option<PathBuf>,

    /// After the replay, run a proximity check from this position ("lat,lon")
    #[arg(long, value_name = "LAT,LON")]
    warn_at: Option<String>,
}

// ============================================================================
// Trace Format
// ============================================================================

/// One line of a recorded trace.
#[derive(Debug, Deserialize)]
struct TraceRecord {
    device_id: String,
    x: f64,
    y: f64,
    z: f64,
    lat: f64,
    lon: f64,
    speed_kmh: f64,
    #[serde(default)]
    road_type: RoadType,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

impl TraceRecord {
    fn sample(&self) -> AccelSample {
        AccelSample {
            x: self.x,
            y: self.y,
            z: self.z,
            timestamp: self.timestamp,
        }
    }

    fn context(&self) -> SampleContext {
        SampleContext {
            location: GeoPoint::new(self.lat, self.lon),
            speed_kmh: self.speed_kmh,
            road_type: self.road_type,
        }
    }
}

fn parse_position(raw: &str) -> Result<GeoPoint> {
    let (lat, lon) = raw
        .split_once(',')
        .with_context(|| format!("Expected LAT,LON, got '{raw}'"))?;
    Ok(GeoPoint::new(
        lat.trim().parse().context("Invalid latitude")?,
        lon.trim().parse().context("Invalid longitude")?,
    ))
}

// ============================================================================
// Entry Point
// ============================================================================

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let config = match &args.config {
        Some(path) => DetectionConfig::load_from_file(path)?,
        None => DetectionConfig::load(),
    };

    let store: Arc<dyn ClusterStore> = if args.memory {
        Arc::new(MemoryClusterStore::new())
    } else {
        let path = args.db.clone().unwrap_or_else(|| config.storage.path.clone());
        Arc::new(SledClusterStore::open(&path)?)
    };
    info!(backend = store.backend_name(), "Cluster store ready");

    let pipeline = IngestPipeline::new(&config, Arc::clone(&store));

    // Stream the trace
    let file = File::open(&args.input)
        .with_context(|| format!("Cannot open trace file {}", args.input.display()))?;
    let mut lines_read = 0u64;
    let mut lines_skipped = 0u64;

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.context("Failed to read trace line")?;
        if line.trim().is_empty() {
            continue;
        }
        let record: TraceRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(err) => {
                warn!(line = line_no + 1, error = %err, "Skipping malformed trace line");
                lines_skipped += 1;
                continue;
            }
        };
        lines_read += 1;
        pipeline.process_sample(&record.device_id, record.sample(), &record.context())?;
    }

    // One-shot expiry sweep before reporting
    let lifecycle = ClusterLifecycle::new(
        Arc::clone(&store),
        std::time::Duration::from_secs(config.lifecycle.sweep_interval_secs),
    );
    let expired = lifecycle.sweep_expired()?;

    let stats = pipeline.stats();
    let active = store.active_clusters()?;
    info!(
        samples = lines_read,
        skipped = lines_skipped,
        events = stats.events_ingested,
        created = stats.clusters_created,
        merged = stats.clusters_merged,
        expired,
        active = active.len(),
        "Replay complete"
    );

    for cluster in &active {
        info!(
            cluster_id = %cluster.id,
            obstacle = cluster.obstacle_type.display_name(),
            severity = cluster.severity.max,
            confidence = format!("{:.2}", cluster.confidence),
            reports = cluster.report_count,
            devices = cluster.device_ids.len(),
            lat = cluster.location.lat,
            lon = cluster.location.lon,
            "Active cluster"
        );
    }

    if let Some(raw) = &args.warn_at {
        let position = parse_position(raw)?;
        let advisor = WarningAdvisor::new(config.advisor.clone());
        match advisor.advise(position, &active) {
            Some(warning) => info!(
                severity = warning.severity,
                distance_m = format!("{:.0}", warning.distance_m),
                "{}",
                warning.message
            ),
            None => info!("No hazards near the given position"),
        }
    }

    let rejected = store.list_by_status(ClusterStatus::Expired, 10)?;
    if !rejected.is_empty() {
        info!(count = rejected.len(), "Expired clusters retained in store");
    }

    Ok(())
}
