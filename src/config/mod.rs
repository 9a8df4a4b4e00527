//! Detection Configuration
//!
//! All tunable constants of the hazard pipeline as operator-editable TOML
//! values. Each struct implements `Default` with values matching the fixed
//! heuristic calibration, so behavior is unchanged when no config file is
//! present.
//!
//! ## Loading Order
//!
//! 1. `ROADPULSE_CONFIG` environment variable (path to TOML file)
//! 2. `roadpulse.toml` in the current working directory
//! 3. Built-in defaults
//!
//! Classifier thresholds additionally support runtime hot replacement via
//! [`ThresholdStore`]; see the `thresholds` submodule.

mod thresholds;

pub use thresholds::{
    BrakingThresholds, BumpThresholds, ClassifierThresholds, PotholeThresholds, ThresholdPatch,
    ThresholdStore, VibrationThresholds, WindowThresholds,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Root configuration for a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DetectionConfig {
    /// Signal classifier thresholds (initial values for the threshold store)
    #[serde(default)]
    pub classifier: ClassifierThresholds,

    /// Cluster aggregation parameters
    #[serde(default)]
    pub cluster: ClusterParams,

    /// Proximity warning parameters
    #[serde(default)]
    pub advisor: AdvisorParams,

    /// Lifecycle sweep timing
    #[serde(default)]
    pub lifecycle: LifecycleParams,

    /// Storage backend location
    #[serde(default)]
    pub storage: StorageParams,
}

/// Parameters governing cluster find-or-create and merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterParams {
    /// Fixed cluster matching radius (meters); events strictly inside merge
    pub radius_m: f64,
    /// Inactivity period after which a cluster auto-expires (days)
    pub ttl_days: i64,
    /// Cluster confidence at report_count = 1
    pub confidence_base: f64,
    /// Confidence gained per additional corroborating report
    pub confidence_increment: f64,
    /// Hard confidence ceiling
    pub confidence_cap: f64,
    /// Share of contributing event types at which a type is adopted outright
    pub majority_share: f64,
    /// Neighborhood lock cell size (decimal degrees); must be much larger
    /// than radius_m at working latitudes
    pub lock_cell_deg: f64,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            radius_m: 30.0,
            ttl_days: 15,
            confidence_base: 0.40,
            confidence_increment: 0.10,
            confidence_cap: 0.99,
            majority_share: 0.70,
            lock_cell_deg: 0.01,
        }
    }
}

/// Parameters governing proximity warnings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorParams {
    /// Warn only inside this distance (meters)
    pub warning_radius_m: f64,
    /// Warn only at this severity or worse (numerically lower)
    pub max_severity: u8,
}

impl Default for AdvisorParams {
    fn default() -> Self {
        Self {
            warning_radius_m: 200.0,
            max_severity: 2,
        }
    }
}

/// Parameters governing the background expiry sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleParams {
    pub sweep_interval_secs: u64,
}

impl Default for LifecycleParams {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 3600,
        }
    }
}

/// Storage backend location (sled).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageParams {
    pub path: PathBuf,
}

impl Default for StorageParams {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/roadpulse_db"),
        }
    }
}

impl DetectionConfig {
    /// Load configuration using the standard search order:
    /// 1. `ROADPULSE_CONFIG` environment variable
    /// 2. `./roadpulse.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("ROADPULSE_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded detection config from ROADPULSE_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from ROADPULSE_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "ROADPULSE_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from("roadpulse.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded detection config from ./roadpulse.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./roadpulse.toml, using defaults");
                }
            }
        }

        info!("No roadpulse.toml found; using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents).map_err(ConfigError::Parse)?;
        Ok(config)
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
