//! Session configuration.
//!
//! Every field has a default, so a TOML file only needs the values it
//! changes:
//!
//! ```
//! use semtrace_runtime::config::SessionConfig;
//!
//! let config = SessionConfig::from_toml_str(
//!     r#"
//!     log_directory = "/tmp/semlog"
//!     episode_id = "breakfast_01"
//!
//!     [mask]
//!     min_manhattan_distance = 40
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.episode_id, "breakfast_01");
//! assert_eq!(config.mask.min_manhattan_distance, 40);
//! assert_eq!(config.mask.max_trials, 100);
//! assert!(config.snapshot.enabled);
//! ```

use std::path::{Path, PathBuf};

use semtrace_individuals::mask::MaskGenerator;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Largest possible Manhattan distance between two RGB colors.
pub const MAX_MANHATTAN_DISTANCE: u32 = 3 * 255;

// ---------------------------------------------------------------------------
// MaskConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    pub min_manhattan_distance: u32,
    pub max_trials: u32,
}

impl Default for MaskConfig {
    fn default() -> Self {
        let generator = MaskGenerator::default();
        Self {
            min_manhattan_distance: generator.min_manhattan_distance,
            max_trials: generator.max_trials,
        }
    }
}

impl MaskConfig {
    pub fn generator(&self) -> MaskGenerator {
        MaskGenerator::new(self.min_manhattan_distance, self.max_trials)
    }
}

// ---------------------------------------------------------------------------
// SnapshotConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Run the background world-state worker.
    pub enabled: bool,
    /// Seconds of simulation time between snapshot requests.
    pub interval: f64,
    /// After the first snapshot, only individuals whose pose changed by more
    /// than this are included.
    pub pose_tolerance: f64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 0.1,
            pose_tolerance: 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Root output directory. Documents go to `{log_directory}/Episodes/`.
    pub log_directory: PathBuf,
    /// Empty means "generate one when the session starts".
    pub episode_id: String,
    pub task_id: String,
    pub overwrite: bool,
    pub write_timelines: bool,
    pub timeline_episode_row: bool,
    /// Closed events shorter than this many seconds are dropped.
    pub contact_min_duration: f64,
    pub seed: u64,
    pub mask: MaskConfig,
    pub snapshot: SnapshotConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            log_directory: PathBuf::from("SemLog"),
            episode_id: String::new(),
            task_id: String::new(),
            overwrite: false,
            write_timelines: true,
            timeline_episode_row: true,
            contact_min_duration: 0.0,
            seed: 0,
            mask: MaskConfig::default(),
            snapshot: SnapshotConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Reject values the session cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: String| {
            Err(ConfigError::Invalid { field, reason })
        };
        if !(self.snapshot.interval.is_finite() && self.snapshot.interval > 0.0) {
            return invalid(
                "snapshot.interval",
                format!("must be positive and finite, got {}", self.snapshot.interval),
            );
        }
        if !(self.snapshot.pose_tolerance.is_finite() && self.snapshot.pose_tolerance >= 0.0) {
            return invalid(
                "snapshot.pose_tolerance",
                format!("must be non-negative, got {}", self.snapshot.pose_tolerance),
            );
        }
        if !(self.contact_min_duration.is_finite() && self.contact_min_duration >= 0.0) {
            return invalid(
                "contact_min_duration",
                format!("must be non-negative, got {}", self.contact_min_duration),
            );
        }
        if self.mask.max_trials == 0 {
            return invalid("mask.max_trials", "must be at least 1".to_owned());
        }
        if self.mask.min_manhattan_distance > MAX_MANHATTAN_DISTANCE {
            return invalid(
                "mask.min_manhattan_distance",
                format!(
                    "{} exceeds the largest possible distance {MAX_MANHATTAN_DISTANCE}",
                    self.mask.min_manhattan_distance
                ),
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
