//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/default.toml
//!
//! Every section and key is optional. A missing file falls back to the
//! defaults; an unreadable or invalid file is fatal.

use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Trailing horizon for start evidence (seconds)
    pub start_s: u64,
    /// Trailing horizon for stop evidence (seconds)
    pub stop_s: u64,
    /// Gap between samples that force-closes a trip (seconds)
    pub silence_timeout_s: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { start_s: 60, stop_s: 120, silence_timeout_s: 180 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    /// Measured speed above which a sample counts as movement (km/h)
    pub speed_kph: f64,
    /// GPS-implied speed above which a sample counts as movement (m/s)
    pub displacement_mps: f64,
    /// Flagged samples within the start window required to open a trip
    pub start_min_flags: usize,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self { speed_kph: 1.5, displacement_mps: 0.6, start_min_flags: 2 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JitterConfig {
    /// Samples at or below this speed are treated as parked (km/h)
    pub stationary_speed_kph: f64,
    /// Parked samples needed before the day falls back to all samples
    pub min_stationary_samples: usize,
    pub percentile: f64,
    pub min_m: f64,
    pub max_m: f64,
    /// Radius used for a day with no estimate
    pub default_m: f64,
    /// UTC offset (minutes) that defines calendar-day buckets
    pub day_offset_minutes: i32,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            stationary_speed_kph: 0.5,
            min_stationary_samples: 20,
            percentile: 95.0,
            min_m: 10.0,
            max_m: 35.0,
            default_m: 20.0,
            day_offset_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HysteresisConfig {
    pub start_floor_m: f64,
    pub start_jitter_factor: f64,
    pub stop_floor_m: f64,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self { start_floor_m: 25.0, start_jitter_factor: 2.0, stop_floor_m: 10.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub min_duration_s: u64,
    pub min_distance_m: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self { min_duration_s: 120, min_distance_m: 300.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub max_gap_s: u64,
    pub proximity_floor_m: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self { max_gap_s: 180, proximity_floor_m: 50.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Telemetry file (JSONL, one sample per line)
    pub telemetry_file: String,
    /// Vehicles with fewer samples are skipped
    pub min_samples: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { telemetry_file: "data/telemetry.jsonl".to_string(), min_samples: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Trip file (JSONL, one trip per line)
    pub trips_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { trips_file: "data/trips.jsonl".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Vehicles processed concurrently
    pub workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TomlConfig {
    pub window: WindowConfig,
    pub evidence: EvidenceConfig,
    pub jitter: JitterConfig,
    pub hysteresis: HysteresisConfig,
    pub filter: FilterConfig,
    pub merge: MergeConfig,
    pub input: InputConfig,
    pub output: OutputConfig,
    pub batch: BatchConfig,
}

/// Tunables consumed by the segmentation algorithm
///
/// Immutable for the duration of a run; every vehicle sees the same values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentationParams {
    pub start_window_s: u64,
    pub stop_window_s: u64,
    pub silence_timeout_s: u64,
    pub speed_flag_kph: f64,
    pub displacement_flag_mps: f64,
    pub start_min_flags: usize,
    pub stationary_speed_kph: f64,
    pub min_stationary_samples: usize,
    pub jitter_percentile: f64,
    pub jitter_min_m: f64,
    pub jitter_max_m: f64,
    pub jitter_default_m: f64,
    pub day_offset: FixedOffset,
    pub start_floor_m: f64,
    pub start_jitter_factor: f64,
    pub stop_floor_m: f64,
    pub min_trip_duration_s: u64,
    pub min_trip_distance_m: f64,
    pub merge_gap_s: u64,
    pub merge_floor_m: f64,
    pub min_samples: usize,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        let window = WindowConfig::default();
        let evidence = EvidenceConfig::default();
        let jitter = JitterConfig::default();
        let hysteresis = HysteresisConfig::default();
        let filter = FilterConfig::default();
        let merge = MergeConfig::default();
        Self {
            start_window_s: window.start_s,
            stop_window_s: window.stop_s,
            silence_timeout_s: window.silence_timeout_s,
            speed_flag_kph: evidence.speed_kph,
            displacement_flag_mps: evidence.displacement_mps,
            start_min_flags: evidence.start_min_flags,
            stationary_speed_kph: jitter.stationary_speed_kph,
            min_stationary_samples: jitter.min_stationary_samples,
            jitter_percentile: jitter.percentile,
            jitter_min_m: jitter.min_m,
            jitter_max_m: jitter.max_m,
            jitter_default_m: jitter.default_m,
            day_offset: Utc.fix(),
            start_floor_m: hysteresis.start_floor_m,
            start_jitter_factor: hysteresis.start_jitter_factor,
            stop_floor_m: hysteresis.stop_floor_m,
            min_trip_duration_s: filter.min_duration_s,
            min_trip_distance_m: filter.min_distance_m,
            merge_gap_s: merge.max_gap_s,
            merge_floor_m: merge.proximity_floor_m,
            min_samples: InputConfig::default().min_samples,
        }
    }
}

impl SegmentationParams {
    /// Accumulated movement needed to open a trip on a day with jitter `j`
    #[inline]
    pub fn start_radius_m(&self, j: f64) -> f64 {
        self.start_floor_m.max(self.start_jitter_factor * j)
    }

    /// Accumulated movement below which a trip may close on a day with jitter `j`
    #[inline]
    pub fn stop_radius_m(&self, j: f64) -> f64 {
        self.stop_floor_m.max(j)
    }
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    params: SegmentationParams,
    telemetry_file: String,
    trips_file: String,
    workers: usize,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            params: SegmentationParams::default(),
            telemetry_file: InputConfig::default().telemetry_file,
            trips_file: OutputConfig::default().trips_file,
            workers: BatchConfig::default().workers,
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path: explicit path, then CONFIG_FILE, then the default
    pub fn resolve_config_path(explicit: Option<String>) -> String {
        if let Some(path) = explicit {
            return path;
        }

        // Check CONFIG_FILE environment variable
        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/default.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: display.clone(), source })?;
        Self::from_toml_str(&content, &display)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let toml_config: TomlConfig = toml::from_str(content)
            .map_err(|source| ConfigError::Parse { path: origin.to_string(), source })?;
        Self::from_toml(toml_config, origin)
    }

    fn from_toml(toml_config: TomlConfig, origin: &str) -> Result<Self, ConfigError> {
        let TomlConfig { window, evidence, jitter, hysteresis, filter, merge, input, output, batch } =
            toml_config;

        let day_offset = FixedOffset::east_opt(jitter.day_offset_minutes.saturating_mul(60))
            .ok_or_else(|| ConfigError::Invalid {
                field: "jitter.day_offset_minutes",
                reason: format!("{} is not a valid UTC offset", jitter.day_offset_minutes),
            })?;

        let params = SegmentationParams {
            start_window_s: window.start_s,
            stop_window_s: window.stop_s,
            silence_timeout_s: window.silence_timeout_s,
            speed_flag_kph: evidence.speed_kph,
            displacement_flag_mps: evidence.displacement_mps,
            start_min_flags: evidence.start_min_flags,
            stationary_speed_kph: jitter.stationary_speed_kph,
            min_stationary_samples: jitter.min_stationary_samples,
            jitter_percentile: jitter.percentile,
            jitter_min_m: jitter.min_m,
            jitter_max_m: jitter.max_m,
            jitter_default_m: jitter.default_m,
            day_offset,
            start_floor_m: hysteresis.start_floor_m,
            start_jitter_factor: hysteresis.start_jitter_factor,
            stop_floor_m: hysteresis.stop_floor_m,
            min_trip_duration_s: filter.min_duration_s,
            min_trip_distance_m: filter.min_distance_m,
            merge_gap_s: merge.max_gap_s,
            merge_floor_m: merge.proximity_floor_m,
            min_samples: input.min_samples,
        };

        let config = Self {
            params,
            telemetry_file: input.telemetry_file,
            trips_file: output.trips_file,
            workers: batch.workers,
            config_file: origin.to_string(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration - tries the TOML file first, falls back to
    /// defaults only when the file does not exist
    pub fn load_from_path(path: &str) -> Result<Self, ConfigError> {
        if !Path::new(path).exists() {
            warn!(config_file = %path, "config_file_missing_using_defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Reject threshold values the algorithm cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.params;

        for (field, value) in [
            ("window.start_s", p.start_window_s),
            ("window.stop_s", p.stop_window_s),
            ("window.silence_timeout_s", p.silence_timeout_s),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero"));
            }
        }

        for (field, value) in [
            ("evidence.speed_kph", p.speed_flag_kph),
            ("evidence.displacement_mps", p.displacement_flag_mps),
            ("jitter.stationary_speed_kph", p.stationary_speed_kph),
            ("jitter.min_m", p.jitter_min_m),
            ("jitter.max_m", p.jitter_max_m),
            ("jitter.default_m", p.jitter_default_m),
            ("hysteresis.start_floor_m", p.start_floor_m),
            ("hysteresis.start_jitter_factor", p.start_jitter_factor),
            ("hysteresis.stop_floor_m", p.stop_floor_m),
            ("filter.min_distance_m", p.min_trip_distance_m),
            ("merge.proximity_floor_m", p.merge_floor_m),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(field, "must be a finite, non-negative number"));
            }
        }

        if p.jitter_min_m > p.jitter_max_m {
            return Err(invalid("jitter.min_m", "must not exceed jitter.max_m"));
        }
        if !(0.0..=100.0).contains(&p.jitter_percentile) {
            return Err(invalid("jitter.percentile", "must be within [0, 100]"));
        }
        if p.start_min_flags == 0 {
            return Err(invalid("evidence.start_min_flags", "must be at least 1"));
        }
        if p.min_samples < 2 {
            return Err(invalid("input.min_samples", "must be at least 2"));
        }
        if self.workers == 0 {
            return Err(invalid("batch.workers", "must be at least 1"));
        }
        Ok(())
    }

    pub fn params(&self) -> &SegmentationParams {
        &self.params
    }

    pub fn telemetry_file(&self) -> &str {
        &self.telemetry_file
    }

    pub fn trips_file(&self) -> &str {
        &self.trips_file
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn with_telemetry_file(mut self, path: impl Into<String>) -> Self {
        self.telemetry_file = path.into();
        self
    }

    pub fn with_trips_file(mut self, path: impl Into<String>) -> Self {
        self.trips_file = path.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field, reason: reason.to_string() }
}
