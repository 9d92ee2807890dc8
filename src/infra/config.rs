//! Configuration loading from TOML files
//!
//! The config file path comes from the --config command line argument
//! (default: config/dev.toml); a missing or invalid file falls back to
//! built-in defaults with a warning.

use crate::domain::types::LatLng;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Tick interval for the periodic evaluation pass (seconds)
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// User ids refreshed on every tick even before their first sample
    #[serde(default = "default_users")]
    pub users: Vec<String>,
    /// Preferred locale for zone display names
    #[serde(default = "default_preferred_locale")]
    pub preferred_locale: String,
}

fn default_tick_interval_secs() -> u64 {
    30
}

fn default_users() -> Vec<String> {
    vec!["owner".to_string()]
}

fn default_preferred_locale() -> String {
    "en".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            users: default_users(),
            preferred_locale: default_preferred_locale(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// JSON settings-store file path
    #[serde(default = "default_storage_file")]
    pub file: String,
}

fn default_storage_file() -> String {
    "geofence_store.json".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { file: default_storage_file() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneDefaultsConfig {
    #[serde(default = "default_radius_m")]
    pub radius_m: f64,
    #[serde(default = "default_dwell_time_ms")]
    pub dwell_time_ms: u64,
    #[serde(default = "default_approach_distance_m")]
    pub approach_distance_m: f64,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_radius_m() -> f64 {
    100.0
}

fn default_dwell_time_ms() -> u64 {
    300_000
}

fn default_approach_distance_m() -> f64 {
    500.0
}

fn default_cooldown_ms() -> u64 {
    300_000
}

impl Default for ZoneDefaultsConfig {
    fn default() -> Self {
        Self {
            radius_m: default_radius_m(),
            dwell_time_ms: default_dwell_time_ms(),
            approach_distance_m: default_approach_distance_m(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdaptiveConfig {
    /// Multiplier from reported accuracy to target radius
    #[serde(default = "default_accuracy_factor")]
    pub accuracy_factor: f64,
    /// Exponential smoothing rate toward the target radius, in (0, 1)
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,
    #[serde(default = "default_min_radius_m")]
    pub min_radius_m: f64,
    #[serde(default = "default_max_radius_m")]
    pub max_radius_m: f64,
}

fn default_accuracy_factor() -> f64 {
    10.0
}

fn default_smoothing() -> f64 {
    0.3
}

fn default_min_radius_m() -> f64 {
    50.0
}

fn default_max_radius_m() -> f64 {
    500.0
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            accuracy_factor: default_accuracy_factor(),
            smoothing: default_smoothing(),
            min_radius_m: default_min_radius_m(),
            max_radius_m: default_max_radius_m(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TravelConfig {
    /// Minimum same-user samples before a pattern is computed
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Fallback speed for ETA prediction (m/s)
    #[serde(default = "default_speed_mps")]
    pub default_speed_mps: f64,
}

fn default_min_samples() -> usize {
    2
}

fn default_speed_mps() -> f64 {
    10.0
}

impl Default for TravelConfig {
    fn default() -> Self {
        Self { min_samples: default_min_samples(), default_speed_mps: default_speed_mps() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HomeConfig {
    /// Fallback coordinates for the synthesized "home" zone when the
    /// location provider is unavailable at first run
    #[serde(default = "default_home_latitude")]
    pub latitude: f64,
    #[serde(default = "default_home_longitude")]
    pub longitude: f64,
}

fn default_home_latitude() -> f64 {
    59.3293
}

fn default_home_longitude() -> f64 {
    18.0686
}

impl Default for HomeConfig {
    fn default() -> Self {
        Self { latitude: default_home_latitude(), longitude: default_home_longitude() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

fn default_metrics_interval_secs() -> u64 {
    10
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub defaults: ZoneDefaultsConfig,
    #[serde(default)]
    pub adaptive: AdaptiveConfig,
    #[serde(default)]
    pub travel: TravelConfig,
    #[serde(default)]
    pub home: HomeConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    tick_interval_secs: u64,
    users: Vec<String>,
    preferred_locale: String,
    storage_file: String,
    default_radius_m: f64,
    default_dwell_time_ms: u64,
    default_approach_distance_m: f64,
    default_cooldown_ms: u64,
    adaptive_accuracy_factor: f64,
    adaptive_smoothing: f64,
    min_radius_m: f64,
    max_radius_m: f64,
    travel_min_samples: usize,
    travel_default_speed_mps: f64,
    home_location: LatLng,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            tick_interval_secs: toml_config.engine.tick_interval_secs,
            users: toml_config.engine.users,
            preferred_locale: toml_config.engine.preferred_locale,
            storage_file: toml_config.storage.file,
            default_radius_m: toml_config.defaults.radius_m,
            default_dwell_time_ms: toml_config.defaults.dwell_time_ms,
            default_approach_distance_m: toml_config.defaults.approach_distance_m,
            default_cooldown_ms: toml_config.defaults.cooldown_ms,
            adaptive_accuracy_factor: toml_config.adaptive.accuracy_factor,
            adaptive_smoothing: toml_config.adaptive.smoothing,
            min_radius_m: toml_config.adaptive.min_radius_m,
            max_radius_m: toml_config.adaptive.max_radius_m,
            travel_min_samples: toml_config.travel.min_samples,
            travel_default_speed_mps: toml_config.travel.default_speed_mps,
            home_location: LatLng::new(toml_config.home.latitude, toml_config.home.longitude),
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: config_file.to_string(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load from a path, falling back to defaults if the file is missing
    /// or invalid
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn tick_interval_secs(&self) -> u64 {
        self.tick_interval_secs
    }

    pub fn users(&self) -> &[String] {
        &self.users
    }

    pub fn preferred_locale(&self) -> &str {
        &self.preferred_locale
    }

    pub fn storage_file(&self) -> &str {
        &self.storage_file
    }

    pub fn default_radius_m(&self) -> f64 {
        self.default_radius_m
    }

    pub fn default_dwell_time_ms(&self) -> u64 {
        self.default_dwell_time_ms
    }

    pub fn default_approach_distance_m(&self) -> f64 {
        self.default_approach_distance_m
    }

    pub fn default_cooldown_ms(&self) -> u64 {
        self.default_cooldown_ms
    }

    pub fn adaptive_accuracy_factor(&self) -> f64 {
        self.adaptive_accuracy_factor
    }

    pub fn adaptive_smoothing(&self) -> f64 {
        self.adaptive_smoothing
    }

    pub fn min_radius_m(&self) -> f64 {
        self.min_radius_m
    }

    pub fn max_radius_m(&self) -> f64 {
        self.max_radius_m
    }

    pub fn travel_min_samples(&self) -> usize {
        self.travel_min_samples
    }

    pub fn travel_default_speed_mps(&self) -> f64 {
        self.travel_default_speed_mps
    }

    pub fn home_location(&self) -> LatLng {
        self.home_location
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}
