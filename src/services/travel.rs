//! Travel pattern analysis - per-user average speed and ETA prediction
//!
//! Patterns are recomputed whenever enough history exists for a user and
//! persisted as a list of (user, pattern) pairs. Route identification is
//! a placeholder for now.

use crate::domain::geofence::{Eta, TravelPattern};
use crate::domain::geodesy;
use crate::domain::types::{LocationSample, UserId};
use crate::infra::config::Config;
use crate::io::settings::{SettingsStore, KEY_TRAVEL_PATTERNS};
use anyhow::Context;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct TravelPatternAnalyzer {
    settings: Arc<dyn SettingsStore>,
    patterns: RwLock<FxHashMap<UserId, TravelPattern>>,
    min_samples: usize,
    default_speed_mps: f64,
}

impl TravelPatternAnalyzer {
    pub fn new(settings: Arc<dyn SettingsStore>, config: &Config) -> Self {
        Self {
            settings,
            patterns: RwLock::new(FxHashMap::default()),
            min_samples: config.travel_min_samples().max(2),
            default_speed_mps: config.travel_default_speed_mps(),
        }
    }

    /// Load the persisted pattern table; returns the number of patterns
    pub fn load(&self) -> anyhow::Result<usize> {
        let Some(value) = self.settings.get(KEY_TRAVEL_PATTERNS)? else {
            return Ok(0);
        };

        let pairs: Vec<(UserId, TravelPattern)> =
            serde_json::from_value(value).context("Failed to parse persisted travel patterns")?;
        let count = pairs.len();
        *self.patterns.write() = pairs.into_iter().collect();
        debug!(patterns = %count, "travel_patterns_loaded");
        Ok(count)
    }

    /// Persist the full pattern table as (user, pattern) pairs
    pub fn persist(&self) -> anyhow::Result<()> {
        let mut pairs: Vec<(UserId, TravelPattern)> =
            self.patterns.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        pairs.sort_by(|a, b| a.0 .0.cmp(&b.0 .0));
        self.settings.set(KEY_TRAVEL_PATTERNS, serde_json::to_value(pairs)?)
    }

    /// Recompute a user's pattern from location history
    ///
    /// Silently skips when fewer than the minimum samples exist.
    pub fn analyze(&self, user_id: &UserId, history: &[LocationSample]) {
        let samples: Vec<&LocationSample> =
            history.iter().filter(|s| &s.user_id == user_id).collect();
        if samples.len() < self.min_samples {
            return;
        }

        let speeds: Vec<f64> = samples
            .windows(2)
            .map(|pair| geodesy::speed_mps(Some(pair[0]), pair[1]))
            .collect();
        let average = speeds.iter().sum::<f64>() / speeds.len() as f64;

        debug!(user = %user_id, average_speed_mps = %average, "travel_pattern_updated");
        self.patterns
            .write()
            .insert(user_id.clone(), TravelPattern { average_speed_mps: average, routes: Vec::new() });

        if let Err(e) = self.persist() {
            warn!(error = %e, "travel_patterns_persist_failed");
        }
    }

    pub fn pattern(&self, user_id: &UserId) -> Option<TravelPattern> {
        self.patterns.read().get(user_id).cloned()
    }

    /// Predict arrival time over a distance
    ///
    /// Speed fallback chain: explicit `speed_mps` if non-zero, else the
    /// user's stored average, else the configured default.
    pub fn predict_arrival_time(&self, user_id: &UserId, distance_m: f64, speed_mps: f64) -> Eta {
        let effective = if speed_mps > 0.0 {
            speed_mps
        } else {
            self.patterns
                .read()
                .get(user_id)
                .map(|p| p.average_speed_mps)
                .filter(|&v| v > 0.0)
                .unwrap_or(self.default_speed_mps)
        };
        Eta::from_seconds(distance_m / effective)
    }
}
