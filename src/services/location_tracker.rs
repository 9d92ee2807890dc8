//! Location tracker - per-user current location and capped sample history
//!
//! Owns the latest known location per user and a bounded, time-ordered
//! history of all samples across all users. Provider failures drop the
//! update silently; that is an expected condition, not an error.

use crate::domain::geodesy;
use crate::domain::types::{epoch_ms, LatLng, LocationSample, UserId};
use crate::infra::metrics::Metrics;
use crate::io::collaborators::LocationProvider;
use crate::io::settings::{SettingsStore, KEY_LOCATION_HISTORY};
use anyhow::Context;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Global cap on retained location samples; oldest evicted first
pub const MAX_HISTORY: usize = 1000;

pub struct LocationTracker {
    settings: Arc<dyn SettingsStore>,
    provider: Arc<dyn LocationProvider>,
    metrics: Arc<Metrics>,
    /// Latest sample per user; the "previous" point for speed derivation
    current: RwLock<FxHashMap<UserId, LocationSample>>,
    /// Append-only log across all users, capped at `MAX_HISTORY`
    history: RwLock<Vec<LocationSample>>,
}

impl LocationTracker {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        provider: Arc<dyn LocationProvider>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            settings,
            provider,
            metrics,
            current: RwLock::new(FxHashMap::default()),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Load persisted history and rebuild per-user current snapshots
    pub fn load(&self) -> anyhow::Result<usize> {
        let Some(value) = self.settings.get(KEY_LOCATION_HISTORY)? else {
            return Ok(0);
        };

        let samples: Vec<LocationSample> =
            serde_json::from_value(value).context("Failed to parse persisted location history")?;
        let count = samples.len();

        let mut current = self.current.write();
        for sample in &samples {
            current.insert(sample.user_id.clone(), sample.clone());
        }
        drop(current);

        *self.history.write() = samples;
        debug!(samples = %count, "location_history_loaded");
        Ok(count)
    }

    /// Persist the full history list
    pub fn persist(&self) -> anyhow::Result<()> {
        let value = serde_json::to_value(&*self.history.read())?;
        self.settings.set(KEY_LOCATION_HISTORY, value)
    }

    /// Update a user's location, querying the provider when no explicit
    /// position is given
    ///
    /// Returns the recorded sample, or `None` when the provider was
    /// unavailable (the update is dropped without mutating state).
    pub async fn update_user_location(
        &self,
        user_id: &UserId,
        location: Option<LatLng>,
    ) -> Option<LocationSample> {
        let location = match location {
            Some(l) => l,
            None => match self.provider.current_location().await {
                Ok(l) => l,
                Err(e) => {
                    self.metrics.record_provider_failure();
                    debug!(user = %user_id, error = %e, "location_provider_unavailable");
                    return None;
                }
            },
        };

        Some(self.record_sample(user_id, location, None, epoch_ms()))
    }

    /// Record an explicit sample with a caller-supplied timestamp and
    /// optional accuracy
    pub fn record_sample(
        &self,
        user_id: &UserId,
        location: LatLng,
        accuracy: Option<f64>,
        timestamp: u64,
    ) -> LocationSample {
        let mut sample = LocationSample {
            user_id: user_id.clone(),
            location,
            accuracy,
            speed: 0.0,
            timestamp,
        };
        sample.speed = geodesy::speed_mps(self.current.read().get(user_id), &sample);

        self.current.write().insert(user_id.clone(), sample.clone());

        {
            let mut history = self.history.write();
            history.push(sample.clone());
            if history.len() > MAX_HISTORY {
                let excess = history.len() - MAX_HISTORY;
                history.drain(..excess);
            }
        }

        self.metrics.record_location_update();
        debug!(
            user = %user_id,
            latitude = %location.latitude,
            longitude = %location.longitude,
            speed_mps = %sample.speed,
            "location_updated"
        );

        if let Err(e) = self.persist() {
            warn!(error = %e, "location_history_persist_failed");
        }

        sample
    }

    /// Latest known sample for a user
    pub fn current(&self, user_id: &UserId) -> Option<LocationSample> {
        self.current.read().get(user_id).cloned()
    }

    /// Snapshot of every user's latest sample
    pub fn current_all(&self) -> FxHashMap<UserId, LocationSample> {
        self.current.read().clone()
    }

    /// Chronological history, optionally filtered to one user
    pub fn history(&self, user_id: Option<&UserId>) -> Vec<LocationSample> {
        let history = self.history.read();
        match user_id {
            Some(id) => history.iter().filter(|s| &s.user_id == id).cloned().collect(),
            None => history.clone(),
        }
    }

    /// User ids with a known current location
    pub fn known_users(&self) -> Vec<UserId> {
        self.current.read().keys().cloned().collect()
    }
}
