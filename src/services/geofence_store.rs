//! Geofence store - owns the configured zones and their statistics
//!
//! Zones are persisted as one JSON table keyed by id; the full table is
//! loaded on startup and rewritten on every save. The store never deletes
//! zones itself; deletion is an external management operation.

use crate::domain::geofence::{generate_geofence_id, Geofence, GeofenceConfig};
use crate::domain::types::{GeofenceId, LatLng, LocaleText};
use crate::infra::config::Config;
use crate::io::settings::{SettingsStore, KEY_GEOFENCES};
use anyhow::Context;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Defaults applied to zones created without explicit settings
#[derive(Debug, Clone)]
struct ZoneDefaults {
    radius_m: f64,
    dwell_time_ms: u64,
    approach_distance_m: f64,
    cooldown_ms: u64,
}

/// Owns the set of configured zones and persists them through the
/// settings store
pub struct GeofenceStore {
    settings: Arc<dyn SettingsStore>,
    zones: RwLock<FxHashMap<GeofenceId, Geofence>>,
    defaults: ZoneDefaults,
}

impl GeofenceStore {
    pub fn new(settings: Arc<dyn SettingsStore>, config: &Config) -> Self {
        Self {
            settings,
            zones: RwLock::new(FxHashMap::default()),
            defaults: ZoneDefaults {
                radius_m: config.default_radius_m(),
                dwell_time_ms: config.default_dwell_time_ms(),
                approach_distance_m: config.default_approach_distance_m(),
                cooldown_ms: config.default_cooldown_ms(),
            },
        }
    }

    /// Load the persisted zone table; returns the number of zones loaded
    pub fn load(&self) -> anyhow::Result<usize> {
        let Some(value) = self.settings.get(KEY_GEOFENCES)? else {
            return Ok(0);
        };

        let table: FxHashMap<GeofenceId, Geofence> =
            serde_json::from_value(value).context("Failed to parse persisted geofence table")?;
        let count = table.len();
        *self.zones.write() = table;
        debug!(zones = %count, "geofences_loaded");
        Ok(count)
    }

    /// Persist the full zone table
    pub fn save(&self) -> anyhow::Result<()> {
        let value = serde_json::to_value(&*self.zones.read())?;
        self.settings.set(KEY_GEOFENCES, value)
    }

    /// Create a zone from a config, applying defaults and persisting
    pub fn create(&self, config: GeofenceConfig) -> anyhow::Result<Geofence> {
        let id = match config.id {
            Some(id) => GeofenceId(id),
            None => generate_geofence_id(),
        };

        let settings = config.settings.unwrap_or(crate::domain::geofence::GeofenceSettings {
            dwell_time_ms: self.defaults.dwell_time_ms,
            approach_distance_m: self.defaults.approach_distance_m,
            cooldown_ms: self.defaults.cooldown_ms,
            require_confirm: false,
        });

        let fence = Geofence {
            id: id.clone(),
            name: config.name,
            location: config.location,
            radius: config.radius.unwrap_or(self.defaults.radius_m),
            enabled: config.enabled.unwrap_or(true),
            adaptive: config.adaptive.unwrap_or(false),
            users: config.users.unwrap_or_else(|| vec!["all".to_string()]),
            schedule: config.schedule,
            conditions: config.conditions,
            actions: config.actions,
            settings,
            statistics: Default::default(),
        };

        self.zones.write().insert(id.clone(), fence.clone());
        self.save()?;

        info!(
            geofence = %id,
            name = %fence.name.display("en"),
            radius_m = %fence.radius,
            adaptive = %fence.adaptive,
            "geofence_created"
        );
        Ok(fence)
    }

    /// Synthesize the default "home" zone when no zones are persisted
    pub fn ensure_default_zone(&self, home: LatLng) -> anyhow::Result<()> {
        if !self.is_empty() {
            return Ok(());
        }

        info!(
            latitude = %home.latitude,
            longitude = %home.longitude,
            "synthesizing_home_geofence"
        );
        self.create(GeofenceConfig {
            id: Some("home".to_string()),
            name: LocaleText::single("en", "home"),
            location: home,
            ..Default::default()
        })?;
        Ok(())
    }

    pub fn get(&self, id: &GeofenceId) -> Option<Geofence> {
        self.zones.read().get(id).cloned()
    }

    /// All zones, ordered by id for deterministic output
    pub fn list(&self) -> Vec<Geofence> {
        let mut zones: Vec<Geofence> = self.zones.read().values().cloned().collect();
        zones.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        zones
    }

    pub fn len(&self) -> usize {
        self.zones.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.read().is_empty()
    }

    /// Run a closure with mutable access to the zone table
    ///
    /// Used by the evaluation pass, which mutates statistics and adaptive
    /// radii in place. The write lock is held for the duration of the
    /// closure; callers must not block inside it.
    pub fn with_zones_mut<R>(&self, f: impl FnOnce(&mut FxHashMap<GeofenceId, Geofence>) -> R) -> R {
        f(&mut self.zones.write())
    }
}
