//! Geofence data model: zone configuration, per-event actions, schedule
//! gating, accumulated statistics and travel patterns

use crate::domain::geodesy::format_duration;
use crate::domain::types::{
    epoch_ms, ActionList, GeofenceEventKind, GeofenceId, LatLng, LocaleText, UserId,
};
use chrono::{Datelike, Local, Timelike};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel user entry meaning "applies to every tracked user"
pub const ALL_USERS: &str = "all";

/// Generate a geofence id: `geo_<epoch_ms>_<random suffix>`
pub fn generate_geofence_id() -> GeofenceId {
    let suffix = Uuid::now_v7().simple().to_string();
    GeofenceId(format!("geo_{}_{}", epoch_ms(), &suffix[suffix.len() - 8..]))
}

/// Allowed weekdays and hour-of-day window for a zone
///
/// Weekdays are numbered from Monday = 0. The hour window is half-open:
/// `[start_hour, end_hour)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_hour: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_hour: Option<u32>,
}

impl Schedule {
    /// Whether the schedule allows the given local time
    pub fn allows(&self, now: chrono::DateTime<Local>) -> bool {
        if let Some(days) = &self.days {
            if !days.contains(&now.weekday().num_days_from_monday()) {
                return false;
            }
        }
        match (self.start_hour, self.end_hour) {
            (Some(start), Some(end)) => {
                let hour = now.hour();
                hour >= start && hour < end
            }
            _ => true,
        }
    }
}

/// Per-zone tuning knobs for event generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceSettings {
    /// Continuous presence required before a dwell event (ms)
    #[serde(default = "default_dwell_time_ms")]
    pub dwell_time_ms: u64,
    /// Proximity threshold for approach events (meters)
    #[serde(default = "default_approach_distance_m")]
    pub approach_distance_m: f64,
    /// Minimum elapsed time between two firings of the same event kind (ms)
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default)]
    pub require_confirm: bool,
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

impl Default for GeofenceSettings {
    fn default() -> Self {
        Self {
            dwell_time_ms: default_dwell_time_ms(),
            approach_distance_m: default_approach_distance_m(),
            cooldown_ms: default_cooldown_ms(),
            require_confirm: false,
        }
    }
}

/// Accumulated per-zone statistics
///
/// `entries` and `exits` are monotonically non-decreasing; the average
/// dwell is a running mean recomputed on each exit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeofenceStatistics {
    #[serde(default)]
    pub entries: u64,
    #[serde(default)]
    pub exits: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_entered: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_exited: Option<u64>,
    #[serde(default)]
    pub average_dwell_ms: f64,
}

impl GeofenceStatistics {
    pub fn record_entry(&mut self, now_ms: u64) {
        self.entries += 1;
        self.last_entered = Some(now_ms);
    }

    /// Record an exit, folding the completed stay into the running mean
    /// weighted by the entry count
    pub fn record_exit(&mut self, now_ms: u64) {
        self.exits += 1;
        if let Some(entered) = self.last_entered {
            let dwell_ms = now_ms.saturating_sub(entered) as f64;
            let n = self.entries.max(1) as f64;
            self.average_dwell_ms += (dwell_ms - self.average_dwell_ms) / n;
        }
        self.last_exited = Some(now_ms);
    }

    /// Last firing timestamp for an event kind, if any (cooldown basis)
    pub fn last_fired(&self, kind: GeofenceEventKind) -> Option<u64> {
        match kind {
            GeofenceEventKind::Enter => self.last_entered,
            GeofenceEventKind::Exit => self.last_exited,
            // Dwell and approach are gated by once-per-stay flags, not cooldown
            GeofenceEventKind::Dwell | GeofenceEventKind::Approach => None,
        }
    }
}

/// Action lists keyed by event kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeofenceActions {
    #[serde(default, rename = "onEnter", skip_serializing_if = "ActionList::is_empty")]
    pub on_enter: ActionList,
    #[serde(default, rename = "onExit", skip_serializing_if = "ActionList::is_empty")]
    pub on_exit: ActionList,
    #[serde(default, rename = "onDwell", skip_serializing_if = "ActionList::is_empty")]
    pub on_dwell: ActionList,
    #[serde(default, rename = "onApproach", skip_serializing_if = "ActionList::is_empty")]
    pub on_approach: ActionList,
}

impl GeofenceActions {
    pub fn for_kind(&self, kind: GeofenceEventKind) -> &ActionList {
        match kind {
            GeofenceEventKind::Enter => &self.on_enter,
            GeofenceEventKind::Exit => &self.on_exit,
            GeofenceEventKind::Dwell => &self.on_dwell,
            GeofenceEventKind::Approach => &self.on_approach,
        }
    }
}

/// A named circular zone with configured actions and gating rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    /// Immutable after creation
    pub id: GeofenceId,
    #[serde(default)]
    pub name: LocaleText,
    pub location: LatLng,
    /// Radius in meters; auto-tuned within [50, 500] when adaptive
    pub radius: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub adaptive: bool,
    /// User ids the zone applies to, or the sentinel `"all"`
    #[serde(default = "default_users")]
    pub users: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    /// Opaque condition descriptors evaluated externally
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<serde_json::Value>,
    #[serde(default)]
    pub actions: GeofenceActions,
    #[serde(default)]
    pub settings: GeofenceSettings,
    #[serde(default)]
    pub statistics: GeofenceStatistics,
}

fn default_enabled() -> bool {
    true
}

fn default_users() -> Vec<String> {
    vec![ALL_USERS.to_string()]
}

impl Geofence {
    /// Whether this zone applies to the given user
    pub fn applies_to(&self, user_id: &UserId) -> bool {
        self.users.iter().any(|u| u == ALL_USERS || u == &user_id.0)
    }

    /// Whether the schedule (if any) allows the given local time
    pub fn schedule_allows(&self, now: chrono::DateTime<Local>) -> bool {
        self.schedule.as_ref().map(|s| s.allows(now)).unwrap_or(true)
    }
}

/// Creation request for a zone; unset fields take engine defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeofenceConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: LocaleText,
    pub location: LatLng,
    #[serde(default)]
    pub radius: Option<f64>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub adaptive: Option<bool>,
    #[serde(default)]
    pub users: Option<Vec<String>>,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub conditions: Vec<serde_json::Value>,
    #[serde(default)]
    pub actions: GeofenceActions,
    #[serde(default)]
    pub settings: Option<GeofenceSettings>,
}

/// Derived movement profile for a user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TravelPattern {
    pub average_speed_mps: f64,
    /// Route identification is not implemented yet; kept for persistence
    /// compatibility
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<String>,
}

/// Estimated time of arrival at a zone boundary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Eta {
    pub seconds: f64,
    pub minutes: f64,
    pub formatted: String,
}

impl Eta {
    pub fn from_seconds(seconds: f64) -> Self {
        Self { seconds, minutes: seconds / 60.0, formatted: format_duration(seconds) }
    }
}
