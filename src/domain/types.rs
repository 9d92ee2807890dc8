//! Shared types for the geofencing engine

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Newtype wrapper for user identifiers to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_string())
    }
}

/// Newtype wrapper for geofence identifiers to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeofenceId(pub String);

impl std::fmt::Display for GeofenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GeofenceId {
    fn from(s: &str) -> Self {
        GeofenceId(s.to_string())
    }
}

/// A geographic coordinate in decimal degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLng {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// A single timestamped location report for a user
///
/// Also serves as the per-user "current" snapshot: the latest sample is
/// the previous point for the next speed computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSample {
    pub user_id: UserId,
    pub location: LatLng,
    /// Reported GPS accuracy in meters, when the source provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Instantaneous speed in m/s, derived from the previous sample
    #[serde(default)]
    pub speed: f64,
    /// Epoch milliseconds
    pub timestamp: u64,
}

/// Value-type key for per-(user, zone) membership state
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey {
    pub user_id: UserId,
    pub geofence_id: GeofenceId,
}

impl PairKey {
    pub fn new(user_id: UserId, geofence_id: GeofenceId) -> Self {
        Self { user_id, geofence_id }
    }
}

/// Membership state machine for a (user, zone) pair
///
/// Transitions:
/// - `Outside` -> `Inside` on containment (enter event)
/// - `Outside` -> `ApproachingNotified` when approach actions fire
/// - `ApproachingNotified` -> `Inside` on containment (enter event)
/// - `ApproachingNotified` -> `Outside` when leaving the approach radius
/// - `Inside` -> `InsideDwelled` when dwell actions fire
/// - `Inside` / `InsideDwelled` -> `Outside` on exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    Outside,
    ApproachingNotified,
    Inside,
    InsideDwelled,
}

impl PairState {
    /// Whether this state counts as currently inside the zone
    #[inline]
    pub fn is_inside(&self) -> bool {
        matches!(self, PairState::Inside | PairState::InsideDwelled)
    }
}

/// Lifecycle event kinds emitted by the membership evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeofenceEventKind {
    Enter,
    Exit,
    Dwell,
    Approach,
}

impl GeofenceEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeofenceEventKind::Enter => "enter",
            GeofenceEventKind::Exit => "exit",
            GeofenceEventKind::Dwell => "dwell",
            GeofenceEventKind::Approach => "approach",
        }
    }

    /// Platform flow card fired when this event dispatches
    pub fn trigger_card(&self) -> &'static str {
        match self {
            GeofenceEventKind::Enter => "geofence_entered",
            GeofenceEventKind::Exit => "geofence_exited",
            GeofenceEventKind::Dwell => "geofence_dwell",
            GeofenceEventKind::Approach => "geofence_approach",
        }
    }
}

/// A configured side effect, dispatched when a zone event fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Scene {
        scene_id: String,
    },
    Automation {
        automation_id: String,
    },
    Notification {
        message: String,
    },
    Device {
        device_id: String,
        capability: String,
        value: serde_json::Value,
    },
}

/// Ordered action list for one event kind (usually zero or one entry)
pub type ActionList = SmallVec<[Action; 2]>;

/// Display name as an ordered list of locale/text pairs
///
/// Lookup prefers the requested locale and falls back to the first entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocaleText(pub Vec<LocaleEntry>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocaleEntry {
    pub locale: String,
    pub text: String,
}

impl LocaleText {
    pub fn single(locale: &str, text: &str) -> Self {
        Self(vec![LocaleEntry { locale: locale.to_string(), text: text.to_string() }])
    }

    pub fn push(&mut self, locale: &str, text: &str) {
        self.0.push(LocaleEntry { locale: locale.to_string(), text: text.to_string() });
    }

    /// Resolve the display text for a preferred locale, falling back to
    /// the first configured entry
    pub fn display(&self, preferred: &str) -> &str {
        self.0
            .iter()
            .find(|e| e.locale == preferred)
            .or_else(|| self.0.first())
            .map(|e| e.text.as_str())
            .unwrap_or("")
    }
}
