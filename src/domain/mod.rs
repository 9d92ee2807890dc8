//! Domain models - core business types and pure geodesy
//!
//! This module contains the canonical data types used throughout the engine:
//! - `Geofence` - a named circular zone with actions, gating rules and statistics
//! - `LocationSample` - a timestamped position report for a tracked user
//! - `PairKey` / `PairState` - per-(user, zone) membership state machine
//! - `Action` - side effects configured on a zone, dispatched on events
//! - `geodesy` - great-circle distance, speed and duration formatting

pub mod geodesy;
pub mod geofence;
pub mod types;

// Re-export commonly used types
pub use geofence::{Geofence, GeofenceConfig, GeofenceSettings, Schedule, TravelPattern};
pub use types::{
    Action, GeofenceEventKind, GeofenceId, LatLng, LocationSample, PairState, UserId,
};
