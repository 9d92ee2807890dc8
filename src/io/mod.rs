//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `settings` - Key-value settings store for persisted engine state
//! - `collaborators` - Platform services the engine calls by id
//!   (location provider, scenes, automations, notifications, devices,
//!   flow-card triggers)

pub mod collaborators;
pub mod settings;

// Re-export commonly used types
pub use collaborators::{
    AutomationService, Collaborators, DeviceRegistry, LocationProvider, NotificationService,
    SceneService, TriggerSink,
};
pub use settings::{
    JsonFileStore, SettingsStore, KEY_GEOFENCES, KEY_LOCATION_HISTORY, KEY_TRAVEL_PATTERNS,
};
