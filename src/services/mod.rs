//! Services - engine logic and state management
//!
//! This module contains the core engine services:
//! - `engine` - Scheduler and public facade (tick loop, lifecycle)
//! - `evaluator` - Per-tick membership scan and event state machine
//! - `geofence_store` - Configured zones, settings and statistics
//! - `location_tracker` - Per-user current location and capped history
//! - `dispatcher` - Async action worker for configured side effects
//! - `travel` - Travel-pattern analysis and ETA prediction

pub mod dispatcher;
pub mod engine;
pub mod evaluator;
pub mod geofence_store;
pub mod location_tracker;
pub mod travel;

// Re-export commonly used types
pub use dispatcher::{create_action_worker, ActionJob, ActionWorker};
pub use engine::GeofenceEngine;
pub use evaluator::MembershipEvaluator;
pub use geofence_store::GeofenceStore;
pub use location_tracker::LocationTracker;
pub use travel::TravelPatternAnalyzer;
