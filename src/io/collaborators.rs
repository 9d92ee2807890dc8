//! Platform collaborator interfaces
//!
//! The engine drives scenes, automations, notifications, devices and
//! flow-card triggers through these seams; their internals live elsewhere.
//! All calls are fire-and-forget from the engine's perspective; failures
//! are logged by the dispatcher and never abort an evaluation pass.

use crate::domain::types::LatLng;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Source of the platform's current location
///
/// May fail (GPS/radio unavailability); callers treat failures as
/// "position unknown", not as errors.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_location(&self) -> anyhow::Result<LatLng>;
}

#[async_trait]
pub trait SceneService: Send + Sync {
    async fn activate(&self, scene_id: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait AutomationService: Send + Sync {
    async fn execute(&self, automation_id: &str) -> anyhow::Result<()>;

    /// Evaluate an opaque condition descriptor
    async fn evaluate_condition(&self, condition: &Value) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn create(&self, excerpt: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn set_capability(
        &self,
        device_id: &str,
        capability: &str,
        value: &Value,
    ) -> anyhow::Result<()>;
}

/// Platform trigger/flow card invocation with an arbitrary payload
#[async_trait]
pub trait TriggerSink: Send + Sync {
    async fn trigger(&self, card: &str, payload: Value) -> anyhow::Result<()>;
}

/// Bundle of collaborator handles wired into the engine
///
/// `automations` is optional: without it, conditions are treated as
/// satisfied and automation actions are skipped with a warning.
#[derive(Clone)]
pub struct Collaborators {
    pub location: Arc<dyn LocationProvider>,
    pub scenes: Arc<dyn SceneService>,
    pub automations: Option<Arc<dyn AutomationService>>,
    pub notifications: Arc<dyn NotificationService>,
    pub devices: Arc<dyn DeviceRegistry>,
    pub triggers: Arc<dyn TriggerSink>,
}

/// Location provider that always reports a fixed position
///
/// Used by the standalone binary, where no platform location source exists.
pub struct FixedLocationProvider {
    location: LatLng,
}

impl FixedLocationProvider {
    pub fn new(location: LatLng) -> Self {
        Self { location }
    }
}

#[async_trait]
impl LocationProvider for FixedLocationProvider {
    async fn current_location(&self) -> anyhow::Result<LatLng> {
        Ok(self.location)
    }
}

/// Collaborator that logs every call instead of performing it
///
/// Lets the engine run standalone with full event visibility.
pub struct LoggingCollaborator;

#[async_trait]
impl SceneService for LoggingCollaborator {
    async fn activate(&self, scene_id: &str) -> anyhow::Result<()> {
        info!(scene_id = %scene_id, "scene_activated");
        Ok(())
    }
}

#[async_trait]
impl AutomationService for LoggingCollaborator {
    async fn execute(&self, automation_id: &str) -> anyhow::Result<()> {
        info!(automation_id = %automation_id, "automation_executed");
        Ok(())
    }

    async fn evaluate_condition(&self, condition: &Value) -> anyhow::Result<bool> {
        info!(condition = %condition, "condition_evaluated");
        Ok(true)
    }
}

#[async_trait]
impl NotificationService for LoggingCollaborator {
    async fn create(&self, excerpt: &str) -> anyhow::Result<()> {
        info!(excerpt = %excerpt, "notification_created");
        Ok(())
    }
}

#[async_trait]
impl DeviceRegistry for LoggingCollaborator {
    async fn set_capability(
        &self,
        device_id: &str,
        capability: &str,
        value: &Value,
    ) -> anyhow::Result<()> {
        info!(device_id = %device_id, capability = %capability, value = %value, "capability_set");
        Ok(())
    }
}

#[async_trait]
impl TriggerSink for LoggingCollaborator {
    async fn trigger(&self, card: &str, payload: Value) -> anyhow::Result<()> {
        info!(card = %card, payload = %payload, "trigger_fired");
        Ok(())
    }
}

/// Build a log-only collaborator bundle around a fixed location
pub fn logging_collaborators(location: LatLng) -> Collaborators {
    let shared = Arc::new(LoggingCollaborator);
    Collaborators {
        location: Arc::new(FixedLocationProvider::new(location)),
        scenes: shared.clone(),
        automations: Some(shared.clone()),
        notifications: shared.clone(),
        devices: shared.clone(),
        triggers: shared,
    }
}
