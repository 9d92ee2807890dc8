//! Action dispatch worker - executes configured actions off the hot path
//!
//! This worker decouples collaborator calls from the evaluation tick so
//! that slow scene/notification/device round-trips never block membership
//! evaluation. The engine enqueues jobs via an mpsc channel; the worker
//! fires the platform trigger and each configured action, isolating
//! per-action failures.

use crate::domain::types::{Action, ActionList, GeofenceEventKind, GeofenceId, UserId};
use crate::infra::metrics::Metrics;
use crate::io::collaborators::Collaborators;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A dispatch job produced by an evaluation pass
#[derive(Debug)]
pub struct ActionJob {
    pub job_id: Uuid,
    pub kind: GeofenceEventKind,
    pub geofence_id: GeofenceId,
    /// Display name resolved for the configured locale
    pub zone_name: String,
    pub user_id: UserId,
    pub actions: ActionList,
    /// Event-specific trigger payload fields (distance, eta)
    pub extras: serde_json::Map<String, serde_json::Value>,
    /// When the job was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
}

impl ActionJob {
    pub fn new(
        kind: GeofenceEventKind,
        geofence_id: GeofenceId,
        zone_name: String,
        user_id: UserId,
        actions: ActionList,
        extras: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            job_id: Uuid::now_v7(),
            kind,
            geofence_id,
            zone_name,
            user_id,
            actions,
            extras,
            enqueued_at: Instant::now(),
        }
    }
}

/// Worker that processes action jobs asynchronously
pub struct ActionWorker {
    collaborators: Collaborators,
    job_rx: mpsc::Receiver<ActionJob>,
    metrics: Arc<Metrics>,
}

impl ActionWorker {
    pub fn new(
        collaborators: Collaborators,
        job_rx: mpsc::Receiver<ActionJob>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { collaborators, job_rx, metrics }
    }

    /// Run the worker, processing jobs until the channel closes
    pub async fn run(mut self) {
        info!("action_worker_started");

        while let Some(job) = self.job_rx.recv().await {
            let queue_delay_us = job.enqueued_at.elapsed().as_micros() as u64;
            if queue_delay_us > 1_000_000 {
                warn!(
                    job_id = %job.job_id,
                    queue_delay_us = %queue_delay_us,
                    "action_queue_delay_high"
                );
            }
            self.handle(job).await;
        }

        info!("action_worker_stopped");
    }

    async fn handle(&self, job: ActionJob) {
        debug!(
            job_id = %job.job_id,
            kind = %job.kind.as_str(),
            geofence = %job.geofence_id,
            user = %job.user_id,
            actions = %job.actions.len(),
            "action_job_started"
        );

        // The platform trigger always fires, even with no configured actions
        let mut payload = serde_json::Map::new();
        payload.insert("zone".to_string(), serde_json::json!(job.zone_name));
        payload.insert("user".to_string(), serde_json::json!(job.user_id.0));
        payload.extend(job.extras.clone());

        if let Err(err) = self
            .collaborators
            .triggers
            .trigger(job.kind.trigger_card(), serde_json::Value::Object(payload))
            .await
        {
            error!(
                job_id = %job.job_id,
                geofence = %job.geofence_id,
                error = %err,
                "trigger_dispatch_failed"
            );
            self.metrics.record_action_failure();
        }

        // One failing action never blocks the rest of the list
        for action in &job.actions {
            match self.execute(action).await {
                Ok(()) => self.metrics.record_action_dispatched(),
                Err(err) => {
                    error!(
                        job_id = %job.job_id,
                        geofence = %job.geofence_id,
                        error = %err,
                        "action_dispatch_failed"
                    );
                    self.metrics.record_action_failure();
                }
            }
        }
    }

    async fn execute(&self, action: &Action) -> anyhow::Result<()> {
        match action {
            Action::Scene { scene_id } => self.collaborators.scenes.activate(scene_id).await,
            Action::Automation { automation_id } => match &self.collaborators.automations {
                Some(automations) => automations.execute(automation_id).await,
                None => {
                    warn!(automation_id = %automation_id, "automation_service_missing");
                    Ok(())
                }
            },
            Action::Notification { message } => {
                self.collaborators.notifications.create(message).await
            }
            Action::Device { device_id, capability, value } => {
                self.collaborators.devices.set_capability(device_id, capability, value).await
            }
        }
    }
}

/// Create an action job channel and worker
///
/// Returns the sender (for the engine) and the worker (to be spawned)
pub fn create_action_worker(
    collaborators: Collaborators,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (mpsc::Sender<ActionJob>, ActionWorker) {
    let (job_tx, job_rx) = mpsc::channel(buffer_size);
    let worker = ActionWorker::new(collaborators, job_rx, metrics);
    (job_tx, worker)
}
