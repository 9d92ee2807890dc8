//! Engine loop: periodic evaluation, lifecycle and the public facade
//!
//! The engine owns the store, tracker, travel analyzer and evaluator,
//! runs the periodic tick, and bridges evaluation results to the action
//! worker. A tokio mutex serializes evaluation passes so a slow pass can
//! never overlap the next tick or an on-demand check.

use crate::domain::geofence::{Eta, Geofence, GeofenceConfig, TravelPattern};
use crate::domain::types::{epoch_ms, GeofenceId, LatLng, LocationSample, UserId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::collaborators::Collaborators;
use crate::io::settings::SettingsStore;
use crate::services::dispatcher::{create_action_worker, ActionJob, ActionWorker};
use crate::services::evaluator::{EvalParams, MembershipEvaluator};
use crate::services::geofence_store::GeofenceStore;
use crate::services::location_tracker::LocationTracker;
use crate::services::travel::TravelPatternAnalyzer;
use anyhow::Context;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Backpressure bound for the action queue; a full queue drops jobs with
/// a warning rather than stalling evaluation
const ACTION_QUEUE_DEPTH: usize = 64;

pub struct GeofenceEngine {
    config: Config,
    store: GeofenceStore,
    tracker: LocationTracker,
    travel: TravelPatternAnalyzer,
    evaluator: parking_lot::Mutex<MembershipEvaluator>,
    collaborators: Collaborators,
    metrics: Arc<Metrics>,
    job_tx: mpsc::Sender<ActionJob>,
    /// Serializes evaluation passes: ticks and on-demand checks never overlap
    tick_gate: tokio::sync::Mutex<()>,
    initialized: AtomicBool,
    destroyed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl GeofenceEngine {
    /// Build the engine and its action worker
    ///
    /// The worker is returned unstarted; the caller spawns `worker.run()`.
    pub fn new(
        config: Config,
        settings: Arc<dyn SettingsStore>,
        collaborators: Collaborators,
        metrics: Arc<Metrics>,
    ) -> (Arc<Self>, ActionWorker) {
        let (job_tx, worker) =
            create_action_worker(collaborators.clone(), metrics.clone(), ACTION_QUEUE_DEPTH);
        let (shutdown_tx, _) = watch::channel(false);

        let engine = Arc::new(Self {
            store: GeofenceStore::new(settings.clone(), &config),
            tracker: LocationTracker::new(
                settings.clone(),
                collaborators.location.clone(),
                metrics.clone(),
            ),
            travel: TravelPatternAnalyzer::new(settings, &config),
            evaluator: parking_lot::Mutex::new(MembershipEvaluator::new(EvalParams::from_config(
                &config,
            ))),
            collaborators,
            metrics,
            job_tx,
            tick_gate: tokio::sync::Mutex::new(()),
            initialized: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            shutdown_tx,
            loop_handle: parking_lot::Mutex::new(None),
            config,
        });

        (engine, worker)
    }

    /// Load persisted state and seed the default home zone
    ///
    /// Idempotent: repeated calls after a successful load are no-ops.
    /// Persistence errors propagate; the engine must not start half-loaded.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let zones = self.store.load().context("Failed to load geofence store")?;
        let samples = self.tracker.load().context("Failed to load location history")?;
        let patterns = self.travel.load().context("Failed to load travel patterns")?;

        // Seed the default zone at the platform position, falling back to
        // the configured home coordinates when no position is available
        let home = match self.collaborators.location.current_location().await {
            Ok(location) => location,
            Err(e) => {
                debug!(error = %e, "home_position_unavailable_using_config");
                self.config.home_location()
            }
        };
        self.store.ensure_default_zone(home)?;

        info!(
            zones = %zones,
            samples = %samples,
            patterns = %patterns,
            "engine_initialized"
        );
        Ok(())
    }

    /// Spawn the periodic tick loop
    pub fn start(self: &Arc<Self>) {
        let engine = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let tick_interval = Duration::from_secs(self.config.tick_interval_secs().max(1));

        let handle = tokio::spawn(async move {
            info!(interval_secs = %tick_interval.as_secs(), "engine_started");
            let mut interval = tokio::time::interval(tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First immediate fire is consumed here so the loop waits a
            // full interval before its first evaluation
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        // An in-flight tick always completes before the
                        // loop observes shutdown
                        engine.tick().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("engine_loop_stopped");
        });

        *self.loop_handle.lock() = Some(handle);
    }

    /// One scheduled tick: refresh tracked users, then evaluate
    async fn tick(&self) {
        let _gate = self.tick_gate.lock().await;
        self.metrics.record_tick();

        for user in self.config.users() {
            let user_id = UserId::from(user.as_str());
            if self.tracker.update_user_location(&user_id, None).await.is_some() {
                self.travel.analyze(&user_id, &self.tracker.history(None));
            }
        }

        self.evaluate_pass(epoch_ms()).await;
    }

    /// Evaluate all zones against all known users immediately
    pub async fn check_geofences(&self) {
        self.check_geofences_at(epoch_ms()).await;
    }

    /// Evaluate at an explicit timestamp (milliseconds since the epoch)
    pub async fn check_geofences_at(&self, now_ms: u64) {
        let _gate = self.tick_gate.lock().await;
        self.evaluate_pass(now_ms).await;
    }

    /// Core evaluation: synchronous scan under the zone lock, then
    /// asynchronous condition gating and dispatch without it
    async fn evaluate_pass(&self, now_ms: u64) {
        let users = self.tracker.current_all();
        if users.is_empty() {
            return;
        }
        let history = self.tracker.history(None);

        let pendings = self.store.with_zones_mut(|zones| {
            self.evaluator.lock().evaluate(
                zones,
                &users,
                &history,
                &self.travel,
                now_ms,
                &self.metrics,
            )
        });

        // Statistics and adaptive radii changed even when nothing fired
        if let Err(e) = self.store.save() {
            warn!(error = %e, "geofence_store_persist_failed");
        }

        for pending in pendings {
            if !self.conditions_hold(&pending.conditions).await {
                debug!(
                    geofence = %pending.geofence_id,
                    kind = %pending.kind.as_str(),
                    "dispatch_gated_condition"
                );
                continue;
            }

            let job = ActionJob::new(
                pending.kind,
                pending.geofence_id,
                pending.zone_name,
                pending.user_id,
                pending.actions,
                pending.extras,
            );
            if let Err(e) = self.job_tx.try_send(job) {
                warn!(error = %e, "action_queue_full");
                self.metrics.record_action_failure();
            }
        }
    }

    /// Evaluate a zone's condition descriptors
    ///
    /// No automation service means conditions cannot be checked and are
    /// treated as satisfied; an evaluation error is treated as unsatisfied.
    async fn conditions_hold(&self, conditions: &[serde_json::Value]) -> bool {
        if conditions.is_empty() {
            return true;
        }
        let Some(automations) = &self.collaborators.automations else {
            return true;
        };
        for condition in conditions {
            match automations.evaluate_condition(condition).await {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => {
                    warn!(error = %e, "condition_evaluation_failed");
                    return false;
                }
            }
        }
        true
    }

    /// Update a user's location and refresh their travel pattern
    ///
    /// With `location == None` the platform provider is queried; provider
    /// failure drops the update and returns `None`.
    pub async fn update_user_location(
        &self,
        user_id: &UserId,
        location: Option<LatLng>,
    ) -> Option<LocationSample> {
        let sample = self.tracker.update_user_location(user_id, location).await?;
        self.travel.analyze(user_id, &self.tracker.history(None));
        Some(sample)
    }

    /// Record an explicit sample (caller-supplied timestamp and accuracy)
    pub fn ingest_sample(
        &self,
        user_id: &UserId,
        location: LatLng,
        accuracy: Option<f64>,
        timestamp: u64,
    ) -> LocationSample {
        let sample = self.tracker.record_sample(user_id, location, accuracy, timestamp);
        self.travel.analyze(user_id, &self.tracker.history(None));
        sample
    }

    pub fn create_geofence(&self, config: GeofenceConfig) -> anyhow::Result<Geofence> {
        self.store.create(config)
    }

    pub fn geofence(&self, id: &GeofenceId) -> anyhow::Result<Geofence> {
        self.store.get(id).with_context(|| format!("No geofence with id {id}"))
    }

    pub fn geofences(&self) -> Vec<Geofence> {
        self.store.list()
    }

    pub fn last_known_location(&self, user_id: &UserId) -> Option<LocationSample> {
        self.tracker.current(user_id)
    }

    pub fn travel_pattern(&self, user_id: &UserId) -> Option<TravelPattern> {
        self.travel.pattern(user_id)
    }

    /// Predicted time to cover `distance_m` for a user
    pub fn predict_arrival_time(&self, user_id: &UserId, distance_m: f64, speed_mps: f64) -> Eta {
        self.travel.predict_arrival_time(user_id, distance_m, speed_mps)
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Stop the tick loop and persist all state
    ///
    /// Idempotent; waits for an in-flight tick to complete before the
    /// final persist.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown_tx.send(true);
        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let _gate = self.tick_gate.lock().await;
        if let Err(e) = self.store.save() {
            warn!(error = %e, "geofence_store_persist_failed");
        }
        if let Err(e) = self.tracker.persist() {
            warn!(error = %e, "location_history_persist_failed");
        }
        if let Err(e) = self.travel.persist() {
            warn!(error = %e, "travel_patterns_persist_failed");
        }
        info!("engine_destroyed");
    }
}
