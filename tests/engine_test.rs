//! End-to-end engine tests: full enter / dwell / exit lifecycle through
//! the public facade, with recording collaborators in place of a platform

use async_trait::async_trait;
use geofence_engine::domain::geofence::{GeofenceActions, GeofenceConfig, GeofenceSettings};
use geofence_engine::domain::types::{Action, LatLng, LocaleText, UserId};
use geofence_engine::infra::{Config, Metrics};
use geofence_engine::io::collaborators::{
    AutomationService, Collaborators, DeviceRegistry, FixedLocationProvider, NotificationService,
    SceneService, TriggerSink,
};
use geofence_engine::io::settings::JsonFileStore;
use geofence_engine::services::GeofenceEngine;
use parking_lot::Mutex;
use serde_json::Value;
use smallvec::smallvec;
use std::sync::Arc;

const HOME: LatLng = LatLng { latitude: 59.3293, longitude: 18.0686 };
const AWAY: LatLng = LatLng { latitude: 59.4293, longitude: 18.0686 };

/// Records every collaborator call in order
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
}

impl Recorder {
    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SceneService for Recorder {
    async fn activate(&self, scene_id: &str) -> anyhow::Result<()> {
        self.record(format!("scene:{scene_id}"));
        Ok(())
    }
}

#[async_trait]
impl AutomationService for Recorder {
    async fn execute(&self, automation_id: &str) -> anyhow::Result<()> {
        self.record(format!("automation:{automation_id}"));
        Ok(())
    }

    async fn evaluate_condition(&self, _condition: &Value) -> anyhow::Result<bool> {
        Ok(true)
    }
}

#[async_trait]
impl NotificationService for Recorder {
    async fn create(&self, excerpt: &str) -> anyhow::Result<()> {
        self.record(format!("notify:{excerpt}"));
        Ok(())
    }
}

#[async_trait]
impl DeviceRegistry for Recorder {
    async fn set_capability(
        &self,
        device_id: &str,
        capability: &str,
        value: &Value,
    ) -> anyhow::Result<()> {
        self.record(format!("device:{device_id}:{capability}={value}"));
        Ok(())
    }
}

#[async_trait]
impl TriggerSink for Recorder {
    async fn trigger(&self, card: &str, payload: Value) -> anyhow::Result<()> {
        self.record(format!(
            "trigger:{card}:{}:{}",
            payload["zone"].as_str().unwrap_or(""),
            payload["user"].as_str().unwrap_or(""),
        ));
        Ok(())
    }
}

struct Fixture {
    engine: Arc<GeofenceEngine>,
    recorder: Arc<Recorder>,
    worker_handle: tokio::task::JoinHandle<()>,
    #[allow(dead_code)]
    dir: tempfile::TempDir,
}

impl Fixture {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(JsonFileStore::open(dir.path().join("store.json")).unwrap());
        let recorder = Arc::new(Recorder::default());
        let collaborators = Collaborators {
            location: Arc::new(FixedLocationProvider::new(HOME)),
            scenes: recorder.clone(),
            automations: Some(recorder.clone()),
            notifications: recorder.clone(),
            devices: recorder.clone(),
            triggers: recorder.clone(),
        };

        let (engine, worker) = GeofenceEngine::new(
            Config::default(),
            settings,
            collaborators,
            Arc::new(Metrics::new()),
        );
        let worker_handle = tokio::spawn(worker.run());
        engine.initialize().await.unwrap();

        Fixture { engine, recorder, worker_handle, dir }
    }

    /// Drop the engine so the job channel closes, then wait for the worker
    /// to drain
    async fn drain(self) -> Vec<String> {
        drop(self.engine);
        self.worker_handle.await.unwrap();
        self.recorder.calls()
    }
}

fn office_zone() -> GeofenceConfig {
    GeofenceConfig {
        id: Some("office".to_string()),
        name: LocaleText::single("en", "Office"),
        location: LatLng::new(40.7128, -74.0060),
        radius: Some(100.0),
        actions: GeofenceActions {
            on_enter: smallvec![Action::Scene { scene_id: "work-mode".to_string() }],
            on_exit: smallvec![Action::Notification { message: "left the office".to_string() }],
            on_dwell: smallvec![Action::Automation { automation_id: "deep-work".to_string() }],
            ..Default::default()
        },
        settings: Some(GeofenceSettings {
            dwell_time_ms: 60_000,
            approach_distance_m: 500.0,
            cooldown_ms: 1_000,
            require_confirm: false,
        }),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_enter_dwell_exit_lifecycle() {
    let fixture = Fixture::start().await;
    let engine = &fixture.engine;
    let zone = engine.create_geofence(office_zone()).unwrap();
    let user = UserId::from("owner");

    // Enter at t=10s
    engine.ingest_sample(&user, zone.location, None, 10_000);
    engine.check_geofences_at(10_000).await;

    // Still inside past the dwell threshold at t=80s
    engine.ingest_sample(&user, zone.location, None, 80_000);
    engine.check_geofences_at(80_000).await;

    // Gone at t=100s
    engine.ingest_sample(&user, AWAY, None, 100_000);
    engine.check_geofences_at(100_000).await;

    let stats = engine.geofence(&zone.id).unwrap().statistics;
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.exits, 1);
    assert_eq!(stats.last_entered, Some(10_000));
    assert_eq!(stats.last_exited, Some(100_000));
    assert_eq!(stats.average_dwell_ms, 90_000.0);

    let calls = fixture.drain().await;
    assert_eq!(
        calls,
        vec![
            "trigger:geofence_entered:Office:owner".to_string(),
            "scene:work-mode".to_string(),
            "trigger:geofence_dwell:Office:owner".to_string(),
            "automation:deep-work".to_string(),
            "trigger:geofence_exited:Office:owner".to_string(),
            "notify:left the office".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_repeated_checks_inside_fire_once() {
    let fixture = Fixture::start().await;
    let engine = &fixture.engine;
    let zone = engine.create_geofence(office_zone()).unwrap();
    let user = UserId::from("owner");

    engine.ingest_sample(&user, zone.location, None, 1_000);
    engine.check_geofences_at(1_000).await;
    engine.check_geofences_at(2_000).await;
    engine.check_geofences_at(3_000).await;

    assert_eq!(engine.geofence(&zone.id).unwrap().statistics.entries, 1);

    let calls = fixture.drain().await;
    let enters = calls.iter().filter(|c| c.starts_with("trigger:geofence_entered:Office")).count();
    assert_eq!(enters, 1);
}

#[tokio::test]
async fn test_provider_backed_update_enters_home_zone() {
    let fixture = Fixture::start().await;
    let engine = &fixture.engine;
    let user = UserId::from("owner");

    // No explicit position: the fixed provider reports HOME, which is
    // inside the seeded default zone
    let sample = engine.update_user_location(&user, None).await.unwrap();
    assert_eq!(sample.location, HOME);

    engine.check_geofences().await;
    let home = &engine.geofences()[0];
    assert_eq!(home.statistics.entries, 1);
    assert_eq!(engine.last_known_location(&user).unwrap().location, HOME);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let user = UserId::from("owner");

    {
        let settings = Arc::new(JsonFileStore::open(&path).unwrap());
        let recorder = Arc::new(Recorder::default());
        let collaborators = Collaborators {
            location: Arc::new(FixedLocationProvider::new(HOME)),
            scenes: recorder.clone(),
            automations: Some(recorder.clone()),
            notifications: recorder.clone(),
            devices: recorder.clone(),
            triggers: recorder,
        };
        let (engine, worker) = GeofenceEngine::new(
            Config::default(),
            settings,
            collaborators,
            Arc::new(Metrics::new()),
        );
        let worker_handle = tokio::spawn(worker.run());
        engine.initialize().await.unwrap();

        engine.create_geofence(office_zone()).unwrap();
        engine.ingest_sample(&user, HOME, None, 1_000);
        engine.check_geofences_at(1_000).await;
        engine.destroy().await;

        drop(engine);
        worker_handle.await.unwrap();
    }

    // A fresh engine over the same store sees zones, statistics and history
    let settings = Arc::new(JsonFileStore::open(&path).unwrap());
    let recorder = Arc::new(Recorder::default());
    let collaborators = Collaborators {
        location: Arc::new(FixedLocationProvider::new(HOME)),
        scenes: recorder.clone(),
        automations: Some(recorder.clone()),
        notifications: recorder.clone(),
        devices: recorder.clone(),
        triggers: recorder,
    };
    let (engine, _worker) = GeofenceEngine::new(
        Config::default(),
        settings,
        collaborators,
        Arc::new(Metrics::new()),
    );
    engine.initialize().await.unwrap();

    assert_eq!(engine.geofences().len(), 2);
    let home = engine
        .geofences()
        .into_iter()
        .find(|z| z.id.0 == "home")
        .expect("seeded home zone persisted");
    assert_eq!(home.statistics.entries, 1);
    assert_eq!(engine.last_known_location(&user).unwrap().timestamp, 1_000);
}
