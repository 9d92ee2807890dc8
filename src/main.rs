//! Geofence engine - standalone location-based automation daemon
//!
//! Module structure:
//! - `domain/` - Core types (geofences, samples, geodesy)
//! - `io/` - External seams (settings persistence, platform collaborators)
//! - `services/` - Business logic (store, tracker, evaluator, dispatcher, engine)
//! - `infra/` - Infrastructure (config, metrics)

use clap::Parser;
use geofence_engine::infra::{Config, Metrics};
use geofence_engine::io::collaborators::logging_collaborators;
use geofence_engine::io::settings::JsonFileStore;
use geofence_engine::services::GeofenceEngine;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Geofence engine - location-based automation daemon
#[derive(Parser, Debug)]
#[command(name = "geofence-engine", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("geofence-engine starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        tick_interval_secs = %config.tick_interval_secs(),
        users = ?config.users(),
        storage_file = %config.storage_file(),
        preferred_locale = %config.preferred_locale(),
        "config_loaded"
    );

    // Persistence must be usable before anything starts
    let settings = Arc::new(JsonFileStore::open(config.storage_file())?);
    let metrics = Arc::new(Metrics::new());

    // Standalone mode: collaborators log their calls instead of driving a
    // real platform, with the configured home position as the location source
    let collaborators = logging_collaborators(config.home_location());

    let metrics_interval = config.metrics_interval_secs();
    let (engine, worker) = GeofenceEngine::new(config, settings, collaborators, metrics.clone());

    tokio::spawn(worker.run());

    engine.initialize().await?;
    engine.start();

    // Periodic metrics reporter (lock-free reads with full summary)
    let metrics_clone = metrics.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(metrics_interval.max(1)));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");

    engine.destroy().await;

    info!("geofence-engine shutdown complete");
    Ok(())
}
