//! OCPP 1.6 Central System server binary.
//!
//! Reads configuration from TOML (`~/.config/csms-service/config.toml`,
//! override with `CSMS_CONFIG`), wires the store, registry, router and
//! scheduler, and serves charge-point WebSocket connections until SIGTERM
//! or Ctrl+C.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use csms_core::application::services::{
    start_reservation_expiry_task, start_session_sweeper, SweeperConfig,
};
use csms_core::application::{OcppRouter, PostTransactionScheduler};
use csms_core::config::{default_config_path, AppConfig};
use csms_core::domain::ChargerStore;
use csms_core::infrastructure::InMemoryStore;
use csms_core::interfaces::ws::OcppServer;
use csms_core::session::SessionRegistry;
use csms_core::shared::ShutdownSignal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Configuration ──────────────────────────────────────
    let config_path = std::env::var("CSMS_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| default_config_path());
    let config = match AppConfig::load(&config_path) {
        Ok(cfg) => {
            init_tracing(&cfg.logging.level);
            info!("Configuration loaded from {}", config_path.display());
            cfg
        }
        Err(e) => {
            let cfg = AppConfig::default();
            init_tracing(&cfg.logging.level);
            error!("Failed to load config: {}. Using defaults.", e);
            cfg
        }
    };

    info!("Starting OCPP 1.6 Central System...");

    // ── Store (survives restarts via JSON snapshot) ────────
    let snapshot_path = config.snapshot_path();
    let store = Arc::new(InMemoryStore::with_snapshot(snapshot_path.clone()));
    let store_dyn: Arc<dyn ChargerStore> = store.clone();
    info!("Store snapshot at {}", snapshot_path.display());

    // ── Protocol engine ────────────────────────────────────
    let registry = SessionRegistry::shared();
    let scheduler = Arc::new(PostTransactionScheduler::new(
        store_dyn.clone(),
        Duration::from_millis(config.ocpp.post_transaction_delay_ms),
        Duration::from_secs(config.ocpp.call_timeout_secs),
    ));
    let router = Arc::new(OcppRouter::new(
        store_dyn.clone(),
        scheduler,
        config.ocpp.boot_interval_secs,
    ));

    // ── Shutdown coordination ──────────────────────────────
    let shutdown = ShutdownSignal::new();
    shutdown.listen_for_os_signals();

    // ── Background tasks ───────────────────────────────────
    start_session_sweeper(registry.clone(), SweeperConfig::default(), shutdown.clone());
    start_reservation_expiry_task(store_dyn.clone(), shutdown.clone(), 60);

    // ── WebSocket server ───────────────────────────────────
    let server = OcppServer::new(
        config.server_config(),
        registry.clone(),
        router,
        store_dyn,
    )
    .with_shutdown(shutdown.clone());

    info!("🚀 Server started. Press Ctrl+C to shut down gracefully.");
    if let Err(e) = server.run().await {
        error!("WebSocket server error: {}", e);
    }

    // ── Teardown ───────────────────────────────────────────
    info!("🧹 Closing remaining sessions and flushing state...");
    registry.close_all();
    store.persist();

    info!("👋 Central System shutdown complete");
    Ok(())
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}
