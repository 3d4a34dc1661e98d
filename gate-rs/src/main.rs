//! gate-rs: gating HTTP service
//!
//! Serves the gating adapter over the configured store and runs periodic
//! maintenance in the background.

use gate_rs::api::ApiServer;
use gate_rs::logging::init_tracing;
use gate_rs::store::{SqliteStore, Stores};
use gate_rs::{Engine, GateConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(config_path) => GateConfig::from_file(Path::new(&config_path))?,
        None => GateConfig::default(),
    };

    init_tracing(&config.logging)?;
    info!("Starting gate-rs v{}", env!("CARGO_PKG_VERSION"));
    if config.tokens.access_secret == GateConfig::default().tokens.access_secret {
        warn!("Using development token secrets; set tokens.access_secret and tokens.refresh_secret");
    }

    let store = SqliteStore::connect(&config.storage.database_url).await?;
    let engine = Arc::new(Engine::from_config(&config, Stores::sqlite(store)));

    // Periodic cache sweep and lock pruning
    let maintenance = engine.clone();
    let interval = Duration::from_secs(config.server.maintenance_interval_seconds.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            maintenance.maintenance();
        }
    });

    let server = ApiServer::new(engine, config.server.listen_addr.clone());
    server.run().await?;

    Ok(())
}
