use std::sync::Arc;

use tracing_subscriber::filter::LevelFilter;

use aurod::api;
use aurod::config::Config;
use aurod::monitor::MachineMonitor;
use aurod::store::MachineStore;
use aurod::store::RestStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse config file path from CLI or use default
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "aurod.toml".to_string());

    // Load configuration
    let config = Config::from_file(&config_path)?;

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(config.logging.level))
        .init();

    tracing::info!("aurod starting");
    tracing::info!("Loaded config from: {}", config_path);
    tracing::info!(
        "Store: {} (table: {})",
        config.store.url,
        config.store.table
    );

    let store: Arc<dyn MachineStore> = Arc::new(RestStore::new(&config.store)?);

    // Live machine mirror; owns the status simulator's lifetime
    let mut monitor = MachineMonitor::start(store, config.simulator.period());

    // HTTP API serving the mirror
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let api_task = tokio::spawn(api::serve(
        config.api.listen.clone(),
        config.api.port,
        monitor.mirror(),
        shutdown_rx,
    ));

    // Wait for Ctrl+C
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received shutdown signal");
        }
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    // Stop the monitor first so no further writes or merges land while the
    // API drains, then let the server finish gracefully.
    monitor.stop();
    let _ = shutdown_tx.send(());
    if let Err(e) = api_task.await? {
        tracing::error!("API server error: {}", e);
    }

    tracing::info!("aurod shutdown complete");

    Ok(())
}
