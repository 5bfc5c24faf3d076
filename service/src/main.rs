//! Bankrupt Node Binary
//!
//! Runs the transfer service against PostgreSQL, or an in-memory store when
//! no database is configured, until Ctrl+C.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bankrupt_ledger::{LedgerStore, MemoryLedgerStore, PgLedgerStore};
use bankrupt_service::{NotificationWorker, ServiceConfig, TransferNotifier, TransferService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Bankrupt node");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    // Generate node ID if not provided
    let node_id = config
        .node_id
        .clone()
        .unwrap_or_else(|| format!("bankrupt-{}", uuid::Uuid::new_v4()));

    info!(node_id = %node_id, "Node ID assigned");

    match config.database.url.clone() {
        Some(url) => {
            let store = PgLedgerStore::connect(&url, config.database.store_options()).await?;
            store.apply_schema().await?;
            store.health_check().await?;
            info!("Connected to PostgreSQL");
            run(config, node_id, Arc::new(store)).await
        }
        None => {
            warn!("DATABASE_URL not set, balances will not survive a restart");
            run(config, node_id, Arc::new(MemoryLedgerStore::new())).await
        }
    }
}

async fn run<S: LedgerStore>(
    config: ServiceConfig,
    node_id: String,
    store: Arc<S>,
) -> anyhow::Result<()> {
    let (notifier, notifications) = TransferNotifier::channel(config.notify_queue_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(NotificationWorker::new(notifications, shutdown_rx).run());

    let service = TransferService::new(config, node_id.clone(), store)
        .with_hook(Arc::new(notifier));
    service.start().await?;

    info!(node_id = %node_id, "Node running");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    if let Err(e) = service.stop().await {
        error!(error = %e, "Error during shutdown");
    }
    let _ = shutdown_tx.send(true);
    let delivered = worker.await?;

    info!(delivered, "Node shutdown complete");
    Ok(())
}
