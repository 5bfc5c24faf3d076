//! Bankrupt Simulator
//!
//! Drives concurrent transfer scenarios through the transfer service and
//! checks that the ledger still balances afterwards.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bankrupt_ledger::{LedgerStore, MemoryLedgerStore, PgLedgerStore, PgStoreOptions};

mod bank;
mod controller;
mod metrics;
mod scenario;

use controller::SimulationController;
use scenario::Scenario;

/// Bankrupt Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Bankrupt load and consistency simulator")]
struct Args {
    /// Number of accounts to seed
    #[arg(short, long, default_value = "4")]
    accounts: usize,

    /// Scenario to run: pairwise, alternating or random-mesh
    #[arg(short, long, default_value = "random-mesh")]
    scenario: String,

    /// Number of transfers to send
    #[arg(short, long, default_value = "100")]
    transfers: usize,

    /// Transfer amount in minor units (upper bound for random-mesh)
    #[arg(long, default_value = "10")]
    amount: i64,

    /// Initial balance of each seeded account, in minor units
    #[arg(long, default_value = "100000")]
    initial_balance: i64,

    /// Maximum transfers in flight
    #[arg(short, long, default_value = "8")]
    concurrency: usize,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// PostgreSQL URL; the in-memory store is used when omitted
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let scenario = Scenario::load(&args.scenario)?;

    info!("Starting Bankrupt Simulator");

    match args.database_url.clone() {
        Some(url) => {
            let store = PgLedgerStore::connect(&url, PgStoreOptions::default()).await?;
            store.apply_schema().await?;
            run(Arc::new(store), scenario, &args).await
        }
        None => run(Arc::new(MemoryLedgerStore::new()), scenario, &args).await,
    }
}

async fn run<S: LedgerStore>(store: Arc<S>, scenario: Scenario, args: &Args) -> anyhow::Result<()> {
    let mut controller = SimulationController::new(store, args.concurrency, args.seed);
    controller
        .initialize(args.accounts, args.initial_balance)
        .await?;

    controller
        .run_scenario(scenario, args.transfers, args.amount)
        .await?;
    let verification = controller.verify().await?;
    controller.shutdown().await?;

    // Print metrics
    let metrics = controller.metrics();
    info!("Simulation complete");
    info!("Total transfers: {}", metrics.total_transfers);
    info!("Successful: {}", metrics.successful_transfers);
    info!("Failed: {}", metrics.failed_transfers);
    for (code, count) in &metrics.failures_by_code {
        info!("  {}: {}", code, count);
    }
    info!("Retried attempts: {}", metrics.retried_attempts);
    info!("Success rate: {:.2}%", metrics.success_rate() * 100.0);
    info!(
        "Latency avg/p50/p99: {}/{}/{}ms",
        metrics.average_latency_ms(),
        metrics.p50_latency_ms(),
        metrics.p99_latency_ms()
    );
    info!(
        "Throughput: {:.1} transfers/s",
        metrics.throughput(controller.elapsed())
    );

    if !verification.is_consistent() {
        error!(
            entries_balanced = verification.entries_balanced,
            initial_total = %verification.initial_total,
            final_total = %verification.final_total,
            "Conservation check failed"
        );
        return Err(anyhow::anyhow!("ledger did not conserve money"));
    }

    info!(total = %verification.final_total, "Conservation check passed");
    Ok(())
}
