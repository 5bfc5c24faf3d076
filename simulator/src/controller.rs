//! Simulation controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use bankrupt_common::MinorUnits;
use bankrupt_ledger::{Account, LedgerStore};
use bankrupt_service::{Caller, ServiceConfig, TransferRequest, TransferService};

use crate::bank::AccountFactory;
use crate::metrics::SimulationMetrics;
use crate::scenario::{PlannedTransfer, Scenario};

/// Outcome of the post-run consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    /// All ledger entries sum to zero.
    pub entries_balanced: bool,
    /// Sum of the seeded balances before the run.
    pub initial_total: i128,
    /// Sum of the same accounts' balances after the run.
    pub final_total: i128,
}

impl Verification {
    pub fn is_consistent(&self) -> bool {
        self.entries_balanced && self.initial_total == self.final_total
    }
}

/// Controls the simulation.
pub struct SimulationController<S: LedgerStore> {
    store: Arc<S>,
    service: Arc<TransferService<S>>,
    /// Maximum transfers in flight.
    concurrency: usize,
    /// Random number generator.
    rng: StdRng,
    /// Seeded accounts.
    accounts: Vec<Account>,
    initial_total: i128,
    /// Simulation metrics.
    metrics: SimulationMetrics,
    elapsed: Duration,
}

impl<S: LedgerStore> SimulationController<S> {
    /// Create a new simulation controller.
    pub fn new(store: Arc<S>, concurrency: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            service: Arc::new(TransferService::new(
                ServiceConfig::default(),
                "simulator",
                store.clone(),
            )),
            store,
            concurrency: concurrency.max(1),
            rng,
            accounts: Vec::new(),
            initial_total: 0,
            metrics: SimulationMetrics::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Start the service and seed `account_count` accounts.
    pub async fn initialize(
        &mut self,
        account_count: usize,
        initial_balance: MinorUnits,
    ) -> anyhow::Result<()> {
        info!(account_count, initial_balance, "Initializing simulation");

        self.service.start().await?;
        self.accounts =
            AccountFactory::create_accounts(self.store.as_ref(), account_count, initial_balance)
                .await?;
        self.initial_total =
            AccountFactory::total_balance(self.store.as_ref(), &self.accounts).await?;

        Ok(())
    }

    /// Run `transfers` transfers following `scenario`.
    pub async fn run_scenario(
        &mut self,
        scenario: Scenario,
        transfers: usize,
        amount: MinorUnits,
    ) -> anyhow::Result<()> {
        let plan = scenario.plan(&self.accounts, transfers, amount, &mut self.rng)?;
        info!(
            scenario = scenario.name(),
            transfers,
            concurrency = self.concurrency,
            "Running scenario"
        );

        let start = Instant::now();
        let outcomes: Vec<_> = stream::iter(plan)
            .map(|transfer| {
                let service = self.service.clone();
                async move { send(&service, transfer).await }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        self.elapsed = start.elapsed();

        for (outcome, latency) in outcomes {
            match outcome {
                Ok(attempts) => self.metrics.record_success(latency, attempts),
                Err(code) => self.metrics.record_failure(code),
            }
        }

        Ok(())
    }

    /// Check that the run conserved money.
    pub async fn verify(&self) -> anyhow::Result<Verification> {
        let entries_balanced = self.service.engine().verify_integrity().await?;
        let final_total = AccountFactory::total_balance(self.store.as_ref(), &self.accounts).await?;

        let verification = Verification {
            entries_balanced,
            initial_total: self.initial_total,
            final_total,
        };
        if !verification.is_consistent() {
            warn!(?verification, "Ledger inconsistent after simulation");
        }
        Ok(verification)
    }

    /// Stop the service.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.service.stop().await?;
        Ok(())
    }

    /// Get simulation metrics.
    pub fn metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    /// Wall time of the last scenario run.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

async fn send<S: LedgerStore>(
    service: &TransferService<S>,
    transfer: PlannedTransfer,
) -> (Result<u32, &'static str>, Duration) {
    let caller = Caller::new(transfer.from.owner.clone());
    let request = TransferRequest::new(
        transfer.from.id,
        transfer.to.id,
        transfer.amount,
        transfer.from.currency.code(),
    );

    let start = Instant::now();
    let outcome = match service.handle_transfer(&caller, request).await {
        Ok(response) => {
            debug!(
                transfer_id = %response.result.transfer.id,
                attempts = response.attempts,
                "Transfer committed"
            );
            Ok(response.attempts)
        }
        Err(e) => {
            debug!(code = e.error_code(), error = %e, "Transfer failed");
            Err(e.error_code())
        }
    };
    (outcome, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bankrupt_ledger::MemoryLedgerStore;

    async fn controller(accounts: usize) -> SimulationController<MemoryLedgerStore> {
        let store = Arc::new(MemoryLedgerStore::new());
        let mut controller = SimulationController::new(store, 8, Some(7));
        controller.initialize(accounts, 10_000).await.unwrap();
        controller
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_alternating_conserves_money() {
        let mut controller = controller(2).await;

        controller
            .run_scenario(Scenario::Alternating, 20, 10)
            .await
            .unwrap();

        assert_eq!(controller.metrics().successful_transfers, 20);
        let verification = controller.verify().await.unwrap();
        assert!(verification.is_consistent());
        assert_eq!(verification.final_total, 20_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_random_mesh_conserves_money() {
        let mut controller = controller(6).await;

        controller
            .run_scenario(Scenario::RandomMesh, 60, 100)
            .await
            .unwrap();

        assert_eq!(controller.metrics().total_transfers, 60);
        assert_eq!(controller.metrics().failed_transfers, 0);
        assert!(controller.verify().await.unwrap().is_consistent());

        controller.shutdown().await.unwrap();
    }
}
