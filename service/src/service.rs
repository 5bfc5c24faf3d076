//! Transfer service: validation, execution and retry around the ledger engine.

use std::sync::Arc;
use std::time::Duration;

use bankrupt_common::{ErrorKind, LedgerError, LedgerResult};
use bankrupt_ledger::{LedgerEngine, LedgerStore, PostCommitHook, TransferOutcome, TransferTxParams};
use parking_lot::RwLock;
use tracing::{error, info, instrument, warn};

use crate::config::ServiceConfig;
use crate::guard::TransferGuard;
use crate::messages::{Caller, TransferRequest, TransferResponse};
use crate::metrics::{Metrics, SharedMetrics};
use crate::state::ServiceState;

/// Entry point for transfer requests.
///
/// Requests are checked by the [`TransferGuard`], then executed by the
/// [`LedgerEngine`]. Attempts that fail with a retryable error are re-run
/// from the start, up to the configured number of attempts.
pub struct TransferService<S: LedgerStore> {
    /// Configuration.
    config: ServiceConfig,
    /// Node ID for this service instance.
    node_id: String,
    /// Current service state.
    state: Arc<RwLock<ServiceState>>,
    guard: TransferGuard<S>,
    engine: Arc<LedgerEngine<S>>,
    /// Runs after each committed transfer.
    hook: Option<Arc<dyn PostCommitHook>>,
    metrics: SharedMetrics,
}

impl<S: LedgerStore> TransferService<S> {
    /// Create a new service over `store`.
    pub fn new(config: ServiceConfig, node_id: impl Into<String>, store: Arc<S>) -> Self {
        Self {
            config,
            node_id: node_id.into(),
            state: Arc::new(RwLock::new(ServiceState::Starting)),
            guard: TransferGuard::new(store.clone()),
            engine: Arc::new(LedgerEngine::new(store)),
            hook: None,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Run `hook` after every committed transfer.
    pub fn with_hook(mut self, hook: Arc<dyn PostCommitHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Start accepting transfers.
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn start(&self) -> LedgerResult<()> {
        info!("Starting transfer service");
        *self.state.write() = ServiceState::Running;
        info!(
            max_attempts = self.config.retry.max_attempts,
            "Transfer service started"
        );
        Ok(())
    }

    /// Stop accepting transfers and wait for in-flight ones to finish.
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn stop(&self) -> LedgerResult<()> {
        if self.state().is_terminal() {
            return Ok(());
        }
        info!("Stopping transfer service");

        // Requests take their in-flight slot under the read lock, so once
        // this write lands every admitted request is visible to the drain.
        *self.state.write() = ServiceState::ShuttingDown;
        self.drain_pending_transfers().await;
        *self.state.write() = ServiceState::Stopped;

        info!("Transfer service stopped");
        Ok(())
    }

    /// Validate and execute a transfer on behalf of `caller`.
    #[instrument(
        skip(self, caller, request),
        fields(node_id = %self.node_id, caller = %caller.username)
    )]
    pub async fn handle_transfer(
        &self,
        caller: &Caller,
        request: TransferRequest,
    ) -> LedgerResult<TransferResponse> {
        let _in_flight = {
            let state = self.state.read();
            if !state.accepts_requests() {
                return Err(LedgerError::ServiceUnavailable {
                    retry_after_ms: 1000,
                });
            }
            self.metrics.transfer_started()
        };

        self.metrics.transfer_received();

        let params = match self.guard.check(caller, &request).await {
            Ok(params) => params,
            Err(e) => {
                self.metrics.transfer_rejected();
                info!(code = e.error_code(), error = %e, "Transfer rejected");
                return Err(e);
            }
        };

        match self.execute_with_retry(params).await {
            Ok((outcome, attempts)) => {
                self.metrics.transfer_success();
                if outcome.hook_failed() {
                    self.metrics.hook_failed();
                }

                Ok(TransferResponse {
                    result: outcome.result,
                    attempts,
                    notification_error: outcome.hook_error.map(|e| e.to_string()),
                })
            }
            Err(e) => {
                self.metrics.transfer_failed();
                match e.kind() {
                    ErrorKind::Integrity | ErrorKind::Infrastructure => {
                        error!(code = e.error_code(), error = %e, "Transfer failed")
                    }
                    _ => warn!(code = e.error_code(), error = %e, "Transfer failed"),
                }
                Err(e)
            }
        }
    }

    /// Check if the service is accepting requests.
    pub fn is_accepting_requests(&self) -> bool {
        self.state.read().accepts_requests()
    }

    /// Get the current service state.
    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn engine(&self) -> &Arc<LedgerEngine<S>> {
        &self.engine
    }

    /// Get the number of admitted requests still in progress, validation
    /// included.
    pub fn active_transfer_count(&self) -> u64 {
        self.metrics.snapshot().transfers_active
    }

    // --- Private methods ---

    async fn execute_with_retry(
        &self,
        params: TransferTxParams,
    ) -> LedgerResult<(TransferOutcome, u32)> {
        let retry = &self.config.retry;
        let mut attempt = 1;

        loop {
            let err = match self
                .engine
                .transfer_tx_with_hook(params, self.hook.as_deref())
                .await
            {
                Ok(outcome) => return Ok((outcome, attempt)),
                Err(err) => err,
            };

            if err.kind() == ErrorKind::Conflict {
                self.metrics.conflict();
            }
            if !err.is_retryable() || attempt >= retry.max_attempts {
                return Err(err);
            }

            attempt += 1;
            self.metrics.retry();
            warn!(attempt, error = %err, "Retrying transfer");
            tokio::time::sleep(retry.delay_before(attempt)).await;
        }
    }

    async fn drain_pending_transfers(&self) {
        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            loop {
                let pending_count = self.active_transfer_count();
                if pending_count == 0 {
                    break;
                }
                info!(pending_count, "Waiting for pending transfers to complete");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                pending_count = self.active_transfer_count(),
                "Drain timed out with transfers in flight"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bankrupt_common::Currency;
    use bankrupt_ledger::{MemoryLedgerStore, NewAccount};

    #[tokio::test]
    async fn test_service_start_stop() {
        let store = Arc::new(MemoryLedgerStore::new());
        let service = TransferService::new(ServiceConfig::default(), "test-node-1", store);

        assert_eq!(service.state(), ServiceState::Starting);
        assert_eq!(service.active_transfer_count(), 0);

        service.start().await.unwrap();
        assert_eq!(service.state(), ServiceState::Running);

        service.stop().await.unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);

        // Stopping again is a no-op.
        service.stop().await.unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_rejects_when_not_running() {
        let store = Arc::new(MemoryLedgerStore::new());
        let a = store
            .create_account(NewAccount::new("alice", Currency::usd(), 100))
            .await
            .unwrap();
        let b = store
            .create_account(NewAccount::new("bob", Currency::usd(), 100))
            .await
            .unwrap();
        let service = TransferService::new(ServiceConfig::default(), "test-node-1", store);

        let err = service
            .handle_transfer(
                &Caller::new("alice"),
                TransferRequest::new(a.id, b.id, 10, "USD"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::ServiceUnavailable { .. }));
        assert_eq!(service.metrics().snapshot().transfers_total, 0);
    }
}
