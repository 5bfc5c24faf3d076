//! Metrics collection for transfer monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Transfer service metrics.
pub struct Metrics {
    /// Total transfer requests received.
    pub transfers_total: AtomicU64,
    /// Transfers committed.
    pub transfers_success: AtomicU64,
    /// Transfers that failed inside the engine.
    pub transfers_failed: AtomicU64,
    /// Requests rejected before reaching the engine.
    pub transfers_rejected: AtomicU64,
    /// Transfers in progress.
    pub transfers_active: AtomicU64,
    /// Attempts re-run after a retryable failure.
    pub retries: AtomicU64,
    /// Store conflicts observed, retried or not.
    pub conflicts: AtomicU64,
    /// Post-commit hook failures.
    pub hook_failures: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            transfers_total: AtomicU64::new(0),
            transfers_success: AtomicU64::new(0),
            transfers_failed: AtomicU64::new(0),
            transfers_rejected: AtomicU64::new(0),
            transfers_active: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            hook_failures: AtomicU64::new(0),
        }
    }

    pub fn transfer_received(&self) {
        self.transfers_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a transfer as in progress until the returned guard is dropped,
    /// whether it completes or its future is cancelled.
    pub fn transfer_started(self: &Arc<Self>) -> InFlightTransfer {
        self.transfers_active.fetch_add(1, Ordering::SeqCst);
        InFlightTransfer {
            metrics: Arc::clone(self),
        }
    }

    pub fn transfer_success(&self) {
        self.transfers_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_failed(&self) {
        self.transfers_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_rejected(&self) {
        self.transfers_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hook_failed(&self) {
        self.hook_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transfers_total: self.transfers_total.load(Ordering::Relaxed),
            transfers_success: self.transfers_success.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
            transfers_rejected: self.transfers_rejected.load(Ordering::Relaxed),
            transfers_active: self.transfers_active.load(Ordering::SeqCst),
            retries: self.retries.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            hook_failures: self.hook_failures.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let series = [
            ("transfers_total", "counter", "Total transfer requests", snapshot.transfers_total),
            ("transfers_success", "counter", "Transfers committed", snapshot.transfers_success),
            ("transfers_failed", "counter", "Transfers failed in the engine", snapshot.transfers_failed),
            ("transfers_rejected", "counter", "Transfers rejected by validation", snapshot.transfers_rejected),
            ("transfers_active", "gauge", "Transfers in progress", snapshot.transfers_active),
            ("transfer_retries", "counter", "Transfer attempts retried", snapshot.retries),
            ("store_conflicts", "counter", "Store conflicts observed", snapshot.conflicts),
            ("hook_failures", "counter", "Post-commit hook failures", snapshot.hook_failures),
        ];

        let mut out = String::new();
        for (name, kind, help, value) in series {
            out.push_str(&format!(
                "# HELP bankrupt_{name} {help}\n# TYPE bankrupt_{name} {kind}\nbankrupt_{name} {value}\n\n"
            ));
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub transfers_total: u64,
    pub transfers_success: u64,
    pub transfers_failed: u64,
    pub transfers_rejected: u64,
    pub transfers_active: u64,
    pub retries: u64,
    pub conflicts: u64,
    pub hook_failures: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;

/// Holds one slot of `transfers_active`.
#[must_use = "the transfer stops counting as active when this is dropped"]
pub struct InFlightTransfer {
    metrics: SharedMetrics,
}

impl Drop for InFlightTransfer {
    fn drop(&mut self) {
        self.metrics.transfers_active.fetch_sub(1, Ordering::SeqCst);
    }
}
