//! Row-level write locks for the in-memory store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bankrupt_common::AccountId;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Held write lock on one account row. Released on drop.
pub type RowGuard = OwnedMutexGuard<()>;

/// Lock acquisition counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowLockStats {
    /// Locks handed out.
    pub acquired: u64,
    /// Acquisitions that had to wait for another holder.
    pub contended: u64,
}

/// Table of per-account write locks.
///
/// Locks are created on first use and never removed; an account row that
/// exists once keeps its lock for the lifetime of the store.
#[derive(Debug, Default)]
pub struct RowLockTable {
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
    acquired: AtomicU64,
    contended: AtomicU64,
}

impl RowLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the write lock on `account_id`, waiting for the current
    /// holder to release it.
    pub async fn acquire(&self, account_id: AccountId) -> RowGuard {
        // Clone the Arc out so no map shard stays locked across the await.
        let lock = self
            .locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = match lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                self.contended.fetch_add(1, Ordering::Relaxed);
                trace!(account_id = %account_id, "Waiting for row lock");
                lock.lock_owned().await
            }
        };

        self.acquired.fetch_add(1, Ordering::Relaxed);
        guard
    }

    /// Check whether some transaction currently holds the lock.
    pub fn is_locked(&self, account_id: AccountId) -> bool {
        self.locks
            .get(&account_id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    pub fn stats(&self) -> RowLockStats {
        RowLockStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Barrier;

    #[tokio::test]
    async fn test_lock_released_on_drop() {
        let table = RowLockTable::new();
        let id = AccountId::new(1);

        let guard = table.acquire(id).await;
        assert!(table.is_locked(id));

        drop(guard);
        assert!(!table.is_locked(id));
        assert!(!table.is_locked(AccountId::new(2)));
    }

    #[tokio::test]
    async fn test_contended_acquire_waits_for_holder() {
        let table = Arc::new(RowLockTable::new());
        let id = AccountId::new(7);

        let guard = table.acquire(id).await;

        let waiter = {
            let table = table.clone();
            tokio::spawn(async move {
                let _guard = table.acquire(id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should get the lock")
            .unwrap();

        let stats = table.stats();
        assert_eq!(stats.acquired, 2);
        assert_eq!(stats.contended, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_opposite_order_deadlocks_without_ordering() {
        let table = Arc::new(RowLockTable::new());
        let barrier = Arc::new(Barrier::new(2));
        let (a, b) = (AccountId::new(1), AccountId::new(2));

        let worker = |first: AccountId, second: AccountId| {
            let table = table.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                let _first = table.acquire(first).await;
                barrier.wait().await;
                let got_second =
                    tokio::time::timeout(Duration::from_millis(100), table.acquire(second))
                        .await
                        .is_ok();
                // Keep holding until both sides have given up.
                barrier.wait().await;
                got_second
            })
        };

        let left = worker(a, b);
        let right = worker(b, a);

        // Each holds one row and waits for the other: both must time out.
        assert!(!left.await.unwrap());
        assert!(!right.await.unwrap());
        assert!(!table.is_locked(a));
        assert!(!table.is_locked(b));
    }
}
