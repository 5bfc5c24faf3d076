//! Transfer transaction tests against the in-memory store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bankrupt_common::{AccountId, Currency, ErrorKind, LedgerError, TransferId, TransferStep};
use bankrupt_ledger::{
    Account, HookError, LedgerEngine, LedgerStore, MemoryLedgerStore, NewAccount, Page,
    PostCommitHook, TransferTxParams, TransferTxResult,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

async fn create_account(store: &MemoryLedgerStore, owner: &str, balance: i64) -> Account {
    store
        .create_account(NewAccount::new(owner, Currency::usd(), balance))
        .await
        .unwrap()
}

async fn setup(balance: i64) -> (Arc<LedgerEngine<MemoryLedgerStore>>, Account, Account) {
    let store = Arc::new(MemoryLedgerStore::new());
    let a = create_account(&store, "alice", balance).await;
    let b = create_account(&store, "bob", balance).await;
    (Arc::new(LedgerEngine::new(store)), a, b)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_same_direction() {
    let (engine, a, b) = setup(1_000).await;
    let n = 5;
    let amount = 10;

    let handles: Vec<_> = (0..n)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .transfer_tx(TransferTxParams::new(a.id, b.id, amount))
                    .await
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        let result = handle.await.unwrap().unwrap();

        assert_eq!(result.transfer.amount, amount);
        assert_eq!(result.from_entry.amount, -amount);
        assert_eq!(result.to_entry.amount, amount);

        let diff_from = a.balance - result.from_account.balance;
        let diff_to = result.to_account.balance - b.balance;
        assert_eq!(diff_from, diff_to);
        assert!(diff_from > 0);
        assert_eq!(diff_from % amount, 0);

        let k = diff_from / amount;
        assert!((1..=n).contains(&k));
        assert!(seen.insert(k), "diff {k} observed twice");
    }

    let store = engine.store();
    assert_eq!(
        store.get_account(a.id).await.unwrap().balance,
        a.balance - n * amount
    );
    assert_eq!(
        store.get_account(b.id).await.unwrap().balance,
        b.balance + n * amount
    );
    assert_eq!(store.transfer_count(), n as usize);
    assert_eq!(store.entry_count(), 2 * n as usize);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_alternating_transfers_do_not_deadlock() {
    let (engine, a, b) = setup(1_000).await;
    // Widen the window in which both rows are held.
    engine
        .store()
        .faults()
        .set_update_delay(Duration::from_millis(5));

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let engine = engine.clone();
            let (from, to) = if i % 2 == 1 { (b.id, a.id) } else { (a.id, b.id) };
            tokio::spawn(async move {
                engine
                    .transfer_tx(TransferTxParams::new(from, to, 10))
                    .await
            })
        })
        .collect();

    let all = futures::future::join_all(handles);
    let results = tokio::time::timeout(Duration::from_secs(10), all)
        .await
        .expect("alternating transfers deadlocked");

    for result in results {
        result.unwrap().unwrap();
    }

    let store = engine.store();
    assert_eq!(store.get_account(a.id).await.unwrap().balance, a.balance);
    assert_eq!(store.get_account(b.id).await.unwrap().balance, b.balance);
    assert_eq!(store.transfer_count(), 10);
}

#[tokio::test]
async fn test_conflict_mid_transaction_leaves_no_rows() {
    let (engine, a, b) = setup(1_000).await;
    // First balance update succeeds, the second one conflicts.
    engine.store().faults().conflict_on_update(2);

    let err = engine
        .transfer_tx(TransferTxParams::new(a.id, b.id, 100))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.step(), Some(TransferStep::UpdateBalance(b.id)));

    let store = engine.store();
    assert_eq!(store.transfer_count(), 0);
    assert_eq!(store.entry_count(), 0);
    assert_eq!(store.get_account(a.id).await.unwrap().balance, 1_000);
    assert_eq!(store.get_account(b.id).await.unwrap().balance, 1_000);
    assert!(!store.row_locks().is_locked(a.id));

    let stats = store.stats();
    assert_eq!(stats.transactions_committed, 0);
    assert_eq!(stats.transactions_rolled_back, 1);
}

#[tokio::test]
async fn test_same_request_twice_moves_money_twice() {
    let (engine, a, b) = setup(1_000).await;
    let params = TransferTxParams::new(a.id, b.id, 75);

    let first = engine.transfer_tx(params).await.unwrap();
    let second = engine.transfer_tx(params).await.unwrap();

    assert_ne!(first.transfer.id, second.transfer.id);
    assert_eq!(second.from_account.balance, 1_000 - 150);
    assert_eq!(second.to_account.balance, 1_000 + 150);

    let listed = engine
        .store()
        .list_transfers(a.id, b.id, Page::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 2);
}

#[tokio::test]
async fn test_transfer_to_same_account_takes_one_row_lock() {
    let (engine, a, _) = setup(100).await;
    let store = engine.store();
    let locks_before = store.row_locks().stats().acquired;

    let result = tokio::time::timeout(
        Duration::from_secs(1),
        engine.transfer_tx(TransferTxParams::new(a.id, a.id, 30)),
    )
    .await
    .expect("second update on the same row blocked")
    .unwrap();

    // Debit applies first, then the credit restores the balance.
    assert_eq!(result.from_account.balance, 70);
    assert_eq!(result.to_account.balance, 100);
    assert_eq!(result.from_entry.amount, -30);
    assert_eq!(result.to_entry.amount, 30);

    assert_eq!(store.row_locks().stats().acquired, locks_before + 1);
    assert!(!store.row_locks().is_locked(a.id));
    assert_eq!(store.get_account(a.id).await.unwrap().balance, 100);

    let entries = store.list_entries(a.id, Page::default()).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(store.sum_entries(Some(a.id)).await.unwrap(), 0);
}

#[tokio::test]
async fn test_overflow_rolls_back() {
    let store = Arc::new(MemoryLedgerStore::new());
    let a = create_account(&store, "alice", 100).await;
    let rich = create_account(&store, "rich", i64::MAX - 10).await;
    let engine = LedgerEngine::new(store.clone());

    let err = engine
        .transfer_tx(TransferTxParams::new(a.id, rich.id, 50))
        .await
        .unwrap_err();

    assert!(matches!(
        err.root(),
        LedgerError::Overflow { account_id, .. } if *account_id == rich.id
    ));
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert!(!err.is_retryable());

    assert_eq!(store.transfer_count(), 0);
    assert_eq!(store.get_account(a.id).await.unwrap().balance, 100);
    assert_eq!(store.get_account(rich.id).await.unwrap().balance, i64::MAX - 10);
}

#[derive(Default)]
struct RecordingHook {
    seen: Mutex<Vec<TransferId>>,
    fail: bool,
}

#[async_trait]
impl PostCommitHook for RecordingHook {
    async fn after_commit(&self, result: &TransferTxResult) -> Result<(), HookError> {
        self.seen.lock().push(result.transfer.id);
        if self.fail {
            return Err(HookError::Failed("mailer down".to_string()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_hook_runs_after_commit() {
    let (engine, a, b) = setup(1_000).await;
    let hook = RecordingHook::default();

    let outcome = engine
        .transfer_tx_with_hook(TransferTxParams::new(a.id, b.id, 10), Some(&hook))
        .await
        .unwrap();

    assert!(!outcome.hook_failed());
    assert_eq!(*hook.seen.lock(), vec![outcome.result.transfer.id]);

    // Committed before the hook saw it.
    let stored = engine
        .store()
        .get_transfer(outcome.result.transfer.id)
        .await
        .unwrap();
    assert_eq!(stored, outcome.result.transfer);
}

#[tokio::test]
async fn test_hook_failure_does_not_roll_back() {
    let (engine, a, b) = setup(1_000).await;
    let hook = RecordingHook {
        fail: true,
        ..Default::default()
    };

    let outcome = engine
        .transfer_tx_with_hook(TransferTxParams::new(a.id, b.id, 10), Some(&hook))
        .await
        .unwrap();

    assert_eq!(
        outcome.hook_error,
        Some(HookError::Failed("mailer down".to_string()))
    );
    assert_eq!(engine.store().transfer_count(), 1);
    assert_eq!(engine.store().get_account(a.id).await.unwrap().balance, 990);
}

#[tokio::test]
async fn test_hook_not_run_when_transfer_fails() {
    let (engine, a, _) = setup(1_000).await;
    let hook = RecordingHook::default();

    let result = engine
        .transfer_tx_with_hook(
            TransferTxParams::new(a.id, AccountId::new(9_999), 10),
            Some(&hook),
        )
        .await;

    assert!(result.is_err());
    assert!(hook.seen.lock().is_empty());
}

#[tokio::test]
async fn test_cancelled_transfer_leaves_no_rows() {
    let (engine, a, b) = setup(1_000).await;
    engine
        .store()
        .faults()
        .set_update_delay(Duration::from_millis(500));

    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        engine.transfer_tx(TransferTxParams::new(a.id, b.id, 10)),
    )
    .await;
    assert!(cancelled.is_err());

    let store = engine.store();
    assert_eq!(store.transfer_count(), 0);
    assert_eq!(store.entry_count(), 0);
    assert!(!store.row_locks().is_locked(a.id));
    assert_eq!(store.stats().transactions_rolled_back, 1);

    store.faults().clear();
    let result = engine
        .transfer_tx(TransferTxParams::new(a.id, b.id, 10))
        .await
        .unwrap();
    assert_eq!(result.from_account.balance, 990);
}

#[tokio::test]
async fn test_unavailable_store() {
    let (engine, a, b) = setup(1_000).await;
    engine.store().faults().set_unavailable(true);

    let err = engine
        .transfer_tx(TransferTxParams::new(a.id, b.id, 10))
        .await
        .unwrap_err();

    assert_eq!(err.step(), Some(TransferStep::BeginTx));
    assert_eq!(err.kind(), ErrorKind::Infrastructure);
    assert_eq!(err.error_code(), "STORE_UNAVAILABLE");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_random_mesh_conserves_money() {
    let store = Arc::new(MemoryLedgerStore::new());
    let mut accounts = Vec::new();
    for i in 0..6 {
        accounts.push(create_account(&store, &format!("user_{i}"), 10_000).await);
    }
    let engine = Arc::new(LedgerEngine::new(store.clone()));

    let mut rng = StdRng::seed_from_u64(7);
    let mut handles = Vec::new();
    for _ in 0..60 {
        let from = accounts[rng.gen_range(0..accounts.len())].id;
        let mut to = accounts[rng.gen_range(0..accounts.len())].id;
        if to == from {
            to = accounts[(accounts.iter().position(|a| a.id == from).unwrap() + 1) % accounts.len()].id;
        }
        let amount = rng.gen_range(1..=50);
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .transfer_tx(TransferTxParams::new(from, to, amount))
                .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(engine.verify_integrity().await.unwrap());
    assert_eq!(store.total_balance(), 6 * 10_000);
    for account in &accounts {
        let current = store.get_account(account.id).await.unwrap();
        let sum = store.sum_entries(Some(account.id)).await.unwrap();
        assert_eq!(sum, (current.balance - account.balance) as i128);
    }
}
