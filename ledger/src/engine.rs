//! Transfer transaction engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bankrupt_common::{checked_negate, LedgerError, LedgerResult, MinorUnits, TransferStep};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::balance::{BalanceDelta, BalanceUpdater};
use crate::hook::{PostCommitHook, TransferOutcome};
use crate::journal::NewEntry;
use crate::store::{LedgerStore, StoreTx};
use crate::transfer::{TransferTxParams, TransferTxResult};

/// Order two balance deltas by ascending account id.
///
/// Every transfer updates its two balances in this order, whichever side is
/// debited, so two transfers over the same pair of accounts always lock the
/// rows in the same sequence.
pub fn lock_order(a: BalanceDelta, b: BalanceDelta) -> (BalanceDelta, BalanceDelta) {
    if a.account_id <= b.account_id {
        (a, b)
    } else {
        (b, a)
    }
}

/// The ledger engine moves money between accounts, one atomic transfer
/// transaction at a time.
///
/// The engine never retries. Conflicts surface as retryable errors and the
/// caller decides whether to run the whole transaction again.
pub struct LedgerEngine<S: LedgerStore> {
    store: Arc<S>,
    tx_counter: AtomicU64,
}

impl<S: LedgerStore> LedgerEngine<S> {
    /// Create a new ledger engine over `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            tx_counter: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Move `params.amount` from one account to another.
    ///
    /// Inside one store transaction: insert the transfer, insert the debit
    /// and credit entries, then apply both balance deltas in ascending
    /// account id order and commit. On any error the transaction is rolled
    /// back and nothing is visible. Dropping the returned future before it
    /// completes has the same effect.
    pub async fn transfer_tx(&self, params: TransferTxParams) -> LedgerResult<TransferTxResult> {
        self.transfer_tx_with_hook(params, None)
            .await
            .map(|outcome| outcome.result)
    }

    /// Like [`transfer_tx`](Self::transfer_tx), then run `hook` once the
    /// transfer has committed. A hook failure is returned in
    /// [`TransferOutcome::hook_error`]; the transfer stays committed.
    pub async fn transfer_tx_with_hook(
        &self,
        params: TransferTxParams,
        hook: Option<&dyn PostCommitHook>,
    ) -> LedgerResult<TransferOutcome> {
        let label = format!("tx {}", self.tx_counter.fetch_add(1, Ordering::Relaxed) + 1);
        let span = info_span!(
            "transfer_tx",
            tx = %label,
            from = %params.from_account_id,
            to = %params.to_account_id,
            amount = params.amount,
        );

        async move {
            let result = self.run(params).await?;

            let hook_error = match hook {
                Some(hook) => hook.after_commit(&result).await.err(),
                None => None,
            };
            if let Some(err) = &hook_error {
                warn!(
                    transfer_id = %result.transfer.id,
                    error = %err,
                    "Post-commit hook failed, transfer stays committed"
                );
            }

            Ok(TransferOutcome { result, hook_error })
        }
        .instrument(span)
        .await
    }

    /// Check that all entries in the ledger sum to zero.
    pub async fn verify_integrity(&self) -> LedgerResult<bool> {
        let total = self.store.sum_entries(None).await?;
        if total != 0 {
            warn!(total = %total, "Ledger entries do not balance");
        }
        Ok(total == 0)
    }

    async fn run(&self, params: TransferTxParams) -> LedgerResult<TransferTxResult> {
        let debit =
            checked_negate(params.amount).ok_or(LedgerError::AmountOverflow(params.amount))?;

        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| e.at(TransferStep::BeginTx))?;

        match Self::execute(&mut tx, params, debit).await {
            Ok(result) => {
                tx.commit().await.map_err(|e| e.at(TransferStep::Commit))?;
                info!(
                    transfer_id = %result.transfer.id,
                    from_balance = result.from_account.balance,
                    to_balance = result.to_account.balance,
                    "Transfer committed"
                );
                Ok(result)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                debug!(error = %err, "Transfer rolled back");
                Err(err)
            }
        }
    }

    async fn execute(
        tx: &mut S::Tx,
        params: TransferTxParams,
        debit: MinorUnits,
    ) -> LedgerResult<TransferTxResult> {
        debug!("create transfer");
        let transfer = tx
            .insert_transfer(params.into())
            .await
            .map_err(|e| e.at(TransferStep::CreateTransfer))?;

        debug!("create entry 1");
        let from_entry = tx
            .insert_entry(NewEntry::new(params.from_account_id, debit))
            .await
            .map_err(|e| e.at(TransferStep::CreateFromEntry))?;

        debug!("create entry 2");
        let to_entry = tx
            .insert_entry(NewEntry::new(params.to_account_id, params.amount))
            .await
            .map_err(|e| e.at(TransferStep::CreateToEntry))?;

        let debit_leg = BalanceDelta::new(params.from_account_id, debit);
        let credit_leg = BalanceDelta::new(params.to_account_id, params.amount);
        let debit_first = debit_leg.account_id <= credit_leg.account_id;
        let (first, second) = lock_order(debit_leg, credit_leg);

        debug!(account_id = %first.account_id, "add balance account 1");
        let first_update =
            BalanceUpdater::apply_delta(tx, first.account_id, first.delta, transfer.id)
                .await
                .map_err(|e| e.at(TransferStep::UpdateBalance(first.account_id)))?;

        debug!(account_id = %second.account_id, "add balance account 2");
        let second_update =
            BalanceUpdater::apply_delta(tx, second.account_id, second.delta, transfer.id)
                .await
                .map_err(|e| e.at(TransferStep::UpdateBalance(second.account_id)))?;

        let (from_account, to_account) = if debit_first {
            (first_update.account, second_update.account)
        } else {
            (second_update.account, first_update.account)
        };

        Ok(TransferTxResult {
            transfer,
            from_account,
            to_account,
            from_entry,
            to_entry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::NewAccount;
    use crate::store::MemoryLedgerStore;
    use bankrupt_common::{AccountId, Currency, ErrorKind};
    use proptest::prelude::*;

    async fn setup() -> (LedgerEngine<MemoryLedgerStore>, AccountId, AccountId) {
        let store = Arc::new(MemoryLedgerStore::new());
        let a = store
            .create_account(NewAccount::new("alice", Currency::usd(), 1_000))
            .await
            .unwrap();
        let b = store
            .create_account(NewAccount::new("bob", Currency::usd(), 1_000))
            .await
            .unwrap();
        (LedgerEngine::new(store), a.id, b.id)
    }

    #[tokio::test]
    async fn test_transfer_tx() {
        let (engine, a, b) = setup().await;

        let result = engine
            .transfer_tx(TransferTxParams::new(a, b, 250))
            .await
            .unwrap();

        assert_eq!(result.transfer.from_account_id, a);
        assert_eq!(result.transfer.to_account_id, b);
        assert_eq!(result.transfer.amount, 250);
        assert_eq!(result.from_entry.account_id, a);
        assert_eq!(result.from_entry.amount, -250);
        assert_eq!(result.to_entry.account_id, b);
        assert_eq!(result.to_entry.amount, 250);
        assert_eq!(result.from_account.balance, 750);
        assert_eq!(result.to_account.balance, 1_250);

        let store = engine.store();
        assert_eq!(store.get_transfer(result.transfer.id).await.unwrap(), result.transfer);
        assert_eq!(store.get_account(a).await.unwrap().balance, 750);
        assert!(engine.verify_integrity().await.unwrap());
    }

    #[tokio::test]
    async fn test_transfer_to_lower_id_maps_accounts_by_role() {
        let (engine, a, b) = setup().await;

        // b > a, so the credit is applied first.
        let result = engine
            .transfer_tx(TransferTxParams::new(b, a, 100))
            .await
            .unwrap();

        assert_eq!(result.from_account.id, b);
        assert_eq!(result.from_account.balance, 900);
        assert_eq!(result.to_account.id, a);
        assert_eq!(result.to_account.balance, 1_100);
    }

    #[tokio::test]
    async fn test_unknown_destination_rolls_back() {
        let (engine, a, _) = setup().await;

        let err = engine
            .transfer_tx(TransferTxParams::new(a, AccountId::new(404), 10))
            .await
            .unwrap_err();

        assert_eq!(err.step(), Some(TransferStep::CreateTransfer));
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert_eq!(engine.store().transfer_count(), 0);
        assert_eq!(engine.store().get_account(a).await.unwrap().balance, 1_000);
    }

    #[tokio::test]
    async fn test_unnegatable_amount_rejected_before_begin() {
        let (engine, a, b) = setup().await;

        let err = engine
            .transfer_tx(TransferTxParams::new(a, b, i64::MIN))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::AmountOverflow(i64::MIN)));
        assert_eq!(engine.store().stats().transactions_begun, 0);
    }

    fn delta() -> impl Strategy<Value = BalanceDelta> {
        (1i64..1_000, -1_000i64..1_000).prop_map(|(id, d)| BalanceDelta::new(AccountId::new(id), d))
    }

    proptest! {
        #[test]
        fn prop_lock_order_ascending_and_role_independent(a in delta(), b in delta()) {
            let (first, second) = lock_order(a, b);
            prop_assert!(first.account_id <= second.account_id);

            let (rev_first, rev_second) = lock_order(b, a);
            prop_assert_eq!(first.account_id, rev_first.account_id);
            prop_assert_eq!(second.account_id, rev_second.account_id);

            let mut input = vec![a, b];
            let mut output = vec![first, second];
            input.sort_by_key(|d| (d.account_id, d.delta));
            output.sort_by_key(|d| (d.account_id, d.delta));
            prop_assert_eq!(input, output);
        }

        #[test]
        fn prop_entries_are_additive_inverses(amount in 1i64..=1_000, reverse in any::<bool>()) {
            let result = tokio_test::block_on(async {
                let (engine, a, b) = setup().await;
                let (from, to) = if reverse { (b, a) } else { (a, b) };
                engine.transfer_tx(TransferTxParams::new(from, to, amount)).await
            })
            .unwrap();

            prop_assert_eq!(result.from_entry.amount, -amount);
            prop_assert_eq!(result.to_entry.amount, amount);
            prop_assert_eq!(result.from_account.balance, 1_000 - amount);
            prop_assert_eq!(result.to_account.balance, 1_000 + amount);
        }
    }
}
