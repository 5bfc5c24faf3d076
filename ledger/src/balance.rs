//! Account balance updates.

use bankrupt_common::{now, AccountId, LedgerResult, MinorUnits, Timestamp, TransferId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::account::Account;
use crate::store::StoreTx;

/// Balance change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    /// Account affected.
    pub account_id: AccountId,
    /// Change type.
    pub change_type: BalanceChangeType,
    /// Absolute amount changed.
    pub amount: u64,
    /// Balance before change.
    pub balance_before: MinorUnits,
    /// Balance after change.
    pub balance_after: MinorUnits,
    /// Transfer that caused the change.
    pub reference: TransferId,
    /// When the change occurred.
    pub timestamp: Timestamp,
}

/// Type of balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceChangeType {
    /// Credit (increase).
    Credit,
    /// Debit (decrease).
    Debit,
}

impl BalanceChangeType {
    pub fn of(delta: MinorUnits) -> Self {
        if delta < 0 {
            BalanceChangeType::Debit
        } else {
            BalanceChangeType::Credit
        }
    }
}

/// A signed delta destined for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceDelta {
    pub account_id: AccountId,
    pub delta: MinorUnits,
}

impl BalanceDelta {
    pub fn new(account_id: AccountId, delta: MinorUnits) -> Self {
        Self { account_id, delta }
    }
}

/// An applied balance delta: the updated row and what changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub account: Account,
    pub change: BalanceChange,
}

/// Applies signed deltas to account balances inside a store transaction.
pub struct BalanceUpdater;

impl BalanceUpdater {
    /// Add `delta` to the balance of `account_id`.
    ///
    /// The read and write are one atomic step relative to the enclosing
    /// transaction; the row stays locked until it ends. Unknown account,
    /// store conflict and overflow errors propagate unchanged.
    pub async fn apply_delta<T: StoreTx>(
        tx: &mut T,
        account_id: AccountId,
        delta: MinorUnits,
        reference: TransferId,
    ) -> LedgerResult<BalanceUpdate> {
        let account = tx.add_account_balance(account_id, delta).await?;

        // The store checked `balance_before + delta` did not overflow, so
        // this subtraction cannot either.
        let balance_before = account.balance - delta;

        debug!(
            account_id = %account_id,
            delta,
            balance_before,
            balance_after = account.balance,
            "Balance updated"
        );

        Ok(BalanceUpdate {
            change: BalanceChange {
                account_id,
                change_type: BalanceChangeType::of(delta),
                amount: delta.unsigned_abs(),
                balance_before,
                balance_after: account.balance,
                reference,
                timestamp: now(),
            },
            account,
        })
    }
}
