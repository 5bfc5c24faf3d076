//! Transfer records and the composite result of a transfer transaction.

use bankrupt_common::{AccountId, MinorUnits, Timestamp, TransferId};
use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::journal::Entry;

/// A record of money moved from one account to another. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    /// Always positive.
    pub amount: MinorUnits,
    pub created_at: Timestamp,
}

impl Transfer {
    /// Check whether `account_id` is either side of this transfer.
    pub fn involves(&self, account_id: AccountId) -> bool {
        self.from_account_id == account_id || self.to_account_id == account_id
    }
}

/// Parameters for inserting a transfer row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransfer {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: MinorUnits,
}

/// Input of a transfer transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: MinorUnits,
}

impl TransferTxParams {
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: MinorUnits) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }
}

impl From<TransferTxParams> for NewTransfer {
    fn from(params: TransferTxParams) -> Self {
        NewTransfer {
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
        }
    }
}

/// Everything a committed transfer transaction produced.
///
/// Account snapshots carry the balances returned by the balance updates of
/// this transaction, not a later read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxResult {
    pub transfer: Transfer,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}
