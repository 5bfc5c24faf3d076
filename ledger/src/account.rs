//! Account definitions for the ledger.

use bankrupt_common::{
    checked_apply, AccountId, Currency, LedgerError, LedgerResult, MinorUnits, Owner, Timestamp,
};
use serde::{Deserialize, Serialize};

/// A ledger account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier, assigned by the store.
    pub id: AccountId,
    /// Username of the owner.
    pub owner: Owner,
    /// Current balance in minor units.
    pub balance: MinorUnits,
    /// Account currency.
    pub currency: Currency,
    /// When the account was created.
    pub created_at: Timestamp,
}

impl Account {
    /// Return a copy of the account with `delta` applied to the balance.
    ///
    /// Fails with [`LedgerError::Overflow`] instead of wrapping.
    pub fn with_delta(&self, delta: MinorUnits) -> LedgerResult<Account> {
        let balance = checked_apply(self.balance, delta).ok_or(LedgerError::Overflow {
            account_id: self.id,
            balance: self.balance,
            delta,
        })?;

        Ok(Account {
            balance,
            ..self.clone()
        })
    }

    /// Check the account holds funds in `currency`.
    pub fn is_in(&self, currency: &Currency) -> bool {
        &self.currency == currency
    }

    /// Check the account belongs to `owner`.
    pub fn is_owned_by(&self, owner: &Owner) -> bool {
        &self.owner == owner
    }
}

/// Parameters for creating an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub owner: Owner,
    pub currency: Currency,
    /// Opening balance.
    pub balance: MinorUnits,
}

impl NewAccount {
    pub fn new(owner: impl Into<Owner>, currency: Currency, balance: MinorUnits) -> Self {
        Self {
            owner: owner.into(),
            currency,
            balance,
        }
    }
}
