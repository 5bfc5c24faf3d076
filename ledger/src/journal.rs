//! Ledger entries.
//!
//! Every transfer writes exactly two entries: a debit of `-amount` on the
//! source account and a credit of `+amount` on the destination. Summed over
//! an account, entries equal the change of its balance since creation.

use bankrupt_common::{AccountId, EntryId, MinorUnits, Timestamp};
use serde::{Deserialize, Serialize};

/// A single signed ledger line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Unique entry ID.
    pub id: EntryId,
    /// Account affected.
    pub account_id: AccountId,
    /// Signed amount: negative for the debited side.
    pub amount: MinorUnits,
    /// When this entry was created.
    pub created_at: Timestamp,
}

/// Parameters for creating an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntry {
    pub account_id: AccountId,
    pub amount: MinorUnits,
}

impl NewEntry {
    pub fn new(account_id: AccountId, amount: MinorUnits) -> Self {
        Self { account_id, amount }
    }
}

/// Sum entry amounts without overflowing.
pub fn sum_amounts<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> i128 {
    entries.into_iter().map(|e| e.amount as i128).sum()
}
