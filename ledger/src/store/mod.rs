//! Ledger storage.
//!
//! [`LedgerStore`] exposes point reads, listings and [`LedgerStore::begin`],
//! which opens a [`StoreTx`]: the only way to write transfers, entries and
//! balance changes. Writes staged in a `StoreTx` become visible together on
//! [`StoreTx::commit`]. Dropping a `StoreTx` without committing discards them
//! and releases every row lock it holds.

mod locks;
mod memory;
mod postgres;

pub use locks::{RowGuard, RowLockStats, RowLockTable};
pub use memory::{FaultPlan, MemoryLedgerStore, MemoryTx, StoreStats};
pub use postgres::{PgLedgerStore, PgStoreOptions, PgTx};

use async_trait::async_trait;
use bankrupt_common::{
    AccountId, EntryId, LedgerResult, MinorUnits, Owner, TransferId,
};
use serde::{Deserialize, Serialize};

use crate::account::{Account, NewAccount};
use crate::journal::{Entry, NewEntry};
use crate::transfer::{NewTransfer, Transfer};

/// Offset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

/// Keyset pagination over committed rows, ordered by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Return rows with an id strictly greater than this.
    pub after: Option<i64>,
    pub limit: u32,
}

impl Cursor {
    /// Cursor for the first page.
    pub fn first(limit: u32) -> Self {
        Self { after: None, limit }
    }

    pub(crate) fn after_key(&self) -> i64 {
        self.after.unwrap_or(0)
    }
}

/// Rows with a monotonically assigned id.
pub trait Keyed {
    fn key(&self) -> i64;
}

impl Keyed for Entry {
    fn key(&self) -> i64 {
        self.id.get()
    }
}

impl Keyed for Transfer {
    fn key(&self) -> i64 {
        self.id.get()
    }
}

/// One page of keyset results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    /// Cursor for the following page, `None` once exhausted.
    pub next: Option<Cursor>,
}

impl<T: Keyed> CursorPage<T> {
    /// Build a page from rows fetched with `cursor`, at most `cursor.limit`
    /// of them in ascending key order.
    pub fn from_rows(items: Vec<T>, cursor: Cursor) -> Self {
        let next = if cursor.limit > 0 && items.len() == cursor.limit as usize {
            items.last().map(|last| Cursor {
                after: Some(last.key()),
                limit: cursor.limit,
            })
        } else {
            None
        };

        Self { items, next }
    }
}

/// Durable keyed storage for accounts, transfers and entries.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Tx: StoreTx;

    /// Open a scoped transaction.
    async fn begin(&self) -> LedgerResult<Self::Tx>;

    /// Create an account with an opening balance. Seeding only; transfers
    /// never create accounts.
    async fn create_account(&self, account: NewAccount) -> LedgerResult<Account>;

    async fn get_account(&self, id: AccountId) -> LedgerResult<Account>;

    async fn list_accounts(&self, owner: &Owner, page: Page) -> LedgerResult<Vec<Account>>;

    async fn get_transfer(&self, id: TransferId) -> LedgerResult<Transfer>;

    /// Transfers from `from` to `to`, by id.
    async fn list_transfers(
        &self,
        from: AccountId,
        to: AccountId,
        page: Page,
    ) -> LedgerResult<Vec<Transfer>>;

    /// Transfers touching `account_id` on either side.
    async fn transfers_after(
        &self,
        account_id: AccountId,
        cursor: Cursor,
    ) -> LedgerResult<CursorPage<Transfer>>;

    async fn get_entry(&self, id: EntryId) -> LedgerResult<Entry>;

    async fn list_entries(&self, account_id: AccountId, page: Page) -> LedgerResult<Vec<Entry>>;

    async fn entries_after(
        &self,
        account_id: AccountId,
        cursor: Cursor,
    ) -> LedgerResult<CursorPage<Entry>>;

    /// Sum of entry amounts for one account, or for the whole ledger.
    async fn sum_entries(&self, account_id: Option<AccountId>) -> LedgerResult<i128>;
}

/// A scoped store transaction.
#[async_trait]
pub trait StoreTx: Send {
    async fn insert_transfer(&mut self, transfer: NewTransfer) -> LedgerResult<Transfer>;

    async fn insert_entry(&mut self, entry: NewEntry) -> LedgerResult<Entry>;

    /// Add a signed delta to an account balance and return the updated row.
    ///
    /// Takes a write lock on the account row that is held until the
    /// transaction ends.
    async fn add_account_balance(
        &mut self,
        account_id: AccountId,
        delta: MinorUnits,
    ) -> LedgerResult<Account>;

    async fn commit(self) -> LedgerResult<()>;

    async fn rollback(self) -> LedgerResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bankrupt_common::now;

    fn entry(id: i64) -> Entry {
        Entry {
            id: EntryId::new(id),
            account_id: AccountId::new(1),
            amount: 1,
            created_at: now(),
        }
    }

    #[test]
    fn test_full_page_has_next_cursor() {
        let cursor = Cursor::first(2);
        let page = CursorPage::from_rows(vec![entry(4), entry(9)], cursor);

        assert_eq!(
            page.next,
            Some(Cursor {
                after: Some(9),
                limit: 2
            })
        );
    }

    #[test]
    fn test_short_page_is_last() {
        let page = CursorPage::from_rows(vec![entry(4)], Cursor::first(2));
        assert!(page.next.is_none());

        let empty: CursorPage<Entry> = CursorPage::from_rows(vec![], Cursor::first(0));
        assert!(empty.next.is_none());
    }
}
