//! In-memory ledger store.
//!
//! Committed rows live in ordered maps behind a single `RwLock`. A
//! [`MemoryTx`] stages its inserts and balance changes privately and
//! publishes them under the write lock on commit. Balance updates take a
//! per-account row lock from a [`RowLockTable`] which the transaction keeps
//! until it commits, rolls back or is dropped.
//!
//! Ids come from sequences that are not rolled back, so aborted
//! transactions leave gaps the way database sequences do.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bankrupt_common::{
    now, AccountId, EntryId, LedgerError, LedgerResult, MinorUnits, Owner, TransferId,
};
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::locks::{RowGuard, RowLockTable};
use super::{Cursor, CursorPage, LedgerStore, Page, StoreTx};
use crate::account::{Account, NewAccount};
use crate::journal::{sum_amounts, Entry, NewEntry};
use crate::transfer::{NewTransfer, Transfer};

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    transfers: BTreeMap<TransferId, Transfer>,
    entries: BTreeMap<EntryId, Entry>,
}

#[derive(Debug, Default)]
struct Sequences {
    accounts: AtomicI64,
    transfers: AtomicI64,
    entries: AtomicI64,
    transactions: AtomicU64,
}

fn next_id(seq: &AtomicI64) -> i64 {
    seq.fetch_add(1, Ordering::SeqCst) + 1
}

/// Faults to inject into store operations, for exercising failure paths.
#[derive(Debug, Default)]
pub struct FaultPlan {
    skip_updates: AtomicU32,
    conflicts: AtomicU32,
    unavailable: AtomicBool,
    update_delay_ms: AtomicU64,
}

impl FaultPlan {
    /// Fail the `nth` balance update from now (1-based) with a conflict.
    pub fn conflict_on_update(&self, nth: u32) {
        self.skip_updates
            .store(nth.saturating_sub(1), Ordering::SeqCst);
        self.conflicts.store(1, Ordering::SeqCst);
    }

    /// Fail each of the next `count` balance updates with a conflict.
    pub fn conflict_on_next_updates(&self, count: u32) {
        self.skip_updates.store(0, Ordering::SeqCst);
        self.conflicts.store(count, Ordering::SeqCst);
    }

    /// Make every operation fail with `StoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Sleep this long inside each balance update, after taking the row lock.
    pub fn set_update_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.update_delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Remove all injected faults.
    pub fn clear(&self) {
        self.skip_updates.store(0, Ordering::SeqCst);
        self.conflicts.store(0, Ordering::SeqCst);
        self.unavailable.store(false, Ordering::SeqCst);
        self.update_delay_ms.store(0, Ordering::SeqCst);
    }

    fn check_available(&self) -> LedgerResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::StoreUnavailable(
                "connection refused (injected)".to_string(),
            ));
        }
        Ok(())
    }

    fn take_conflict(&self) -> bool {
        if self.conflicts.load(Ordering::SeqCst) == 0 {
            return false;
        }
        if self
            .skip_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return false;
        }
        self.conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn update_delay(&self) -> Option<Duration> {
        match self.update_delay_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Transaction and write counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub transactions_begun: u64,
    pub transactions_committed: u64,
    pub transactions_rolled_back: u64,
    /// Rows inserted or updated by committed writes, seeding included.
    pub rows_written: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    rows_written: AtomicU64,
}

#[derive(Debug, Default)]
struct Shared {
    tables: RwLock<Tables>,
    row_locks: RowLockTable,
    sequences: Sequences,
    faults: FaultPlan,
    stats: StatsCounters,
}

impl Shared {
    fn committed_account(&self, id: AccountId) -> LedgerResult<Account> {
        self.tables
            .read()
            .accounts
            .get(&id)
            .cloned()
            .ok_or(LedgerError::AccountNotFound(id))
    }

    fn account_exists(&self, id: AccountId) -> bool {
        self.tables.read().accounts.contains_key(&id)
    }
}

/// In-process ledger store. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    shared: Arc<Shared>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultPlan {
        &self.shared.faults
    }

    pub fn row_locks(&self) -> &RowLockTable {
        &self.shared.row_locks
    }

    pub fn stats(&self) -> StoreStats {
        let stats = &self.shared.stats;
        StoreStats {
            transactions_begun: stats.begun.load(Ordering::SeqCst),
            transactions_committed: stats.committed.load(Ordering::SeqCst),
            transactions_rolled_back: stats.rolled_back.load(Ordering::SeqCst),
            rows_written: stats.rows_written.load(Ordering::SeqCst),
        }
    }

    /// Number of committed transfer rows.
    pub fn transfer_count(&self) -> usize {
        self.shared.tables.read().transfers.len()
    }

    /// Number of committed entry rows.
    pub fn entry_count(&self) -> usize {
        self.shared.tables.read().entries.len()
    }

    /// Sum of all committed balances.
    pub fn total_balance(&self) -> i128 {
        self.shared
            .tables
            .read()
            .accounts
            .values()
            .map(|a| a.balance as i128)
            .sum()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> LedgerResult<MemoryTx> {
        self.shared.faults.check_available()?;

        let number = self
            .shared
            .sequences
            .transactions
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        self.shared.stats.begun.fetch_add(1, Ordering::SeqCst);
        trace!(tx = number, "Transaction begun");

        Ok(MemoryTx {
            shared: self.shared.clone(),
            number,
            transfers: Vec::new(),
            entries: Vec::new(),
            balances: HashMap::new(),
            guards: HashMap::new(),
            finished: false,
        })
    }

    async fn create_account(&self, account: NewAccount) -> LedgerResult<Account> {
        self.shared.faults.check_available()?;

        let account = Account {
            id: AccountId::new(next_id(&self.shared.sequences.accounts)),
            owner: account.owner,
            balance: account.balance,
            currency: account.currency,
            created_at: now(),
        };

        self.shared
            .tables
            .write()
            .accounts
            .insert(account.id, account.clone());
        self.shared.stats.rows_written.fetch_add(1, Ordering::SeqCst);

        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> LedgerResult<Account> {
        self.shared.faults.check_available()?;
        self.shared.committed_account(id)
    }

    async fn list_accounts(&self, owner: &Owner, page: Page) -> LedgerResult<Vec<Account>> {
        self.shared.faults.check_available()?;

        let tables = self.shared.tables.read();
        Ok(tables
            .accounts
            .values()
            .filter(|a| &a.owner == owner)
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn get_transfer(&self, id: TransferId) -> LedgerResult<Transfer> {
        self.shared.faults.check_available()?;

        self.shared
            .tables
            .read()
            .transfers
            .get(&id)
            .cloned()
            .ok_or(LedgerError::TransferNotFound(id))
    }

    async fn list_transfers(
        &self,
        from: AccountId,
        to: AccountId,
        page: Page,
    ) -> LedgerResult<Vec<Transfer>> {
        self.shared.faults.check_available()?;

        let tables = self.shared.tables.read();
        Ok(tables
            .transfers
            .values()
            .filter(|t| t.from_account_id == from && t.to_account_id == to)
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn transfers_after(
        &self,
        account_id: AccountId,
        cursor: Cursor,
    ) -> LedgerResult<CursorPage<Transfer>> {
        self.shared.faults.check_available()?;

        let rows: Vec<Transfer> = {
            let tables = self.shared.tables.read();
            tables
                .transfers
                .range(TransferId::new(cursor.after_key() + 1)..)
                .map(|(_, t)| t)
                .filter(|t| t.involves(account_id))
                .take(cursor.limit as usize)
                .cloned()
                .collect()
        };

        Ok(CursorPage::from_rows(rows, cursor))
    }

    async fn get_entry(&self, id: EntryId) -> LedgerResult<Entry> {
        self.shared.faults.check_available()?;

        self.shared
            .tables
            .read()
            .entries
            .get(&id)
            .cloned()
            .ok_or(LedgerError::EntryNotFound(id))
    }

    async fn list_entries(&self, account_id: AccountId, page: Page) -> LedgerResult<Vec<Entry>> {
        self.shared.faults.check_available()?;

        let tables = self.shared.tables.read();
        Ok(tables
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn entries_after(
        &self,
        account_id: AccountId,
        cursor: Cursor,
    ) -> LedgerResult<CursorPage<Entry>> {
        self.shared.faults.check_available()?;

        let rows: Vec<Entry> = {
            let tables = self.shared.tables.read();
            tables
                .entries
                .range(EntryId::new(cursor.after_key() + 1)..)
                .map(|(_, e)| e)
                .filter(|e| e.account_id == account_id)
                .take(cursor.limit as usize)
                .cloned()
                .collect()
        };

        Ok(CursorPage::from_rows(rows, cursor))
    }

    async fn sum_entries(&self, account_id: Option<AccountId>) -> LedgerResult<i128> {
        self.shared.faults.check_available()?;

        let tables = self.shared.tables.read();
        let entries = tables
            .entries
            .values()
            .filter(|e| account_id.map_or(true, |id| e.account_id == id));
        Ok(sum_amounts(entries))
    }
}

/// Transaction on a [`MemoryLedgerStore`].
pub struct MemoryTx {
    shared: Arc<Shared>,
    number: u64,
    transfers: Vec<Transfer>,
    entries: Vec<Entry>,
    /// Balances as updated by this transaction, visible only to it.
    balances: HashMap<AccountId, Account>,
    guards: HashMap<AccountId, RowGuard>,
    finished: bool,
}

impl MemoryTx {
    /// Accounts this transaction holds row locks on.
    pub fn locked_accounts(&self) -> Vec<AccountId> {
        let mut ids: Vec<_> = self.guards.keys().copied().collect();
        ids.sort();
        ids
    }

    fn staged_rows(&self) -> usize {
        self.transfers.len() + self.entries.len() + self.balances.len()
    }
}

impl fmt::Debug for MemoryTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTx")
            .field("number", &self.number)
            .field("transfers", &self.transfers.len())
            .field("entries", &self.entries.len())
            .field("locked", &self.locked_accounts())
            .field("finished", &self.finished)
            .finish()
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_transfer(&mut self, transfer: NewTransfer) -> LedgerResult<Transfer> {
        self.shared.faults.check_available()?;

        for id in [transfer.from_account_id, transfer.to_account_id] {
            if !self.shared.account_exists(id) {
                return Err(LedgerError::AccountNotFound(id));
            }
        }

        let transfer = Transfer {
            id: TransferId::new(next_id(&self.shared.sequences.transfers)),
            from_account_id: transfer.from_account_id,
            to_account_id: transfer.to_account_id,
            amount: transfer.amount,
            created_at: now(),
        };
        self.transfers.push(transfer.clone());

        Ok(transfer)
    }

    async fn insert_entry(&mut self, entry: NewEntry) -> LedgerResult<Entry> {
        self.shared.faults.check_available()?;

        if !self.shared.account_exists(entry.account_id) {
            return Err(LedgerError::AccountNotFound(entry.account_id));
        }

        let entry = Entry {
            id: EntryId::new(next_id(&self.shared.sequences.entries)),
            account_id: entry.account_id,
            amount: entry.amount,
            created_at: now(),
        };
        self.entries.push(entry.clone());

        Ok(entry)
    }

    async fn add_account_balance(
        &mut self,
        account_id: AccountId,
        delta: MinorUnits,
    ) -> LedgerResult<Account> {
        self.shared.faults.check_available()?;

        if self.shared.faults.take_conflict() {
            return Err(LedgerError::StoreConflict(
                "could not serialize access due to concurrent update".to_string(),
            ));
        }

        if !self.guards.contains_key(&account_id) {
            let exists = self.shared.account_exists(account_id);
            if !exists {
                return Err(LedgerError::AccountNotFound(account_id));
            }
            let guard = self.shared.row_locks.acquire(account_id).await;
            self.guards.insert(account_id, guard);
        }

        if let Some(delay) = self.shared.faults.update_delay() {
            tokio::time::sleep(delay).await;
        }

        let current = match self.balances.get(&account_id).cloned() {
            Some(account) => account,
            None => self.shared.committed_account(account_id)?,
        };
        let updated = current.with_delta(delta)?;
        self.balances.insert(account_id, updated.clone());

        Ok(updated)
    }

    async fn commit(mut self) -> LedgerResult<()> {
        self.shared.faults.check_available()?;

        let rows = self.staged_rows() as u64;
        {
            let mut tables = self.shared.tables.write();
            for transfer in self.transfers.drain(..) {
                tables.transfers.insert(transfer.id, transfer);
            }
            for entry in self.entries.drain(..) {
                tables.entries.insert(entry.id, entry);
            }
            for (id, account) in self.balances.drain() {
                tables.accounts.insert(id, account);
            }
        }

        self.finished = true;
        self.shared.stats.committed.fetch_add(1, Ordering::SeqCst);
        self.shared
            .stats
            .rows_written
            .fetch_add(rows, Ordering::SeqCst);
        trace!(tx = self.number, rows, "Transaction committed");

        // Row locks are released when `self` drops, after the new balances
        // are visible.
        Ok(())
    }

    async fn rollback(mut self) -> LedgerResult<()> {
        self.finished = true;
        self.shared.stats.rolled_back.fetch_add(1, Ordering::SeqCst);
        trace!(tx = self.number, "Transaction rolled back");
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.finished {
            self.shared.stats.rolled_back.fetch_add(1, Ordering::SeqCst);
            debug!(
                tx = self.number,
                discarded = self.staged_rows(),
                "Uncommitted transaction dropped, rolled back"
            );
        }
    }
}
