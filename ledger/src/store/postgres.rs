//! PostgreSQL ledger store.

use std::time::Duration;

use async_trait::async_trait;
use bankrupt_common::{
    checked_apply, AccountId, Currency, EntryId, LedgerError, LedgerResult, MinorUnits, Owner,
    Timestamp, TransferId,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use tracing::{info, instrument};

use super::{Cursor, CursorPage, LedgerStore, Page, StoreTx};
use crate::account::{Account, NewAccount};
use crate::journal::{Entry, NewEntry};
use crate::transfer::{NewTransfer, Transfer};

const SCHEMA: &str = include_str!("../../migrations/schema.sql");

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, created_at";

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PgStoreOptions {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PgStoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, FromRow)]
struct AccountRow {
    id: i64,
    owner: String,
    balance: i64,
    currency: String,
    created_at: Timestamp,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            id: AccountId::new(row.id),
            owner: Owner::new(row.owner),
            balance: row.balance,
            currency: Currency::new(row.currency),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TransferRow {
    id: i64,
    from_account_id: i64,
    to_account_id: i64,
    amount: i64,
    created_at: Timestamp,
}

impl From<TransferRow> for Transfer {
    fn from(row: TransferRow) -> Self {
        Transfer {
            id: TransferId::new(row.id),
            from_account_id: AccountId::new(row.from_account_id),
            to_account_id: AccountId::new(row.to_account_id),
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct EntryRow {
    id: i64,
    account_id: i64,
    amount: i64,
    created_at: Timestamp,
}

impl From<EntryRow> for Entry {
    fn from(row: EntryRow) -> Self {
        Entry {
            id: EntryId::new(row.id),
            account_id: AccountId::new(row.account_id),
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

/// Ledger store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Connect a new pool.
    pub async fn connect(database_url: &str, options: PgStoreOptions) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        info!(
            max_connections = options.max_connections,
            "PostgreSQL connection pool established"
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the ledger tables if they do not exist.
    pub async fn apply_schema(&self) -> LedgerResult<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("apply_schema", e))?;
        }
        Ok(())
    }

    pub async fn health_check(&self) -> LedgerResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("health_check", e))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgTx;

    async fn begin(&self) -> LedgerResult<PgTx> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PgTx { tx })
    }

    #[instrument(skip(self, account), fields(owner = %account.owner))]
    async fn create_account(&self, account: NewAccount) -> LedgerResult<Account> {
        let sql = format!(
            "INSERT INTO accounts (owner, balance, currency) VALUES ($1, $2, $3) RETURNING {ACCOUNT_COLUMNS}"
        );
        let row: AccountRow = sqlx::query_as(&sql)
            .bind(account.owner.as_str())
            .bind(account.balance)
            .bind(account.currency.code())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_account", e))?;
        Ok(row.into())
    }

    async fn get_account(&self, id: AccountId) -> LedgerResult<Account> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_account", e))?;
        row.map(Account::from)
            .ok_or(LedgerError::AccountNotFound(id))
    }

    async fn list_accounts(&self, owner: &Owner, page: Page) -> LedgerResult<Vec<Account>> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE owner = $1 ORDER BY id LIMIT $2 OFFSET $3"
        );
        let rows: Vec<AccountRow> = sqlx::query_as(&sql)
            .bind(owner.as_str())
            .bind(page.limit as i64)
            .bind(page.offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_accounts", e))?;
        Ok(rows.into_iter().map(Account::from).collect())
    }

    async fn get_transfer(&self, id: TransferId) -> LedgerResult<Transfer> {
        let sql = format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = $1");
        let row: Option<TransferRow> = sqlx::query_as(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_transfer", e))?;
        row.map(Transfer::from)
            .ok_or(LedgerError::TransferNotFound(id))
    }

    async fn list_transfers(
        &self,
        from: AccountId,
        to: AccountId,
        page: Page,
    ) -> LedgerResult<Vec<Transfer>> {
        let sql = format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers \
             WHERE from_account_id = $1 AND to_account_id = $2 \
             ORDER BY id LIMIT $3 OFFSET $4"
        );
        let rows: Vec<TransferRow> = sqlx::query_as(&sql)
            .bind(from.get())
            .bind(to.get())
            .bind(page.limit as i64)
            .bind(page.offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_transfers", e))?;
        Ok(rows.into_iter().map(Transfer::from).collect())
    }

    async fn transfers_after(
        &self,
        account_id: AccountId,
        cursor: Cursor,
    ) -> LedgerResult<CursorPage<Transfer>> {
        let sql = format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers \
             WHERE (from_account_id = $1 OR to_account_id = $1) AND id > $2 \
             ORDER BY id LIMIT $3"
        );
        let rows: Vec<TransferRow> = sqlx::query_as(&sql)
            .bind(account_id.get())
            .bind(cursor.after_key())
            .bind(cursor.limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("transfers_after", e))?;
        Ok(CursorPage::from_rows(
            rows.into_iter().map(Transfer::from).collect(),
            cursor,
        ))
    }

    async fn get_entry(&self, id: EntryId) -> LedgerResult<Entry> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = $1");
        let row: Option<EntryRow> = sqlx::query_as(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_entry", e))?;
        row.map(Entry::from).ok_or(LedgerError::EntryNotFound(id))
    }

    async fn list_entries(&self, account_id: AccountId, page: Page) -> LedgerResult<Vec<Entry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE account_id = $1 ORDER BY id LIMIT $2 OFFSET $3"
        );
        let rows: Vec<EntryRow> = sqlx::query_as(&sql)
            .bind(account_id.get())
            .bind(page.limit as i64)
            .bind(page.offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_entries", e))?;
        Ok(rows.into_iter().map(Entry::from).collect())
    }

    async fn entries_after(
        &self,
        account_id: AccountId,
        cursor: Cursor,
    ) -> LedgerResult<CursorPage<Entry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE account_id = $1 AND id > $2 ORDER BY id LIMIT $3"
        );
        let rows: Vec<EntryRow> = sqlx::query_as(&sql)
            .bind(account_id.get())
            .bind(cursor.after_key())
            .bind(cursor.limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("entries_after", e))?;
        Ok(CursorPage::from_rows(
            rows.into_iter().map(Entry::from).collect(),
            cursor,
        ))
    }

    async fn sum_entries(&self, account_id: Option<AccountId>) -> LedgerResult<i128> {
        let sum: Option<Decimal> = match account_id {
            Some(id) => sqlx::query_scalar::<_, Option<Decimal>>("SELECT SUM(amount) FROM entries WHERE account_id = $1")
                .bind(id.get())
                .fetch_one(&self.pool)
                .await,
            None => sqlx::query_scalar::<_, Option<Decimal>>("SELECT SUM(amount) FROM entries")
                .fetch_one(&self.pool)
                .await,
        }
        .map_err(|e| map_sqlx_error("sum_entries", e))?;

        sum.unwrap_or(Decimal::ZERO).to_i128().ok_or_else(|| {
            LedgerError::StoreUnavailable("entry sum out of range".to_string())
        })
    }
}

/// Transaction on a [`PgLedgerStore`]. Rolled back by sqlx if dropped
/// without commit.
#[derive(Debug)]
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn insert_transfer(&mut self, transfer: NewTransfer) -> LedgerResult<Transfer> {
        let sql = format!(
            "INSERT INTO transfers (from_account_id, to_account_id, amount) \
             VALUES ($1, $2, $3) RETURNING {TRANSFER_COLUMNS}"
        );
        let row: TransferRow = sqlx::query_as(&sql)
            .bind(transfer.from_account_id.get())
            .bind(transfer.to_account_id.get())
            .bind(transfer.amount)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| match violated_constraint(&e).as_deref() {
                Some("transfers_from_account_id_fkey") => {
                    LedgerError::AccountNotFound(transfer.from_account_id)
                }
                Some("transfers_to_account_id_fkey") => {
                    LedgerError::AccountNotFound(transfer.to_account_id)
                }
                _ => map_sqlx_error("insert_transfer", e),
            })?;
        Ok(row.into())
    }

    async fn insert_entry(&mut self, entry: NewEntry) -> LedgerResult<Entry> {
        let sql = format!(
            "INSERT INTO entries (account_id, amount) VALUES ($1, $2) RETURNING {ENTRY_COLUMNS}"
        );
        let row: EntryRow = sqlx::query_as(&sql)
            .bind(entry.account_id.get())
            .bind(entry.amount)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| match violated_constraint(&e).as_deref() {
                Some("entries_account_id_fkey") => LedgerError::AccountNotFound(entry.account_id),
                _ => map_sqlx_error("insert_entry", e),
            })?;
        Ok(row.into())
    }

    async fn add_account_balance(
        &mut self,
        account_id: AccountId,
        delta: MinorUnits,
    ) -> LedgerResult<Account> {
        // Take the row lock first so the overflow check sees the balance the
        // update will modify.
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM accounts WHERE id = $1 FOR NO KEY UPDATE")
                .bind(account_id.get())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("lock_account", e))?;
        let balance = balance.ok_or(LedgerError::AccountNotFound(account_id))?;

        let overflow = LedgerError::Overflow {
            account_id,
            balance,
            delta,
        };
        if checked_apply(balance, delta).is_none() {
            return Err(overflow);
        }

        let sql = format!(
            "UPDATE accounts SET balance = balance + $2 WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
        );
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(account_id.get())
            .bind(delta)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| match sqlstate(&e).as_deref() {
                Some("22003") => overflow,
                _ => map_sqlx_error("add_account_balance", e),
            })?;

        row.map(Account::from)
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    async fn commit(self) -> LedgerResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> LedgerResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c.into_owned()),
        _ => None,
    }
}

/// Name of the foreign key a `23503` error violated.
fn violated_constraint(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23503") => {
            db_err.constraint().map(str::to_owned)
        }
        _ => None,
    }
}

/// Map sqlx errors to ledger errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => LedgerError::StoreConflict(msg),
                _ => LedgerError::StoreUnavailable(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            LedgerError::StoreUnavailable(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            LedgerError::StoreUnavailable(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            LedgerError::StoreUnavailable(format!("unexpected row not found in {}", operation))
        }
        _ => LedgerError::StoreUnavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}
