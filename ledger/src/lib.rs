//! Bankrupt Ledger
//!
//! Accounts, transfers and entries, the stores that hold them, and the
//! engine that moves money between accounts in one atomic transaction.

pub mod account;
pub mod balance;
pub mod engine;
pub mod hook;
pub mod journal;
pub mod store;
pub mod transfer;

pub use account::{Account, NewAccount};
pub use balance::{BalanceChange, BalanceChangeType, BalanceDelta, BalanceUpdate, BalanceUpdater};
pub use engine::{lock_order, LedgerEngine};
pub use hook::{HookError, PostCommitHook, TransferOutcome};
pub use journal::{Entry, NewEntry};
pub use store::{
    Cursor, CursorPage, FaultPlan, LedgerStore, MemoryLedgerStore, Page, PgLedgerStore,
    PgStoreOptions, StoreStats, StoreTx,
};
pub use transfer::{NewTransfer, Transfer, TransferTxParams, TransferTxResult};
