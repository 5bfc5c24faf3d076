//! Error types for ledger operations.

use crate::{AccountId, Currency, EntryId, MinorUnits, Owner, TransferId};
use std::fmt;
use thiserror::Error;

/// Broad error category, used by callers to decide between retrying,
/// reporting a bad request, and giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Request rejected before reaching the transfer engine.
    Validation,
    /// Concurrent write hazard detected by the store. Retryable.
    Conflict,
    /// Overflow or a row vanishing mid-transaction. Fatal to the attempt.
    Integrity,
    /// Store or service not reachable.
    Infrastructure,
}

/// Step of the transfer unit of work that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStep {
    BeginTx,
    CreateTransfer,
    CreateFromEntry,
    CreateToEntry,
    UpdateBalance(AccountId),
    Commit,
}

impl fmt::Display for TransferStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStep::BeginTx => write!(f, "begin transaction"),
            TransferStep::CreateTransfer => write!(f, "create transfer"),
            TransferStep::CreateFromEntry => write!(f, "create from entry"),
            TransferStep::CreateToEntry => write!(f, "create to entry"),
            TransferStep::UpdateBalance(id) => write!(f, "update balance of account {}", id),
            TransferStep::Commit => write!(f, "commit"),
        }
    }
}

/// Main error type for ledger operations.
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    /// Transfer amount is not strictly positive.
    #[error("Invalid amount: {0}")]
    InvalidAmount(MinorUnits),

    /// Currency is not accepted by the ledger.
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(Currency),

    /// Account id outside the range the store assigns.
    #[error("Invalid account id: {0}")]
    InvalidAccountId(AccountId),

    /// Source and destination are the same account.
    #[error("Cannot transfer from account {0} to itself")]
    SameAccount(AccountId),

    /// Account does not exist.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Transfer does not exist.
    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    /// Entry does not exist.
    #[error("Entry not found: {0}")]
    EntryNotFound(EntryId),

    /// Account currency differs from the requested currency.
    #[error("Currency mismatch on account {account_id}: expected {expected}, got {actual}")]
    CurrencyMismatch {
        account_id: AccountId,
        expected: Currency,
        actual: Currency,
    },

    /// Caller does not own the source account.
    #[error("Account {account_id} is not owned by {caller}")]
    Unauthorized { account_id: AccountId, caller: Owner },

    /// Applying a delta would overflow the balance.
    #[error("Balance overflow on account {account_id}: {balance} + {delta}")]
    Overflow {
        account_id: AccountId,
        balance: MinorUnits,
        delta: MinorUnits,
    },

    /// Amount cannot be negated into an entry.
    #[error("Amount cannot be negated: {0}")]
    AmountOverflow(MinorUnits),

    /// Store detected a serialization failure or deadlock.
    #[error("Store conflict: {0}")]
    StoreConflict(String),

    /// Store unreachable or failed for infrastructure reasons.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Service is not accepting requests.
    #[error("Service unavailable, retry after {retry_after_ms}ms")]
    ServiceUnavailable { retry_after_ms: u64 },

    /// A transfer step failed; carries the step for diagnosis.
    #[error("Transfer failed at {step}: {source}")]
    Step {
        step: TransferStep,
        #[source]
        source: Box<LedgerError>,
    },
}

impl LedgerError {
    /// Wrap this error with the transfer step that produced it.
    pub fn at(self, step: TransferStep) -> Self {
        LedgerError::Step {
            step,
            source: Box::new(self),
        }
    }

    /// The underlying error, looking through step context.
    pub fn root(&self) -> &LedgerError {
        match self {
            LedgerError::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// The outermost step context, if any.
    pub fn step(&self) -> Option<TransferStep> {
        match self {
            LedgerError::Step { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Get the error category.
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            LedgerError::InvalidAmount(_)
            | LedgerError::InvalidAccountId(_)
            | LedgerError::UnsupportedCurrency(_)
            | LedgerError::SameAccount(_)
            | LedgerError::CurrencyMismatch { .. }
            | LedgerError::Unauthorized { .. }
            | LedgerError::TransferNotFound(_)
            | LedgerError::EntryNotFound(_) => ErrorKind::Validation,
            // Before the engine runs this is a validation failure; once a
            // transaction is open a missing row is an integrity failure.
            LedgerError::AccountNotFound(_) => {
                if self.step().is_some() {
                    ErrorKind::Integrity
                } else {
                    ErrorKind::Validation
                }
            }
            LedgerError::Overflow { .. } | LedgerError::AmountOverflow(_) => ErrorKind::Integrity,
            LedgerError::StoreConflict(_) => ErrorKind::Conflict,
            LedgerError::StoreUnavailable(_) | LedgerError::ServiceUnavailable { .. } => {
                ErrorKind::Infrastructure
            }
            LedgerError::Step { source, .. } => source.kind(),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            LedgerError::StoreConflict(_) | LedgerError::ServiceUnavailable { .. }
        )
    }

    /// Get suggested retry delay in milliseconds.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self.root() {
            LedgerError::ServiceUnavailable { retry_after_ms } => Some(*retry_after_ms),
            LedgerError::StoreConflict(_) => Some(10),
            _ => None,
        }
    }

    /// Get the error code reported to callers.
    pub fn error_code(&self) -> &'static str {
        match self.root() {
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
            LedgerError::InvalidAccountId(_) => "INVALID_ACCOUNT_ID",
            LedgerError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            LedgerError::SameAccount(_) => "SAME_ACCOUNT",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            LedgerError::EntryNotFound(_) => "ENTRY_NOT_FOUND",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::Unauthorized { .. } => "UNAUTHORIZED",
            LedgerError::Overflow { .. } | LedgerError::AmountOverflow(_) => "OVERFLOW",
            LedgerError::StoreConflict(_) => "STORE_CONFLICT",
            LedgerError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            LedgerError::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            LedgerError::Step { source, .. } => source.error_code(),
        }
    }
}

/// Result type alias for ledger operations.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_wrapping_preserves_classification() {
        let err = LedgerError::StoreConflict("could not serialize access".into())
            .at(TransferStep::UpdateBalance(AccountId::new(4)));

        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.error_code(), "STORE_CONFLICT");
        assert_eq!(err.step(), Some(TransferStep::UpdateBalance(AccountId::new(4))));
        assert!(err.to_string().contains("update balance of account 4"));
    }

    #[test]
    fn test_account_not_found_kind_depends_on_context() {
        let before = LedgerError::AccountNotFound(AccountId::new(1));
        assert_eq!(before.kind(), ErrorKind::Validation);

        let during = before.clone().at(TransferStep::UpdateBalance(AccountId::new(1)));
        assert_eq!(during.kind(), ErrorKind::Integrity);
        assert_eq!(during.error_code(), "ACCOUNT_NOT_FOUND");
    }

    #[test]
    fn test_overflow_is_not_retryable() {
        let err = LedgerError::Overflow {
            account_id: AccountId::new(2),
            balance: i64::MAX,
            delta: 1,
        };
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert_eq!(err.retry_after_ms(), None);
    }

    #[test]
    fn test_service_unavailable_retry_hint() {
        let err = LedgerError::ServiceUnavailable { retry_after_ms: 1000 };
        assert!(err.is_retryable());
        assert_eq!(err.retry_after_ms(), Some(1000));
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }
}
