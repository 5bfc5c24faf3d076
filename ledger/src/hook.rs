//! Post-commit hooks.
//!
//! A hook runs after a transfer transaction has committed. It cannot affect
//! the ledger: a failing hook is reported next to the committed result.

use async_trait::async_trait;
use thiserror::Error;

use crate::transfer::TransferTxResult;

/// Error returned by a post-commit hook.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HookError {
    /// Downstream queue is at capacity.
    #[error("Hook queue full")]
    QueueFull,

    /// Downstream receiver is gone.
    #[error("Hook channel closed")]
    Closed,

    /// Hook-specific failure.
    #[error("Hook failed: {0}")]
    Failed(String),
}

/// Callback invoked once per committed transfer.
#[async_trait]
pub trait PostCommitHook: Send + Sync {
    async fn after_commit(&self, result: &TransferTxResult) -> Result<(), HookError>;
}

/// Result of a transfer transaction run with a post-commit hook.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    /// The committed transfer.
    pub result: TransferTxResult,
    /// Set when the hook failed. The transfer stays committed.
    pub hook_error: Option<HookError>,
}

impl TransferOutcome {
    pub fn hook_failed(&self) -> bool {
        self.hook_error.is_some()
    }
}
