//! Transfer notifications.
//!
//! [`TransferNotifier`] is a post-commit hook that queues one
//! [`TransferNotification`] per committed transfer on a bounded channel.
//! [`NotificationWorker`] drains the queue.

use async_trait::async_trait;
use bankrupt_common::{AccountId, Currency, MinorUnits, Owner, Timestamp, TransferId};
use bankrupt_ledger::{HookError, PostCommitHook, TransferTxResult};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Notice sent to both parties of a committed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferNotification {
    pub transfer_id: TransferId,
    pub from_account_id: AccountId,
    pub from_owner: Owner,
    pub to_account_id: AccountId,
    pub to_owner: Owner,
    pub amount: MinorUnits,
    pub currency: Currency,
    pub created_at: Timestamp,
}

impl From<&TransferTxResult> for TransferNotification {
    fn from(result: &TransferTxResult) -> Self {
        Self {
            transfer_id: result.transfer.id,
            from_account_id: result.from_account.id,
            from_owner: result.from_account.owner.clone(),
            to_account_id: result.to_account.id,
            to_owner: result.to_account.owner.clone(),
            amount: result.transfer.amount,
            currency: result.from_account.currency.clone(),
            created_at: result.transfer.created_at,
        }
    }
}

/// Post-commit hook that queues transfer notifications.
#[derive(Debug, Clone)]
pub struct TransferNotifier {
    sender: mpsc::Sender<TransferNotification>,
}

impl TransferNotifier {
    /// Create a notifier and the receiving end of its queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TransferNotification>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl PostCommitHook for TransferNotifier {
    async fn after_commit(&self, result: &TransferTxResult) -> Result<(), HookError> {
        // Never wait on a full queue: the caller is holding a response.
        self.sender
            .try_send(TransferNotification::from(result))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => HookError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => HookError::Closed,
            })
    }
}

/// Drains the notification queue.
///
/// Delivery is logging only; mail dispatch lives outside this service.
pub struct NotificationWorker {
    receiver: mpsc::Receiver<TransferNotification>,
    shutdown: watch::Receiver<bool>,
}

impl NotificationWorker {
    pub fn new(
        receiver: mpsc::Receiver<TransferNotification>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self { receiver, shutdown }
    }

    /// Run until shutdown is signalled or every notifier is dropped.
    /// Returns the number of notifications delivered.
    pub async fn run(mut self) -> u64 {
        let mut delivered = 0;

        loop {
            tokio::select! {
                notification = self.receiver.recv() => match notification {
                    Some(notification) => {
                        deliver(&notification);
                        delivered += 1;
                    }
                    None => break,
                },
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Flush what was queued before shutdown.
        while let Ok(notification) = self.receiver.try_recv() {
            deliver(&notification);
            delivered += 1;
        }

        info!(delivered, "Notification worker stopped");
        delivered
    }
}

fn deliver(notification: &TransferNotification) {
    info!(
        transfer_id = %notification.transfer_id,
        from_owner = %notification.from_owner,
        to_owner = %notification.to_owner,
        amount = %notification.currency.to_major(notification.amount),
        currency = %notification.currency,
        "Transfer notification sent"
    );
}
