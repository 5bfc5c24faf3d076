//! Currency and ownership checks run before a transfer reaches the engine.
//!
//! The guard only reads from the store. A request it rejects never opens a
//! store transaction.

use std::sync::Arc;

use bankrupt_common::{AccountId, Currency, LedgerError, LedgerResult};
use bankrupt_ledger::{Account, LedgerStore, TransferTxParams};
use tracing::{debug, instrument};

use crate::messages::{Caller, TransferRequest};

/// Check the parts of a request that need no store access: positive
/// amount, account ids the store could have assigned, supported currency
/// and two distinct accounts.
pub fn check_request(request: &TransferRequest) -> LedgerResult<()> {
    if request.amount <= 0 {
        return Err(LedgerError::InvalidAmount(request.amount));
    }

    for id in [request.from_account(), request.to_account()] {
        if !id.is_valid() {
            return Err(LedgerError::InvalidAccountId(id));
        }
    }

    let currency = request.currency();
    if !currency.is_supported() {
        return Err(LedgerError::UnsupportedCurrency(currency));
    }

    if request.from_account_id == request.to_account_id {
        return Err(LedgerError::SameAccount(request.from_account()));
    }

    Ok(())
}

/// Validates transfer requests against stored accounts.
pub struct TransferGuard<S: LedgerStore> {
    store: Arc<S>,
}

impl<S: LedgerStore> TransferGuard<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Validate `request` on behalf of `caller`.
    ///
    /// Checks run in a fixed order: request shape, source account and its
    /// currency, ownership of the source, destination account and its
    /// currency. The first failure is returned.
    #[instrument(
        skip(self, caller, request),
        fields(caller = %caller.username, from = request.from_account_id, to = request.to_account_id)
    )]
    pub async fn check(
        &self,
        caller: &Caller,
        request: &TransferRequest,
    ) -> LedgerResult<TransferTxParams> {
        check_request(request)?;
        let currency = request.currency();

        let from_account = self
            .valid_account(request.from_account(), &currency)
            .await?;

        if !from_account.is_owned_by(&caller.username) {
            return Err(LedgerError::Unauthorized {
                account_id: from_account.id,
                caller: caller.username.clone(),
            });
        }

        let to_account = self.valid_account(request.to_account(), &currency).await?;

        debug!("Transfer request accepted");
        Ok(TransferTxParams::new(
            from_account.id,
            to_account.id,
            request.amount,
        ))
    }

    async fn valid_account(&self, id: AccountId, currency: &Currency) -> LedgerResult<Account> {
        let account = self.store.get_account(id).await?;

        if !account.is_in(currency) {
            return Err(LedgerError::CurrencyMismatch {
                account_id: id,
                expected: currency.clone(),
                actual: account.currency,
            });
        }

        Ok(account)
    }
}
