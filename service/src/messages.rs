//! Transfer request and response messages.

use bankrupt_common::{AccountId, Currency, LedgerError, MinorUnits, Owner};
use bankrupt_ledger::TransferTxResult;
use serde::{Deserialize, Serialize};

/// Authenticated caller. Produced by the authentication layer in front of
/// the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub username: Owner,
}

impl Caller {
    pub fn new(username: impl Into<Owner>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

/// Request to move money between two accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: i64,
    pub to_account_id: i64,
    /// Minor units, must be positive.
    pub amount: MinorUnits,
    /// ISO 4217 code both accounts must hold.
    pub currency: String,
}

impl TransferRequest {
    pub fn new(
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: MinorUnits,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            from_account_id: from_account_id.get(),
            to_account_id: to_account_id.get(),
            amount,
            currency: currency.into(),
        }
    }

    pub fn from_account(&self) -> AccountId {
        AccountId::new(self.from_account_id)
    }

    pub fn to_account(&self) -> AccountId {
        AccountId::new(self.to_account_id)
    }

    pub fn currency(&self) -> Currency {
        Currency::new(self.currency.as_str())
    }
}

/// Successful transfer response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResponse {
    #[serde(flatten)]
    pub result: TransferTxResult,
    /// Attempts it took, the committed one included.
    pub attempts: u32,
    /// Set when the post-commit notification could not be queued. The
    /// transfer is committed regardless.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_error: Option<String>,
}

/// Error body returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl From<&LedgerError> for ErrorResponse {
    fn from(err: &LedgerError) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
            retry_after_ms: err.retry_after_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserializes_from_json() {
        let request: TransferRequest = serde_json::from_str(
            r#"{"from_account_id": 1, "to_account_id": 2, "amount": 10, "currency": "usd"}"#,
        )
        .unwrap();

        assert_eq!(request.from_account(), AccountId::new(1));
        assert_eq!(request.to_account(), AccountId::new(2));
        assert_eq!(request.currency(), Currency::usd());
    }

    #[test]
    fn test_error_response_from_conflict() {
        let err = LedgerError::StoreConflict("deadlock detected".to_string());
        let response = ErrorResponse::from(&err);

        assert_eq!(response.code, "STORE_CONFLICT");
        assert!(response.retryable);
        assert_eq!(response.retry_after_ms, Some(10));
    }

    #[test]
    fn test_error_response_from_mismatch() {
        let err = LedgerError::CurrencyMismatch {
            account_id: AccountId::new(3),
            expected: Currency::usd(),
            actual: Currency::eur(),
        };
        let json = serde_json::to_value(ErrorResponse::from(&err)).unwrap();

        assert_eq!(json["code"], "CURRENCY_MISMATCH");
        assert_eq!(json["retryable"], false);
        assert!(json.get("retry_after_ms").is_none());
    }
}
