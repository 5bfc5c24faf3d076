//! Currency codes and minor-unit amounts.
//!
//! Balances and transfer amounts are integers in the currency's minor unit
//! (cents for USD). All arithmetic on them is checked; an overflow is an
//! error, never a wrap.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Amount in minor units.
pub type MinorUnits = i64;

/// ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Currencies the ledger accepts for transfers.
    pub const SUPPORTED: [&'static str; 3] = ["USD", "EUR", "CAD"];

    /// Create a new currency from code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Check if the ledger accepts this currency.
    pub fn is_supported(&self) -> bool {
        Self::SUPPORTED.contains(&self.0.as_str())
    }

    /// Get the standard decimal places for this currency.
    pub fn decimal_places(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "VND" => 0,
            "BHD" | "KWD" | "OMR" => 3,
            _ => 2,
        }
    }

    /// Render a minor-unit amount in major units, e.g. `1050` USD as `10.50`.
    pub fn to_major(&self, minor: MinorUnits) -> Decimal {
        Decimal::new(minor, self.decimal_places())
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn cad() -> Self {
        Self::new("CAD")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Apply a signed delta to a balance, returning `None` on overflow.
pub fn checked_apply(balance: MinorUnits, delta: MinorUnits) -> Option<MinorUnits> {
    balance.checked_add(delta)
}

/// Negate an amount, returning `None` for `i64::MIN`.
pub fn checked_negate(amount: MinorUnits) -> Option<MinorUnits> {
    amount.checked_neg()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_supported_currencies() {
        assert!(Currency::usd().is_supported());
        assert!(Currency::new("cad").is_supported());
        assert!(!Currency::new("GBP").is_supported());
    }

    #[test]
    fn test_to_major() {
        assert_eq!(Currency::usd().to_major(1050), Decimal::new(1050, 2));
        assert_eq!(Currency::new("JPY").to_major(1050), Decimal::from(1050));
    }

    #[test]
    fn test_checked_arithmetic() {
        assert_eq!(checked_apply(100, -30), Some(70));
        assert_eq!(checked_apply(i64::MAX, 1), None);
        assert_eq!(checked_apply(i64::MIN, -1), None);
        assert_eq!(checked_negate(i64::MIN), None);
        assert_eq!(checked_negate(25), Some(-25));
    }

    proptest! {
        #[test]
        fn prop_negation_cancels(amount in (i64::MIN + 1)..=i64::MAX) {
            let neg = checked_negate(amount).unwrap();
            prop_assert_eq!(amount as i128 + neg as i128, 0);
        }
    }
}
