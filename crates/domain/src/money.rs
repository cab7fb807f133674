//! Immutable monetary amounts.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("Amount must be a finite number")]
    NonFinite,

    #[error("Currency is required")]
    EmptyCurrency,

    #[error("Currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: String, right: String },
}

/// An amount in a currency.
///
/// The amount is always finite and the currency code is stored uppercase.
/// Operations return new values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMoney")]
pub struct Money {
    amount: f64,
    currency: String,
}

#[derive(Deserialize)]
struct RawMoney {
    amount: f64,
    currency: String,
}

impl TryFrom<RawMoney> for Money {
    type Error = MoneyError;

    fn try_from(raw: RawMoney) -> Result<Self, Self::Error> {
        Money::new(raw.amount, raw.currency)
    }
}

impl Money {
    pub fn new(amount: f64, currency: impl AsRef<str>) -> Result<Self, MoneyError> {
        if !amount.is_finite() {
            return Err(MoneyError::NonFinite);
        }
        let currency = currency.as_ref().trim();
        if currency.is_empty() {
            return Err(MoneyError::EmptyCurrency);
        }
        Ok(Self {
            amount,
            currency: currency.to_uppercase(),
        })
    }

    pub fn zero(currency: impl AsRef<str>) -> Result<Self, MoneyError> {
        Self::new(0.0, currency)
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn is_positive(&self) -> bool {
        self.amount > 0.0
    }

    pub fn same_currency(&self, other: &Money) -> bool {
        self.currency == other.currency
    }

    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        Money::new(self.amount + other.amount, &self.currency)
    }

    pub fn subtract(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        Money::new(self.amount - other.amount, &self.currency)
    }

    pub fn multiply(&self, quantity: u32) -> Result<Money, MoneyError> {
        Money::new(self.amount * f64::from(quantity), &self.currency)
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.same_currency(other) {
            Ok(())
        } else {
            Err(MoneyError::CurrencyMismatch {
                left: self.currency.clone(),
                right: other.currency.clone(),
            })
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {}", self.amount, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_is_normalised() {
        let m = Money::new(10.0, " eur ").unwrap();
        assert_eq!(m.currency(), "EUR");
        assert_eq!(m.to_string(), "10.00 EUR");
    }

    #[test]
    fn rejects_non_finite_and_empty_currency() {
        assert_eq!(Money::new(f64::NAN, "USD"), Err(MoneyError::NonFinite));
        assert_eq!(Money::new(f64::INFINITY, "USD"), Err(MoneyError::NonFinite));
        assert_eq!(Money::new(1.0, "  "), Err(MoneyError::EmptyCurrency));
    }

    #[test]
    fn arithmetic_requires_matching_currency() {
        let usd = Money::new(10.0, "USD").unwrap();
        let eur = Money::new(5.0, "EUR").unwrap();
        assert!(matches!(usd.add(&eur), Err(MoneyError::CurrencyMismatch { .. })));
        assert!(matches!(usd.subtract(&eur), Err(MoneyError::CurrencyMismatch { .. })));

        let sum = usd.add(&Money::new(2.5, "usd").unwrap()).unwrap();
        assert_eq!(sum.amount(), 12.5);
        assert_eq!(usd.subtract(&Money::new(4.0, "USD").unwrap()).unwrap().amount(), 6.0);
    }

    #[test]
    fn multiply_overflowing_to_infinity_fails() {
        let huge = Money::new(f64::MAX, "USD").unwrap();
        assert_eq!(huge.multiply(2), Err(MoneyError::NonFinite));
        assert_eq!(Money::new(15.5, "USD").unwrap().multiply(3).unwrap().amount(), 46.5);
    }

    #[test]
    fn deserialization_validates() {
        let ok: Money = serde_json::from_str(r#"{"amount": 3.0, "currency": "gbp"}"#).unwrap();
        assert_eq!(ok.currency(), "GBP");
        assert!(serde_json::from_str::<Money>(r#"{"amount": 3.0, "currency": ""}"#).is_err());
    }
}
