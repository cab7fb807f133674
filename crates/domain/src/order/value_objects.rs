//! Value objects for the order domain.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::OrderError;
use crate::money::{Money, MoneyError};

/// Identifier of the customer placing an order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(String);

impl CustomerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CustomerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Product identifier (SKU).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ProductId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A line on an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderItem {
    pub fn new(
        product_id: impl Into<ProductId>,
        quantity: u32,
        unit_price: Money,
    ) -> Result<Self, OrderError> {
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity { quantity });
        }
        let product_id = product_id.into();
        if product_id.as_str().trim().is_empty() {
            return Err(OrderError::InvalidArgument("product id is required".into()));
        }
        Ok(Self {
            product_id,
            quantity,
            unit_price,
        })
    }

    /// `unit_price * quantity`.
    pub fn total_price(&self) -> Result<Money, MoneyError> {
        self.unit_price.multiply(self.quantity)
    }
}

/// Sums item totals. All items must share one currency.
pub(crate) fn total_of(items: &[OrderItem]) -> Result<Money, OrderError> {
    let Some(first) = items.first() else {
        return Err(OrderError::InvalidArgument("order has no items".into()));
    };
    let mut total = Money::zero(first.unit_price.currency())?;
    for item in items {
        if !item.unit_price.same_currency(&total) {
            return Err(OrderError::CurrencyMismatch {
                expected: total.currency().to_string(),
                found: item.unit_price.currency().to_string(),
            });
        }
        total = total.add(&item.total_price()?)?;
    }
    Ok(total)
}
