use serde::{Deserialize, Serialize};

/// Current state of a single product.
///
/// Records are never patched: every update event carries the full desired
/// state and replaces whatever was stored before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: String,
    pub price: f64,
    pub stock: i64,
}

/// Body of `POST /events` as it arrives on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductUpdate {
    pub product_id: String,
    pub price: f64,
    pub stock: i64,
}

/// Whether negative stock levels are a valid state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StockPolicy {
    #[default]
    NonNegative,
    AllowBackorders,
}

impl StockPolicy {
    pub fn from_allow_backorders(allow: bool) -> Self {
        if allow {
            Self::AllowBackorders
        } else {
            Self::NonNegative
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("product_id must not be empty")]
    EmptyProductId,

    #[error("price must be a finite, non-negative number (got {0})")]
    InvalidPrice(f64),

    #[error("stock must not be negative (got {0})")]
    NegativeStock(i64),
}

impl ProductUpdate {
    /// Checks the update against the record constraints and turns it into the
    /// record the workers will store.
    pub fn into_product(self, policy: StockPolicy) -> Result<Product, ValidationError> {
        if self.product_id.trim().is_empty() {
            return Err(ValidationError::EmptyProductId);
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(ValidationError::InvalidPrice(self.price));
        }
        if self.stock < 0 && policy == StockPolicy::NonNegative {
            return Err(ValidationError::NegativeStock(self.stock));
        }

        Ok(Product {
            product_id: self.product_id,
            price: self.price,
            stock: self.stock,
        })
    }
}
