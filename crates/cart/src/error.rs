//! Cart error types.

use domain::{DomainError, ItemError, LineKey};
use store::StoreError;
use thiserror::Error;

/// Errors returned by cart reads, mutations and merges.
#[derive(Debug, Error)]
pub enum CartError {
    /// The request was malformed (e.g. zero quantity on add).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// One or more items cannot be fulfilled from current stock.
    #[error("Stock conflict on {} item(s)", .0.len())]
    StockConflict(Vec<ItemError>),

    /// The line does not exist in the cart.
    #[error("Line not found: {0}")]
    LineNotFound(LineKey),

    /// The durable store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl CartError {
    /// Returns true if the caller may retry the same request.
    pub fn is_transient(&self) -> bool {
        matches!(self, CartError::Store(e) if e.is_transient())
    }
}

impl From<DomainError> for CartError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::LineNotFound { key } => CartError::LineNotFound(key),
            other => CartError::Validation(other.to_string()),
        }
    }
}

/// Convenience type alias for cart results.
pub type Result<T> = std::result::Result<T, CartError>;
