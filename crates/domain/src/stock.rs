//! Stock quotes and per-item validation failures.

use common::{Money, ProductId, VariantId};
use serde::{Deserialize, Serialize};

use crate::line_item::{LineItem, LineKey};

/// Current stock and price for one product/variant, as reported by the
/// product service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockQuote {
    pub stock: u32,
    pub price: Money,
    pub display_name: String,
    pub image_ref: Option<String>,
}

/// A quantity to check against stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRequest {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
}

impl StockRequest {
    /// Creates a request for a product/variant at a quantity.
    pub fn new(key: LineKey, quantity: u32) -> Self {
        Self {
            product_id: key.product_id,
            variant_id: key.variant_id,
            quantity,
        }
    }

    /// Returns the line key this request targets.
    pub fn key(&self) -> LineKey {
        LineKey::new(self.product_id.clone(), self.variant_id.clone())
    }
}

impl From<&LineItem> for StockRequest {
    fn from(line: &LineItem) -> Self {
        Self::new(line.key(), line.quantity)
    }
}

/// Why an item failed stock validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ItemErrorReason {
    /// The product or variant does not exist.
    NotFound,
    /// Requested quantity exceeds current stock.
    InsufficientStock { available: u32 },
    /// The product service could not be reached; the gate fails closed.
    ServiceUnavailable,
}

/// A single item that cannot be fulfilled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub requested: u32,
    pub reason: ItemErrorReason,
}

impl ItemError {
    /// Creates an item error for a request.
    pub fn new(request: &StockRequest, reason: ItemErrorReason) -> Self {
        Self {
            product_id: request.product_id.clone(),
            variant_id: request.variant_id.clone(),
            requested: request.quantity,
            reason,
        }
    }

    /// Returns the line key of the failing item.
    pub fn key(&self) -> LineKey {
        LineKey::new(self.product_id.clone(), self.variant_id.clone())
    }
}

impl std::fmt::Display for ItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reason {
            ItemErrorReason::NotFound => write!(f, "{} is no longer available", self.key()),
            ItemErrorReason::InsufficientStock { available } => write!(
                f,
                "{}: requested {}, only {} in stock",
                self.key(),
                self.requested,
                available
            ),
            ItemErrorReason::ServiceUnavailable => {
                write!(f, "{}: stock could not be verified", self.key())
            }
        }
    }
}
