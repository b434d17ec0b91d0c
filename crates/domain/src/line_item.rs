//! Cart and order line items.

use chrono::{DateTime, Utc};
use common::{Money, ProductId, VariantId};
use serde::{Deserialize, Serialize};

/// Identity of a line: one product, optionally narrowed to one variant.
///
/// A cart never holds two lines with the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineKey {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
}

impl LineKey {
    /// Creates a key for a product with an optional variant.
    pub fn new(product_id: impl Into<ProductId>, variant_id: Option<VariantId>) -> Self {
        Self {
            product_id: product_id.into(),
            variant_id,
        }
    }

    /// Creates a key for a product without a variant.
    pub fn product(product_id: impl Into<ProductId>) -> Self {
        Self::new(product_id, None)
    }
}

impl std::fmt::Display for LineKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.variant_id {
            Some(variant) => write!(f, "{}/{}", self.product_id, variant),
            None => write!(f, "{}", self.product_id),
        }
    }
}

/// One product (optionally one variant) at a quantity, with the price and
/// display metadata captured when it was added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// The product identifier.
    pub product_id: ProductId,

    /// The variant, when the product has variants.
    pub variant_id: Option<VariantId>,

    /// Quantity, always at least one.
    pub quantity: u32,

    /// Unit price snapshot.
    pub unit_price: Money,

    /// Stock level observed when the line was last priced (informational).
    pub stock_at_add: u32,

    /// Human-readable product name.
    pub display_name: String,

    /// Image reference for display.
    pub image_ref: Option<String>,

    /// When price and display metadata were last taken from the catalog.
    pub refreshed_at: DateTime<Utc>,
}

impl LineItem {
    /// Creates a new line item refreshed now.
    pub fn new(
        product_id: impl Into<ProductId>,
        display_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            variant_id: None,
            quantity,
            unit_price,
            stock_at_add: 0,
            display_name: display_name.into(),
            image_ref: None,
            refreshed_at: Utc::now(),
        }
    }

    /// Sets the variant.
    pub fn with_variant(mut self, variant_id: impl Into<VariantId>) -> Self {
        self.variant_id = Some(variant_id.into());
        self
    }

    /// Sets the image reference.
    pub fn with_image(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }

    /// Sets the stock level observed at add time.
    pub fn with_stock_at_add(mut self, stock: u32) -> Self {
        self.stock_at_add = stock;
        self
    }

    /// Sets the refresh timestamp.
    pub fn refreshed_at(mut self, at: DateTime<Utc>) -> Self {
        self.refreshed_at = at;
        self
    }

    /// Returns the line's identity.
    pub fn key(&self) -> LineKey {
        LineKey::new(self.product_id.clone(), self.variant_id.clone())
    }

    /// Returns quantity * unit price.
    pub fn total_price(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }

    /// Copies price and display metadata from a more recently refreshed copy
    /// of the same line, keeping this line's quantity.
    pub fn take_metadata_from(&mut self, other: &LineItem) {
        self.unit_price = other.unit_price;
        self.stock_at_add = other.stock_at_add;
        self.display_name = other.display_name.clone();
        self.image_ref = other.image_ref.clone();
        self.refreshed_at = other.refreshed_at;
    }
}
