//! Order record.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, OwnerKey};
use serde::{Deserialize, Serialize};

use crate::cart::Cart;
use crate::error::DomainError;
use crate::line_item::LineItem;

use super::OrderStatus;

/// A postal address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub country: String,
}

/// An order placed from a cart.
///
/// Lines and total are frozen copies taken at checkout; later catalog price
/// changes do not affect them. Only `status`, `billing_address`,
/// `cancel_reason` and `updated_at` change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub owner_key: OwnerKey,
    pub status: OrderStatus,
    pub total: Money,
    pub lines: Vec<LineItem>,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub payment_reference: String,
    pub customer_email: String,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Snapshots a cart into a new pending order.
    pub fn from_cart(
        cart: &Cart,
        payment_reference: impl Into<String>,
        shipping_address: Address,
        customer_email: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if cart.is_empty() {
            return Err(DomainError::EmptyCart);
        }

        let id = OrderId::new();
        Ok(Self {
            id,
            order_number: Self::order_number_for(id, now),
            owner_key: cart.owner_key().clone(),
            status: OrderStatus::Pending,
            total: cart.total(),
            lines: cart.lines().to_vec(),
            shipping_address,
            billing_address: None,
            payment_reference: payment_reference.into(),
            customer_email: customer_email.into(),
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Human-facing order number: `ORD-<date>-<first 8 hex digits of the id>`.
    pub fn order_number_for(id: OrderId, at: DateTime<Utc>) -> String {
        let simple = id.as_uuid().simple().to_string().to_ascii_uppercase();
        format!("ORD-{}-{}", at.format("%Y%m%d"), &simple[..8])
    }

    /// Returns the total quantity across all lines.
    pub fn total_quantity(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }
}
