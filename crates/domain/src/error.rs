//! Domain error types.

use thiserror::Error;

use crate::line_item::LineKey;
use crate::order::OrderStatus;

/// Errors raised by the cart and order model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Quantities must be at least one.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// The cart has no line for the given product/variant.
    #[error("Line not found: {key}")]
    LineNotFound { key: LineKey },

    /// An order cannot be produced from an empty cart.
    #[error("Cart is empty")]
    EmptyCart,

    /// Unknown order status name.
    #[error("Unknown order status: {0}")]
    UnknownStatus(String),

    /// The order status cannot move to the requested status.
    #[error("Invalid state transition: cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
}
