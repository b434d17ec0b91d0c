//! Checkout and webhook error types.

use cart::CartError;
use common::OrderId;
use domain::{ItemError, OrderStatus};
use store::StoreError;
use thiserror::Error;

use crate::services::GatewayError;

/// Errors returned by checkout and order operations.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The request cannot be processed as given (e.g. empty cart).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// One or more cart lines cannot be fulfilled from current stock.
    #[error("Stock conflict on {} item(s)", .0.len())]
    StockConflict(Vec<ItemError>),

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The requested status change is not allowed from the current status.
    #[error("Cannot move order from {from} to {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    /// An order already exists for this payment reference.
    #[error("An order already exists for payment {0}")]
    DuplicateOrder(String),

    /// The payment provider rejected or failed the request.
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The durable store failed.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl CheckoutError {
    /// Returns true if the caller may retry the same request.
    pub fn is_transient(&self) -> bool {
        matches!(self, CheckoutError::Store(e) if e.is_transient())
    }
}

impl From<StoreError> for CheckoutError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicatePaymentReference(reference) => {
                CheckoutError::DuplicateOrder(reference)
            }
            other => CheckoutError::Store(other),
        }
    }
}

impl From<CartError> for CheckoutError {
    fn from(e: CartError) -> Self {
        match e {
            CartError::Validation(msg) => CheckoutError::Validation(msg),
            CartError::StockConflict(items) => CheckoutError::StockConflict(items),
            CartError::LineNotFound(key) => {
                CheckoutError::Validation(format!("line {key} is not in the cart"))
            }
            CartError::Store(e) => CheckoutError::from(e),
        }
    }
}

impl From<GatewayError> for CheckoutError {
    fn from(e: GatewayError) -> Self {
        CheckoutError::Gateway(e.0)
    }
}

/// Errors returned while handling a payment-provider webhook.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WebhookError {
    /// Signature missing, malformed, stale or wrong. Never retried.
    #[error("Rejected signature: {0}")]
    RejectedSignature(String),

    /// The signed body is not a provider event.
    #[error("Malformed event: {0}")]
    Malformed(String),

    /// A transient infrastructure failure; the event may be retried.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// A non-transient infrastructure failure.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Every retry attempt failed.
    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },
}

impl WebhookError {
    /// Returns true if the dispatcher should retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WebhookError::Transient(_))
    }
}

impl From<StoreError> for WebhookError {
    fn from(e: StoreError) -> Self {
        if e.is_transient() {
            WebhookError::Transient(e.to_string())
        } else {
            WebhookError::Internal(e.to_string())
        }
    }
}

impl From<CheckoutError> for WebhookError {
    fn from(e: CheckoutError) -> Self {
        match e {
            CheckoutError::Store(store) => WebhookError::from(store),
            other => WebhookError::Internal(other.to_string()),
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
