//! Checkout and order lifecycle for the cart/order consistency engine.
//!
//! - [`CheckoutOrchestrator`]: stock-validated payment intent creation
//! - [`OrderService`]: order placement and back-office transitions
//! - [`OrderEventHandler`]: the order state machine driven by provider webhooks
//! - [`WebhookDispatcher`]: bounded retry with a dead-letter record

pub mod error;
pub mod orchestrator;
pub mod orders;
pub mod retry;
pub mod services;
pub mod webhook;

pub use error::{CheckoutError, Result, WebhookError};
pub use orchestrator::{CheckoutOrchestrator, CheckoutSession, METADATA_ITEMS, METADATA_OWNER};
pub use orders::{OrderService, TransitionOutcome, TransitionRule};
pub use retry::{FailedEvent, RetryPolicy, WebhookDispatcher};
pub use services::{
    GatewayError, InMemoryNotificationService, InMemoryPaymentProvider, Notification,
    NotificationError, NotificationKind, NotificationService, PaymentIntent, PaymentProvider,
};
pub use webhook::{Ack, OrderEventHandler, ProviderEvent, SignatureVerifier};
