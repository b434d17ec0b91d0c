//! HTTP route handlers and shared state.

pub mod cart;
pub mod checkout;
pub mod orders;
pub mod system;
pub mod webhooks;

use ::cart::{CartReconciler, CartService};
use ::checkout::{CheckoutOrchestrator, OrderService, WebhookDispatcher};

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub carts: CartService,
    pub reconciler: CartReconciler,
    pub checkout: CheckoutOrchestrator,
    pub orders: OrderService,
    pub webhooks: WebhookDispatcher,
    /// Name of the durable store backend, reported by `/health`.
    pub backend: &'static str,
}
