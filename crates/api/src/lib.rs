//! HTTP API server for the cart/order consistency engine.
//!
//! Exposes cart, checkout, order and payment-webhook endpoints, with
//! structured logging (tracing), Prometheus metrics and per-owner rate limits.

pub mod config;
pub mod error;
pub mod identity;
pub mod rate_limit;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use cart::{
    CartReconciler, CartService, InMemoryProductService, InventoryGate, MokaCartCache,
    ProductService,
};
use checkout::{
    CheckoutOrchestrator, InMemoryNotificationService, InMemoryPaymentProvider,
    NotificationService, OrderEventHandler, OrderService, PaymentProvider, RetryPolicy,
    SignatureVerifier, WebhookDispatcher,
};
use common::Money;
use domain::LineKey;
use metrics_exporter_prometheus::PrometheusHandle;
use store::{CartStore, InMemoryCartStore, InMemoryOrderStore, OrderStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use rate_limit::RateLimiterLayer;
use routes::AppState;

/// Stores and external services the application runs against.
pub struct Backends {
    pub cart_store: Arc<dyn CartStore>,
    pub order_store: Arc<dyn OrderStore>,
    pub products: Arc<dyn ProductService>,
    pub payments: Arc<dyn PaymentProvider>,
    pub notifications: Arc<dyn NotificationService>,
    /// Reported by `/health`.
    pub name: &'static str,
}

impl Backends {
    /// In-memory stores and mock services around the given catalog.
    pub fn in_memory(products: InMemoryProductService) -> Self {
        Self {
            cart_store: Arc::new(InMemoryCartStore::new()),
            order_store: Arc::new(InMemoryOrderStore::new()),
            products: Arc::new(products),
            payments: Arc::new(InMemoryPaymentProvider::new()),
            notifications: Arc::new(InMemoryNotificationService::new()),
            name: "memory",
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
///
/// Owner-scoped routes (cart, checkout, orders) sit behind `limiter`.
pub fn create_app(
    state: Arc<AppState>,
    metrics_handle: PrometheusHandle,
    limiter: RateLimiterLayer,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    let owner_routes = Router::new()
        .route(
            "/cart",
            get(routes::cart::get).delete(routes::cart::clear),
        )
        .route("/cart/items", post(routes::cart::add_item))
        .route(
            "/cart/items/{product_id}",
            put(routes::cart::set_quantity).delete(routes::cart::remove_item),
        )
        .route("/cart/merge", post(routes::cart::merge))
        .route("/checkout", post(routes::checkout::begin))
        .route("/orders", post(routes::orders::place))
        .route("/orders/{id}", get(routes::orders::get))
        .layer(limiter);

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/admin/orders/{id}/status", post(routes::orders::advance))
        .route("/admin/webhooks/failed", get(routes::webhooks::failed))
        .route("/webhooks/payments", post(routes::webhooks::receive))
        .merge(owner_routes)
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires services over the given backends.
pub fn build_state(config: &Config, backends: Backends) -> Arc<AppState> {
    let cache = MokaCartCache::new(config.cart_cache_capacity);
    let carts = CartService::new(
        backends.cart_store,
        Arc::new(cache),
        InventoryGate::new(backends.products),
    )
    .with_ttl(config.cart_cache_ttl);

    let orders = OrderService::new(backends.order_store, carts.clone());
    let handler = OrderEventHandler::new(
        SignatureVerifier::new(config.webhook_secret.clone()),
        orders.clone(),
        carts.clone(),
        backends.notifications,
    );
    let policy = RetryPolicy {
        max_attempts: config.webhook_max_attempts,
        ..RetryPolicy::default()
    };

    Arc::new(AppState {
        reconciler: CartReconciler::new(carts.clone()),
        checkout: CheckoutOrchestrator::new(carts.clone(), backends.payments, &config.currency),
        webhooks: WebhookDispatcher::new(handler, policy),
        carts,
        orders,
        backend: backends.name,
    })
}

/// Creates the default application state with in-memory stores and mock services.
pub fn create_default_state(config: &Config) -> Arc<AppState> {
    build_state(config, Backends::in_memory(demo_catalog()))
}

/// A small catalog for local runs.
pub fn demo_catalog() -> InMemoryProductService {
    let products = InMemoryProductService::new();
    products.put_product(LineKey::product("mug"), "Stoneware Mug", Money::from_cents(1250), 40);
    products.put_product(LineKey::product("poster"), "Poster", Money::from_cents(1800), 15);
    for (size, stock) in [("S", 10), ("M", 25), ("L", 5)] {
        products.put_product(
            LineKey::new("tee", Some(size.into())),
            format!("Tee ({size})"),
            Money::from_cents(2400),
            stock,
        );
    }
    products
}
