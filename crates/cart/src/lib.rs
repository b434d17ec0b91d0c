//! Cart components of the cart/order consistency engine.
//!
//! - [`InventoryGate`]: point-in-time stock validation, fails closed
//! - [`CartCache`] / [`MokaCartCache`]: short-lived cart cache
//! - [`CartService`]: cart reads and single-line mutations
//! - [`CartReconciler`]: guest-to-user merge at login

pub mod cache;
pub mod error;
pub mod inventory;
pub mod reconcile;
pub mod service;
pub mod services;

pub use cache::{CacheError, CartCache, DEFAULT_CART_TTL, MokaCartCache, cache_key};
pub use error::{CartError, Result};
pub use inventory::InventoryGate;
pub use reconcile::{CartReconciler, merge_lines};
pub use service::CartService;
pub use services::{InMemoryProductService, ProductService, ProductServiceError};
