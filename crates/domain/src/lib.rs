//! Domain model for the cart/order consistency engine.
//!
//! This crate provides the value types shared by every component:
//! - [`LineItem`] and [`Cart`], with the one-line-per-(product, variant) invariant
//! - [`Order`] and the [`OrderStatus`] state machine
//! - [`ItemError`] and [`StockQuote`] exchanged with the inventory gate

pub mod cart;
pub mod error;
pub mod line_item;
pub mod order;
pub mod stock;

pub use cart::{Cart, ManifestEntry, merge_lines};
pub use error::DomainError;
pub use line_item::{LineItem, LineKey};
pub use order::{Address, Order, OrderStatus, Transition};
pub use stock::{ItemError, ItemErrorReason, StockQuote, StockRequest};
