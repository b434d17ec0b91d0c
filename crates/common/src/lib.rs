//! Shared types for the cart/order consistency engine.
//!
//! Everything here is a plain value type: identifiers for carts, users,
//! orders and catalog entries, plus a decimal [`Money`] amount.

mod money;
mod types;

pub use money::Money;
pub use types::{GuestToken, OrderId, OwnerKey, ProductId, UserId, VariantId};
