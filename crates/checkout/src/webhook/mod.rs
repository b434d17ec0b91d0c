//! Payment-provider webhooks: signature check, event model and handler.

pub mod event;
pub mod handler;
pub mod signature;

pub use event::{BillingDetails, PaymentObject, ProviderAddress, ProviderEvent};
pub use handler::{Ack, INVENTORY_UNAVAILABLE, OrderEventHandler};
pub use signature::{DEFAULT_TOLERANCE_SECS, SignatureVerifier};
