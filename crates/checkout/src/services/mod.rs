//! External service traits and in-memory implementations.

pub mod notification;
pub mod payment;

pub use notification::{
    InMemoryNotificationService, Notification, NotificationError, NotificationKind,
    NotificationService,
};
pub use payment::{GatewayError, InMemoryPaymentProvider, PaymentIntent, PaymentProvider};
