//! Payment-provider event model.

use domain::{Address, OrderStatus};
use serde::Deserialize;

use crate::error::WebhookError;

/// Address as the provider sends it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProviderAddress {
    #[serde(default)]
    pub line1: Option<String>,
    #[serde(default)]
    pub line2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, alias = "postalCode")]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

/// Billing contact attached to a charge or checkout session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BillingDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<ProviderAddress>,
}

impl BillingDetails {
    /// Converts to an order address; `None` when no address was sent.
    pub fn to_address(&self) -> Option<Address> {
        let address = self.address.as_ref()?;
        Some(Address {
            name: self.name.clone(),
            line1: address.line1.clone().unwrap_or_default(),
            line2: address.line2.clone(),
            city: address.city.clone().unwrap_or_default(),
            state: address.state.clone(),
            postal_code: address.postal_code.clone().unwrap_or_default(),
            country: address.country.clone().unwrap_or_default(),
        })
    }
}

/// The payment object of an event.
///
/// Payment intents carry their own id as the reference; charges and checkout
/// sessions point at the intent through `payment_intent`. Both snake_case and
/// camelCase field names are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentObject {
    pub id: String,
    #[serde(default, alias = "paymentIntent")]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default, alias = "billingDetails")]
    pub billing_details: Option<BillingDetails>,
    #[serde(default, alias = "customerDetails")]
    pub customer_details: Option<BillingDetails>,
    #[serde(default, alias = "customerEmail")]
    pub customer_email: Option<String>,
    #[serde(default, alias = "lastPaymentError")]
    pub last_payment_error: Option<serde_json::Value>,
}

impl PaymentObject {
    /// The payment reference the order was placed with.
    pub fn reference(&self) -> &str {
        self.payment_intent.as_deref().unwrap_or(&self.id)
    }

    /// Billing address, from charge billing details or session customer details.
    pub fn billing_address(&self) -> Option<Address> {
        self.billing_details
            .as_ref()
            .and_then(BillingDetails::to_address)
            .or_else(|| {
                self.customer_details
                    .as_ref()
                    .and_then(BillingDetails::to_address)
            })
    }

    /// Payer email: the top-level field first, then the billing contact.
    pub fn email(&self) -> Option<&str> {
        self.customer_email
            .as_deref()
            .or_else(|| self.billing_details.as_ref()?.email.as_deref())
            .or_else(|| self.customer_details.as_ref()?.email.as_deref())
    }

    /// Provider failure message, if any.
    pub fn failure_message(&self) -> Option<&str> {
        self.last_payment_error
            .as_ref()
            .and_then(|e| e.get("message"))
            .and_then(serde_json::Value::as_str)
    }
}

/// A verified provider event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    PaymentSucceeded(PaymentObject),
    ChargeSucceeded(PaymentObject),
    CheckoutCompleted(PaymentObject),
    PaymentFailed(PaymentObject),
    PaymentCanceled(PaymentObject),
    /// Any event type this system does not act on.
    Unhandled { event_type: String },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl ProviderEvent {
    /// Parses a signed webhook body.
    ///
    /// The payment object is `data` itself, or `data.object` when the
    /// provider nests it. Unknown event types parse to `Unhandled` without
    /// looking at the payload.
    pub fn parse(body: &[u8]) -> Result<Self, WebhookError> {
        let envelope: Envelope =
            serde_json::from_slice(body).map_err(|e| WebhookError::Malformed(e.to_string()))?;

        let wrap: fn(PaymentObject) -> ProviderEvent = match envelope.kind.as_str() {
            "payment_intent.succeeded" => ProviderEvent::PaymentSucceeded,
            "charge.succeeded" => ProviderEvent::ChargeSucceeded,
            "checkout.session.completed" => ProviderEvent::CheckoutCompleted,
            "payment_intent.payment_failed" => ProviderEvent::PaymentFailed,
            "payment_intent.canceled" => ProviderEvent::PaymentCanceled,
            _ => {
                return Ok(ProviderEvent::Unhandled {
                    event_type: envelope.kind.clone(),
                });
            }
        };

        let mut data = envelope
            .data
            .ok_or_else(|| WebhookError::Malformed(format!("{} has no data", envelope.kind)))?;
        let data = if data.get("object").is_some_and(serde_json::Value::is_object) {
            data["object"].take()
        } else {
            data
        };
        let object: PaymentObject =
            serde_json::from_value(data).map_err(|e| WebhookError::Malformed(e.to_string()))?;
        Ok(wrap(object))
    }

    /// The provider's type string.
    pub fn event_type(&self) -> &str {
        match self {
            ProviderEvent::PaymentSucceeded(_) => "payment_intent.succeeded",
            ProviderEvent::ChargeSucceeded(_) => "charge.succeeded",
            ProviderEvent::CheckoutCompleted(_) => "checkout.session.completed",
            ProviderEvent::PaymentFailed(_) => "payment_intent.payment_failed",
            ProviderEvent::PaymentCanceled(_) => "payment_intent.canceled",
            ProviderEvent::Unhandled { event_type } => event_type,
        }
    }

    /// Status the order should move to.
    pub fn target_status(&self) -> Option<OrderStatus> {
        match self {
            ProviderEvent::PaymentSucceeded(_)
            | ProviderEvent::ChargeSucceeded(_)
            | ProviderEvent::CheckoutCompleted(_) => Some(OrderStatus::Paid),
            ProviderEvent::PaymentFailed(_) | ProviderEvent::PaymentCanceled(_) => {
                Some(OrderStatus::Cancelled)
            }
            ProviderEvent::Unhandled { .. } => None,
        }
    }

    /// The payment object, for handled events.
    pub fn payment(&self) -> Option<&PaymentObject> {
        match self {
            ProviderEvent::PaymentSucceeded(p)
            | ProviderEvent::ChargeSucceeded(p)
            | ProviderEvent::CheckoutCompleted(p)
            | ProviderEvent::PaymentFailed(p)
            | ProviderEvent::PaymentCanceled(p) => Some(p),
            ProviderEvent::Unhandled { .. } => None,
        }
    }

    /// Reason recorded when this event cancels an order.
    pub fn cancel_reason(&self) -> Option<&'static str> {
        match self {
            ProviderEvent::PaymentFailed(_) => Some("payment_failed"),
            ProviderEvent::PaymentCanceled(_) => Some("payment_canceled"),
            _ => None,
        }
    }
}
