//! Order state machine driven by payment-provider webhooks.

use std::sync::Arc;

use cart::CartService;
use chrono::Utc;
use common::OrderId;
use domain::{ItemErrorReason, Order, OrderStatus, StockRequest};
use serde::Serialize;
use store::StatusChange;

use super::event::ProviderEvent;
use super::signature::SignatureVerifier;
use crate::error::WebhookError;
use crate::orders::{OrderService, TransitionOutcome, TransitionRule};
use crate::services::{Notification, NotificationKind, NotificationService};

/// Cancel reason used when paid lines can no longer be fulfilled.
pub const INVENTORY_UNAVAILABLE: &str = "inventory_unavailable";

/// Acknowledgement returned for every verified event.
///
/// All variants are successes from the provider's point of view: the event
/// was received and needs no redelivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Ack {
    /// The order moved; `status` is where it ended up.
    Applied { order_id: OrderId, status: OrderStatus },
    /// The order was already at or past the event's target.
    AlreadyApplied { order_id: OrderId },
    /// The event is not legal for the order's status and was dropped.
    Ignored { order_id: OrderId },
    /// No order has this payment reference.
    UnknownOrder { payment_reference: String },
    /// The event type is not acted on.
    Unhandled { event_type: String },
}

/// Applies verified provider events to orders.
#[derive(Clone)]
pub struct OrderEventHandler {
    verifier: SignatureVerifier,
    orders: OrderService,
    carts: CartService,
    notifications: Arc<dyn NotificationService>,
}

impl OrderEventHandler {
    /// Creates a new handler.
    pub fn new(
        verifier: SignatureVerifier,
        orders: OrderService,
        carts: CartService,
        notifications: Arc<dyn NotificationService>,
    ) -> Self {
        Self {
            verifier,
            orders,
            carts,
            notifications,
        }
    }

    /// Verifies, parses and applies one webhook delivery.
    ///
    /// Safe to call any number of times with the same body: a repeated event
    /// finds the order already at its target and writes nothing.
    #[tracing::instrument(skip_all)]
    pub async fn handle_event(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<Ack, WebhookError> {
        if let Err(e) = self.verifier.verify(body, signature, Utc::now()) {
            metrics::counter!("webhook_events_total", "type" => "rejected").increment(1);
            tracing::warn!(error = %e, "webhook signature rejected");
            return Err(e);
        }

        let event = ProviderEvent::parse(body)?;
        metrics::counter!("webhook_events_total", "type" => event.event_type().to_string())
            .increment(1);

        let (Some(target), Some(payment)) = (event.target_status(), event.payment()) else {
            tracing::debug!(event_type = event.event_type(), "unhandled webhook event");
            return Ok(Ack::Unhandled {
                event_type: event.event_type().to_string(),
            });
        };

        let reference = payment.reference();
        let Some(order) = self.orders.find_by_payment_reference(reference).await? else {
            tracing::info!(payment_reference = reference, "webhook for unknown order");
            return Ok(Ack::UnknownOrder {
                payment_reference: reference.to_string(),
            });
        };

        let billing = payment
            .billing_address()
            .filter(|_| target == OrderStatus::Paid);
        let change = StatusChange {
            reason: event.cancel_reason(),
            billing: billing.as_ref(),
        };
        let outcome = self
            .orders
            .transition(order, target, change, TransitionRule::PaymentEvent)
            .await?;

        match outcome {
            TransitionOutcome::Applied(order) => {
                metrics::counter!("webhook_transitions_total", "status" => target.as_str())
                    .increment(1);
                tracing::info!(
                    order_id = %order.id,
                    payment_reference = reference,
                    status = %order.status,
                    payer_email = payment.email(),
                    "order updated from webhook"
                );
                let order = if order.status == OrderStatus::Paid {
                    self.after_payment(order).await
                } else {
                    order
                };
                Ok(Ack::Applied {
                    order_id: order.id,
                    status: order.status,
                })
            }
            TransitionOutcome::AlreadyApplied(order) => {
                tracing::debug!(order_id = %order.id, "webhook already applied");
                Ok(Ack::AlreadyApplied { order_id: order.id })
            }
            TransitionOutcome::Illegal(order) => Ok(Ack::Ignored { order_id: order.id }),
        }
    }

    /// Work that follows a successful payment. Never fails the event.
    async fn after_payment(&self, order: Order) -> Order {
        if let Some(cancelled) = self.recheck_stock(&order).await {
            return cancelled;
        }

        self.notify(&order, NotificationKind::OrderPaid).await;
        if let Err(e) = self.carts.clear(&order.owner_key).await {
            tracing::warn!(order_id = %order.id, error = %e, "failed to clear cart after payment");
        }
        order
    }

    /// Re-runs the paid lines through the inventory gate.
    ///
    /// Returns the cancelled order when a line can no longer be fulfilled. An
    /// unreachable product service leaves the order paid.
    async fn recheck_stock(&self, order: &Order) -> Option<Order> {
        let requests: Vec<StockRequest> = order.lines.iter().map(StockRequest::from).collect();
        let items = self.carts.gate().validate(&requests).await.err()?;

        if items
            .iter()
            .all(|item| item.reason == ItemErrorReason::ServiceUnavailable)
        {
            tracing::warn!(
                order_id = %order.id,
                "stock re-check skipped, product service unavailable"
            );
            return None;
        }

        tracing::warn!(
            order_id = %order.id,
            failed_items = items.len(),
            "paid order can no longer be fulfilled"
        );
        let outcome = self
            .orders
            .transition(
                order.clone(),
                OrderStatus::Cancelled,
                StatusChange {
                    reason: Some(INVENTORY_UNAVAILABLE),
                    billing: None,
                },
                TransitionRule::Standard,
            )
            .await;

        match outcome {
            Ok(TransitionOutcome::Applied(cancelled)) => {
                metrics::counter!("webhook_transitions_total", "status" => OrderStatus::Cancelled.as_str())
                    .increment(1);
                self.notify(
                    &cancelled,
                    NotificationKind::OrderCancelled {
                        reason: INVENTORY_UNAVAILABLE.to_string(),
                    },
                )
                .await;
                Some(cancelled)
            }
            Ok(other) => Some(other.order().clone()),
            Err(e) => {
                tracing::error!(order_id = %order.id, error = %e, "failed to cancel unfulfillable order");
                None
            }
        }
    }

    async fn notify(&self, order: &Order, kind: NotificationKind) {
        let notification = Notification {
            order_id: order.id,
            order_number: order.order_number.clone(),
            customer_email: order.customer_email.clone(),
            kind,
        };
        if let Err(e) = self.notifications.notify(notification).await {
            tracing::warn!(order_id = %order.id, error = %e, "order notification failed");
        }
    }
}
