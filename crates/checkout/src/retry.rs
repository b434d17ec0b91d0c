//! Bounded retry around the webhook handler, with a dead-letter record.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::WebhookError;
use crate::webhook::{Ack, OrderEventHandler};

/// Capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based):
    /// `min(base * 2^(attempt-1), max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// A delivery that could not be applied after every retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedEvent {
    /// Raw body as received, for replay.
    pub body: String,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

/// Runs the handler under a [`RetryPolicy`].
///
/// Only transient failures are retried. When attempts run out the delivery
/// is recorded as a [`FailedEvent`] for manual reconciliation.
#[derive(Clone)]
pub struct WebhookDispatcher {
    handler: Arc<OrderEventHandler>,
    policy: RetryPolicy,
    failed: Arc<RwLock<Vec<FailedEvent>>>,
}

impl WebhookDispatcher {
    /// Creates a dispatcher.
    pub fn new(handler: OrderEventHandler, policy: RetryPolicy) -> Self {
        Self {
            handler: Arc::new(handler),
            policy,
            failed: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Returns the retry policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Handles one delivery, retrying transient failures.
    #[tracing::instrument(skip_all)]
    pub async fn dispatch(&self, body: &[u8], signature: Option<&str>) -> Result<Ack, WebhookError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match self.handler.handle_event(body, signature).await {
                Ok(ack) => return Ok(ack),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt >= max_attempts {
                return Err(self.dead_letter(body, error, attempt).await);
            }

            let delay = self.policy.delay_for(attempt);
            metrics::counter!("webhook_retries_total").increment(1);
            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "webhook handling failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Returns every delivery that exhausted its retries, oldest first.
    pub async fn failed_events(&self) -> Vec<FailedEvent> {
        self.failed.read().await.clone()
    }

    async fn dead_letter(&self, body: &[u8], error: WebhookError, attempts: u32) -> WebhookError {
        metrics::counter!("webhook_events_failed_total").increment(1);
        tracing::error!(attempts, error = %error, "webhook retries exhausted");

        self.failed.write().await.push(FailedEvent {
            body: String::from_utf8_lossy(body).into_owned(),
            error: error.to_string(),
            attempts,
            failed_at: Utc::now(),
        });

        WebhookError::RetryExhausted {
            attempts,
            last_error: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use cart::{CartService, InMemoryProductService, InventoryGate, MokaCartCache};
    use common::{Money, OwnerKey};
    use domain::{Address, LineKey};
    use secrecy::SecretString;
    use store::{InMemoryCartStore, InMemoryOrderStore};

    use super::*;
    use crate::orders::OrderService;
    use crate::services::InMemoryNotificationService;
    use crate::webhook::SignatureVerifier;

    #[test]
    fn test_delay_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(7), Duration::from_secs(5));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(5));
    }

    struct Fixture {
        dispatcher: WebhookDispatcher,
        verifier: SignatureVerifier,
        order_store: InMemoryOrderStore,
        orders: OrderService,
    }

    async fn fixture() -> Fixture {
        let products = InMemoryProductService::new();
        products.put_product(LineKey::product("p1"), "Mug", Money::from_cents(500), 10);
        let carts = CartService::new(
            Arc::new(InMemoryCartStore::new()),
            Arc::new(MokaCartCache::default()),
            InventoryGate::new(Arc::new(products)),
        );
        let order_store = InMemoryOrderStore::new();
        let orders = OrderService::new(Arc::new(order_store.clone()), carts.clone());
        let verifier = SignatureVerifier::new(SecretString::from("whsec_retry".to_string()));
        let handler = OrderEventHandler::new(
            verifier.clone(),
            orders.clone(),
            carts.clone(),
            Arc::new(InMemoryNotificationService::new()),
        );

        let owner = OwnerKey::guest("retry");
        carts.add_item(&owner, LineKey::product("p1"), 1).await.unwrap();
        orders
            .place_order(&owner, "pi_retry", Address::default(), "r@example.com")
            .await
            .unwrap();

        Fixture {
            dispatcher: WebhookDispatcher::new(handler, RetryPolicy::default()),
            verifier,
            order_store,
            orders,
        }
    }

    fn signed(verifier: &SignatureVerifier) -> (Vec<u8>, String) {
        let body = serde_json::to_vec(&serde_json::json!({
            "type": "payment_intent.succeeded",
            "data": {"object": {"id": "pi_retry"}}
        }))
        .unwrap();
        let header = verifier.sign(&body, Utc::now().timestamp()).unwrap();
        (body, header)
    }

    #[tokio::test]
    async fn test_success_needs_no_retry() {
        let f = fixture().await;
        let (body, header) = signed(&f.verifier);

        let ack = f.dispatcher.dispatch(&body, Some(&header)).await.unwrap();
        assert!(matches!(ack, Ack::Applied { .. }));
        assert!(f.dispatcher.failed_events().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_records_failed_event() {
        let f = fixture().await;
        let (body, header) = signed(&f.verifier);
        f.order_store.set_unavailable(true);

        let err = f.dispatcher.dispatch(&body, Some(&header)).await.unwrap_err();

        assert!(matches!(err, WebhookError::RetryExhausted { attempts: 5, .. }));
        let failed = f.dispatcher.failed_events().await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 5);
        assert_eq!(failed[0].body.as_bytes(), body.as_slice());
    }

    #[tokio::test]
    async fn test_rejected_signature_is_not_retried() {
        let f = fixture().await;
        let (body, _) = signed(&f.verifier);

        let err = f
            .dispatcher
            .dispatch(&body, Some("t=0,v1=ff"))
            .await
            .unwrap_err();

        assert!(matches!(err, WebhookError::RejectedSignature(_)));
        assert!(f.dispatcher.failed_events().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_when_store_comes_back() {
        let f = fixture().await;
        let (body, header) = signed(&f.verifier);
        f.order_store.set_unavailable(true);

        let store = f.order_store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            store.set_unavailable(false);
        });

        let ack = f.dispatcher.dispatch(&body, Some(&header)).await.unwrap();
        assert!(matches!(ack, Ack::Applied { .. }));

        let order = f
            .orders
            .find_by_payment_reference("pi_retry")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, domain::OrderStatus::Paid);
    }
}
