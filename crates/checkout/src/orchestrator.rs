//! Checkout orchestration: validate the cart and open a payment intent.

use std::collections::HashMap;
use std::sync::Arc;

use cart::CartService;
use common::{Money, OwnerKey};
use domain::StockRequest;
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, Result};
use crate::services::PaymentProvider;

/// Metadata key holding the compact line manifest.
pub const METADATA_ITEMS: &str = "items";
/// Metadata key holding the owner key.
pub const METADATA_OWNER: &str = "owner";

/// What the client needs to complete payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub payment_reference: String,
    pub client_secret: String,
    pub amount: Money,
    pub currency: String,
}

/// Validates a cart against live stock and creates a payment intent.
///
/// Checkout never mutates the cart and never creates the order; running it
/// twice produces two independent intents.
#[derive(Clone)]
pub struct CheckoutOrchestrator {
    carts: CartService,
    payments: Arc<dyn PaymentProvider>,
    currency: String,
}

impl CheckoutOrchestrator {
    /// Creates an orchestrator charging in `currency`.
    pub fn new(
        carts: CartService,
        payments: Arc<dyn PaymentProvider>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            carts,
            payments,
            currency: currency.into(),
        }
    }

    /// Returns the configured currency.
    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Starts checkout for the owner's current cart.
    #[tracing::instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn begin_checkout(&self, owner: &OwnerKey) -> Result<CheckoutSession> {
        let started = std::time::Instant::now();
        let result = self.run(owner).await;
        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());

        match &result {
            Ok(session) => {
                metrics::counter!("checkout_sessions_total").increment(1);
                tracing::info!(
                    payment_reference = %session.payment_reference,
                    amount = %session.amount,
                    "checkout session created"
                );
            }
            Err(e) => {
                let reason = match e {
                    CheckoutError::Validation(_) => "validation",
                    CheckoutError::StockConflict(_) => "stock",
                    CheckoutError::Gateway(_) => "gateway",
                    _ => "internal",
                };
                metrics::counter!("checkout_rejections_total", "reason" => reason).increment(1);
                tracing::warn!(error = %e, "checkout rejected");
            }
        }
        result
    }

    async fn run(&self, owner: &OwnerKey) -> Result<CheckoutSession> {
        let cart = self.carts.get(owner).await?;
        if cart.is_empty() {
            return Err(CheckoutError::Validation("cart is empty".to_string()));
        }

        let requests: Vec<StockRequest> = cart.lines().iter().map(StockRequest::from).collect();
        self.carts
            .gate()
            .validate(&requests)
            .await
            .map_err(CheckoutError::StockConflict)?;

        let amount = cart.total();
        let metadata = HashMap::from([
            (
                METADATA_ITEMS.to_string(),
                serde_json::to_string(&cart.manifest())?,
            ),
            (METADATA_OWNER.to_string(), owner.to_string()),
        ]);

        let intent = self
            .payments
            .create_payment_intent(amount, &self.currency, metadata)
            .await?;

        Ok(CheckoutSession {
            payment_reference: intent.id,
            client_secret: intent.client_secret,
            amount,
            currency: self.currency.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use cart::{InMemoryProductService, InventoryGate, MokaCartCache};
    use domain::{ItemErrorReason, LineKey};
    use store::InMemoryCartStore;

    use super::*;
    use crate::services::InMemoryPaymentProvider;

    struct Fixture {
        orchestrator: CheckoutOrchestrator,
        carts: CartService,
        products: InMemoryProductService,
        payments: InMemoryPaymentProvider,
    }

    fn fixture() -> Fixture {
        let products = InMemoryProductService::new();
        products.put_product(LineKey::product("p1"), "Mug", Money::from_cents(1250), 5);
        products.put_product(
            LineKey::new("tee", Some("L".into())),
            "Tee",
            Money::from_cents(2000),
            3,
        );
        let carts = CartService::new(
            Arc::new(InMemoryCartStore::new()),
            Arc::new(MokaCartCache::default()),
            InventoryGate::new(Arc::new(products.clone())),
        );
        let payments = InMemoryPaymentProvider::new();
        Fixture {
            orchestrator: CheckoutOrchestrator::new(carts.clone(), Arc::new(payments.clone()), "usd"),
            carts,
            products,
            payments,
        }
    }

    #[tokio::test]
    async fn test_checkout_creates_intent_with_manifest() {
        let f = fixture();
        let owner = OwnerKey::guest("g1");
        f.carts.add_item(&owner, LineKey::product("p1"), 2).await.unwrap();
        f.carts
            .add_item(&owner, LineKey::new("tee", Some("L".into())), 1)
            .await
            .unwrap();

        let session = f.orchestrator.begin_checkout(&owner).await.unwrap();
        assert_eq!(session.amount, Money::from_cents(4500));
        assert_eq!(session.currency, "usd");

        let intent = f.payments.last_intent().unwrap();
        assert_eq!(intent.id, session.payment_reference);
        let manifest: serde_json::Value =
            serde_json::from_str(&intent.metadata[METADATA_ITEMS]).unwrap();
        assert_eq!(
            manifest,
            serde_json::json!([
                {"p": "p1", "q": 2, "price": "12.50"},
                {"p": "tee", "v": "L", "q": 1, "price": "20.00"}
            ])
        );
        assert_eq!(intent.metadata[METADATA_OWNER], "guest:g1");
    }

    #[tokio::test]
    async fn test_empty_cart_is_validation_error() {
        let f = fixture();
        let err = f
            .orchestrator
            .begin_checkout(&OwnerKey::guest("empty"))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));
        assert_eq!(f.payments.intent_count(), 0);
    }

    #[tokio::test]
    async fn test_oversold_cart_never_reaches_provider() {
        let f = fixture();
        let owner = OwnerKey::guest("g2");
        f.carts.add_item(&owner, LineKey::product("p1"), 5).await.unwrap();
        f.products.set_stock(&LineKey::product("p1"), 3);

        let err = f.orchestrator.begin_checkout(&owner).await.unwrap_err();
        let CheckoutError::StockConflict(items) = err else {
            panic!("expected stock conflict, got {err:?}");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].reason, ItemErrorReason::InsufficientStock { available: 3 });
        assert_eq!(f.payments.intent_count(), 0);
    }

    #[tokio::test]
    async fn test_gateway_failure_leaves_cart_untouched() {
        let f = fixture();
        let owner = OwnerKey::guest("g3");
        f.carts.add_item(&owner, LineKey::product("p1"), 1).await.unwrap();
        f.payments.set_fail_on_create(true);

        let err = f.orchestrator.begin_checkout(&owner).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Gateway(_)));
        assert_eq!(f.carts.get(&owner).await.unwrap().total_quantity(), 1);
    }

    #[tokio::test]
    async fn test_rerun_creates_fresh_intent() {
        let f = fixture();
        let owner = OwnerKey::guest("g4");
        f.carts.add_item(&owner, LineKey::product("p1"), 1).await.unwrap();

        let first = f.orchestrator.begin_checkout(&owner).await.unwrap();
        let second = f.orchestrator.begin_checkout(&owner).await.unwrap();
        assert_ne!(first.payment_reference, second.payment_reference);
        assert_eq!(f.payments.intent_count(), 2);
    }
}
