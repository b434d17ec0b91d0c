//! Order placement and status transitions.

use std::sync::Arc;

use cart::CartService;
use chrono::Utc;
use common::{OrderId, OwnerKey};
use domain::{Address, DomainError, Order, OrderStatus, Transition};
use store::{OrderStore, StatusChange, StoreError};

use crate::error::{CheckoutError, Result};

/// Who is asking for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRule {
    /// Back-office fulfillment: the plain state machine.
    Standard,
    /// Payment-provider events. A cancellation for an order that has already
    /// been paid is a stale failure notice and counts as already applied.
    PaymentEvent,
}

impl TransitionRule {
    /// Decides what to do with a request to move from `current` to `target`.
    pub fn evaluate(self, current: OrderStatus, target: OrderStatus) -> Transition {
        match self {
            TransitionRule::PaymentEvent
                if target == OrderStatus::Cancelled && current.is_at_or_past(OrderStatus::Paid) =>
            {
                Transition::AlreadyApplied
            }
            _ => current.evaluate(target),
        }
    }
}

/// Result of a status change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The status was written; holds the updated order.
    Applied(Order),
    /// The order was already at or past the target; nothing was written.
    AlreadyApplied(Order),
    /// The change is not allowed from the current status; nothing was written.
    Illegal(Order),
}

impl TransitionOutcome {
    /// Returns the order as it stands after the request.
    pub fn order(&self) -> &Order {
        match self {
            TransitionOutcome::Applied(order)
            | TransitionOutcome::AlreadyApplied(order)
            | TransitionOutcome::Illegal(order) => order,
        }
    }
}

/// Service for creating orders and moving them through their lifecycle.
#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    carts: CartService,
}

impl OrderService {
    /// Creates a new order service.
    pub fn new(orders: Arc<dyn OrderStore>, carts: CartService) -> Self {
        Self { orders, carts }
    }

    /// Snapshots the owner's cart into a new pending order.
    #[tracing::instrument(skip(self, owner, shipping_address, customer_email), fields(owner = %owner))]
    pub async fn place_order(
        &self,
        owner: &OwnerKey,
        payment_reference: &str,
        shipping_address: Address,
        customer_email: &str,
    ) -> Result<Order> {
        if payment_reference.trim().is_empty() {
            return Err(CheckoutError::Validation(
                "payment reference is required".to_string(),
            ));
        }

        let cart = self.carts.get(owner).await?;
        let order = Order::from_cart(
            &cart,
            payment_reference,
            shipping_address,
            customer_email,
            Utc::now(),
        )
        .map_err(|e| match e {
            DomainError::EmptyCart => CheckoutError::Validation("cart is empty".to_string()),
            other => CheckoutError::Validation(other.to_string()),
        })?;

        self.orders.insert(&order).await?;

        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total,
            "order placed"
        );
        Ok(order)
    }

    /// Loads an order.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, id: OrderId) -> Result<Order> {
        self.orders
            .get(id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(id))
    }

    /// Finds the order for a payment reference.
    #[tracing::instrument(skip(self))]
    pub async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Order>> {
        Ok(self.orders.find_by_payment_reference(reference).await?)
    }

    /// Back-office transition (fulfillment or cancellation).
    ///
    /// Requests for a status the order has already reached succeed without
    /// writing; illegal requests fail with `IllegalTransition`.
    #[tracing::instrument(skip(self))]
    pub async fn advance(&self, id: OrderId, target: OrderStatus) -> Result<Order> {
        let order = self.get(id).await?;
        let change = StatusChange {
            reason: (target == OrderStatus::Cancelled).then_some("cancelled_by_operator"),
            billing: None,
        };

        match self
            .transition(order, target, change, TransitionRule::Standard)
            .await?
        {
            TransitionOutcome::Applied(order) | TransitionOutcome::AlreadyApplied(order) => {
                Ok(order)
            }
            TransitionOutcome::Illegal(order) => Err(CheckoutError::IllegalTransition {
                from: order.status,
                to: target,
            }),
        }
    }

    /// Moves an order towards `target` with a per-order compare-and-set.
    ///
    /// The fields in `change` are written together with the status, so they
    /// land only when this call wins. If another writer changes the status
    /// first, the stored order is reloaded and the rule is evaluated again
    /// against the new status.
    pub async fn transition(
        &self,
        order: Order,
        target: OrderStatus,
        change: StatusChange<'_>,
        rule: TransitionRule,
    ) -> std::result::Result<TransitionOutcome, StoreError> {
        let mut current = order;
        loop {
            match rule.evaluate(current.status, target) {
                Transition::AlreadyApplied => return Ok(TransitionOutcome::AlreadyApplied(current)),
                Transition::Illegal => {
                    tracing::warn!(
                        order_id = %current.id,
                        from = %current.status,
                        to = %target,
                        "illegal order transition dropped"
                    );
                    return Ok(TransitionOutcome::Illegal(current));
                }
                Transition::Apply => {}
            }

            let id = current.id;
            let written = self
                .orders
                .compare_and_set_status(id, current.status, target, change)
                .await?;

            if written {
                tracing::info!(order_id = %id, status = %target, "order status changed");
                let order = match self.orders.get(id).await {
                    Ok(Some(stored)) => stored,
                    Ok(None) | Err(_) => {
                        // The status is committed, so this call still applied it.
                        tracing::warn!(order_id = %id, "reload after status change failed");
                        applied_locally(current, target, change)
                    }
                };
                return Ok(TransitionOutcome::Applied(order));
            }

            current = self
                .orders
                .get(id)
                .await?
                .ok_or_else(|| StoreError::Corrupt(format!("order {id} disappeared")))?;
        }
    }
}

/// Applies a committed status change to the order read before the write.
fn applied_locally(mut order: Order, target: OrderStatus, change: StatusChange<'_>) -> Order {
    order.status = target;
    if let Some(reason) = change.reason {
        order.cancel_reason = Some(reason.to_string());
    }
    if let Some(billing) = change.billing {
        order.billing_address = Some(billing.clone());
    }
    order.updated_at = Utc::now();
    order
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use cart::{InMemoryProductService, InventoryGate, MokaCartCache};
    use common::Money;
    use domain::LineKey;
    use store::{InMemoryCartStore, InMemoryOrderStore};

    use super::*;

    /// Order store whose reads fail right after a status change is written.
    #[derive(Clone)]
    struct FailingReload {
        inner: InMemoryOrderStore,
        fail_get: Arc<AtomicBool>,
    }

    #[async_trait]
    impl OrderStore for FailingReload {
        async fn insert(&self, order: &Order) -> store::Result<()> {
            self.inner.insert(order).await
        }

        async fn get(&self, id: OrderId) -> store::Result<Option<Order>> {
            if self.fail_get.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Unavailable("reload failed".to_string()));
            }
            self.inner.get(id).await
        }

        async fn find_by_payment_reference(&self, reference: &str) -> store::Result<Option<Order>> {
            self.inner.find_by_payment_reference(reference).await
        }

        async fn compare_and_set_status(
            &self,
            id: OrderId,
            expected: OrderStatus,
            next: OrderStatus,
            change: StatusChange<'_>,
        ) -> store::Result<bool> {
            let written = self
                .inner
                .compare_and_set_status(id, expected, next, change)
                .await?;
            self.fail_get.store(written, Ordering::SeqCst);
            Ok(written)
        }

        async fn upsert_billing_address(&self, id: OrderId, address: &Address) -> store::Result<()> {
            self.inner.upsert_billing_address(id, address).await
        }
    }

    struct Fixture {
        orders: OrderService,
        carts: CartService,
        store: InMemoryOrderStore,
    }

    fn fixture() -> Fixture {
        let products = InMemoryProductService::new();
        products.put_product(LineKey::product("p1"), "Mug", Money::from_cents(1000), 10);
        let carts = CartService::new(
            Arc::new(InMemoryCartStore::new()),
            Arc::new(MokaCartCache::default()),
            InventoryGate::new(Arc::new(products)),
        );
        let store = InMemoryOrderStore::new();
        Fixture {
            orders: OrderService::new(Arc::new(store.clone()), carts.clone()),
            carts,
            store,
        }
    }

    async fn placed(f: &Fixture, reference: &str) -> Order {
        let owner = OwnerKey::guest(reference);
        f.carts.add_item(&owner, LineKey::product("p1"), 2).await.unwrap();
        f.orders
            .place_order(&owner, reference, Address::default(), "a@example.com")
            .await
            .unwrap()
    }

    #[test]
    fn test_payment_rule_treats_late_failure_as_stale() {
        let rule = TransitionRule::PaymentEvent;
        assert_eq!(
            rule.evaluate(OrderStatus::Paid, OrderStatus::Cancelled),
            Transition::AlreadyApplied
        );
        assert_eq!(
            rule.evaluate(OrderStatus::Pending, OrderStatus::Cancelled),
            Transition::Apply
        );
        assert_eq!(
            TransitionRule::Standard.evaluate(OrderStatus::Paid, OrderStatus::Cancelled),
            Transition::Apply
        );
    }

    #[tokio::test]
    async fn test_place_order_snapshots_cart() {
        let f = fixture();
        let order = placed(&f, "pi_1").await;

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total, Money::from_cents(2000));
        assert_eq!(f.orders.get(order.id).await.unwrap(), order);
    }

    #[tokio::test]
    async fn test_place_order_from_empty_cart_fails() {
        let f = fixture();
        let err = f
            .orders
            .place_order(&OwnerKey::guest("nobody"), "pi_x", Address::default(), "a@b.c")
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));
    }

    #[tokio::test]
    async fn test_duplicate_reference_is_rejected() {
        let f = fixture();
        placed(&f, "pi_dup").await;

        let owner = OwnerKey::guest("other");
        f.carts.add_item(&owner, LineKey::product("p1"), 1).await.unwrap();
        let err = f
            .orders
            .place_order(&owner, "pi_dup", Address::default(), "b@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::DuplicateOrder(_)));
        assert_eq!(f.store.order_count().await, 1);
    }

    #[tokio::test]
    async fn test_advance_through_fulfillment() {
        let f = fixture();
        let order = placed(&f, "pi_2").await;

        for status in [
            OrderStatus::Paid,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ] {
            let updated = f.orders.advance(order.id, status).await.unwrap();
            assert_eq!(updated.status, status);
        }

        // Repeating a reached status is a no-op, going back is illegal.
        let same = f.orders.advance(order.id, OrderStatus::Shipped).await.unwrap();
        assert_eq!(same.status, OrderStatus::Delivered);
        let err = f
            .orders
            .advance(order.id, OrderStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn test_advance_skipping_steps_is_illegal() {
        let f = fixture();
        let order = placed(&f, "pi_3").await;

        let err = f
            .orders
            .advance(order.id, OrderStatus::Shipped)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::IllegalTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Shipped
            }
        ));
    }

    #[tokio::test]
    async fn test_operator_cancel_records_reason() {
        let f = fixture();
        let order = placed(&f, "pi_4").await;

        let cancelled = f
            .orders
            .advance(order.id, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(cancelled.cancel_reason.as_deref(), Some("cancelled_by_operator"));
    }

    #[tokio::test]
    async fn test_get_unknown_order() {
        let f = fixture();
        let id = OrderId::new();
        let err = f.orders.get(id).await.unwrap_err();
        assert!(matches!(err, CheckoutError::OrderNotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn test_transition_reports_applied_when_reload_fails() {
        let f = fixture();
        let order = placed(&f, "pi_5").await;
        let failing = FailingReload {
            inner: f.store.clone(),
            fail_get: Arc::new(AtomicBool::new(false)),
        };
        let orders = OrderService::new(Arc::new(failing), f.carts.clone());
        let billing = Address {
            line1: "9 Bill Rd".to_string(),
            ..Default::default()
        };

        let outcome = orders
            .transition(
                order.clone(),
                OrderStatus::Paid,
                StatusChange {
                    reason: None,
                    billing: Some(&billing),
                },
                TransitionRule::PaymentEvent,
            )
            .await
            .unwrap();

        let TransitionOutcome::Applied(applied) = outcome else {
            panic!("expected applied, got {outcome:?}");
        };
        assert_eq!(applied.status, OrderStatus::Paid);
        assert_eq!(applied.billing_address.as_ref(), Some(&billing));
        let stored = f.store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        assert_eq!(stored.billing_address, Some(billing));
    }
}
