use async_trait::async_trait;
use common::OrderId;
use domain::{Address, Order, OrderStatus};

use crate::Result;

/// Fields written together with a status change.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusChange<'a> {
    /// Recorded as the order's cancel reason.
    pub reason: Option<&'a str>,
    /// Upserted as the order's billing address.
    pub billing: Option<&'a Address>,
}

/// Durable store for orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order. Fails with `DuplicatePaymentReference` if another
    /// order already uses the same payment reference.
    async fn insert(&self, order: &Order) -> Result<()>;

    /// Loads an order (with its billing address, if any).
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;

    /// Finds the order correlated with a payment-provider reference.
    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Order>>;

    /// Atomically moves an order from `expected` to `next`, writing the
    /// fields in `change` in the same transaction.
    ///
    /// Returns false without writing anything if the stored status is no
    /// longer `expected` (another writer got there first).
    async fn compare_and_set_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
        change: StatusChange<'_>,
    ) -> Result<bool>;

    /// Creates or replaces the billing address for an order.
    async fn upsert_billing_address(&self, id: OrderId, address: &Address) -> Result<()>;
}
