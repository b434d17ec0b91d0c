use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, OwnerKey, UserId};
use domain::{
    Address, Cart, DomainError, LineItem, LineKey, Order, OrderStatus, merge_lines,
};
use tokio::sync::RwLock;

use crate::{CartStore, OrderStore, Result, StatusChange, StoreError, UpsertMode};

fn corrupt(err: DomainError) -> StoreError {
    StoreError::Corrupt(err.to_string())
}

/// In-memory cart store for testing.
///
/// Provides the same interface and atomicity as the PostgreSQL
/// implementation: each operation holds the write lock for its full duration.
#[derive(Clone, Default)]
pub struct InMemoryCartStore {
    carts: Arc<RwLock<HashMap<UserId, Cart>>>,
    unavailable: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryCartStore {
    /// Creates a new empty in-memory cart store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of successful write operations.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns the number of stored carts.
    pub async fn cart_count(&self) -> usize {
        self.carts.read().await.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("cart store offline".to_string()));
        }
        Ok(())
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn load(&self, user_id: UserId) -> Result<Option<Cart>> {
        self.check_available()?;
        Ok(self.carts.read().await.get(&user_id).cloned())
    }

    async fn replace_all(&self, user_id: UserId, lines: &[LineItem]) -> Result<Cart> {
        self.check_available()?;

        let cart = Cart::from_lines(OwnerKey::user(user_id), lines.iter().cloned(), Utc::now())
            .map_err(corrupt)?;
        self.carts.write().await.insert(user_id, cart.clone());
        self.record_write();
        Ok(cart)
    }

    async fn merge_guest_lines(&self, user_id: UserId, guest: &[LineItem]) -> Result<Cart> {
        self.check_available()?;

        let mut carts = self.carts.write().await;
        let existing = carts
            .get(&user_id)
            .map(|cart| cart.lines().to_vec())
            .unwrap_or_default();
        let merged = merge_lines(existing, guest.to_vec());
        let cart = Cart::from_lines(OwnerKey::user(user_id), merged, Utc::now()).map_err(corrupt)?;
        carts.insert(user_id, cart.clone());
        self.record_write();
        Ok(cart)
    }

    async fn upsert_line(
        &self,
        user_id: UserId,
        line: &LineItem,
        mode: UpsertMode,
    ) -> Result<LineItem> {
        self.check_available()?;

        let mut carts = self.carts.write().await;
        let cart = carts
            .entry(user_id)
            .or_insert_with(|| Cart::new(OwnerKey::user(user_id)));

        let stored = match mode {
            UpsertMode::Increment => cart.add_line(line.clone()),
            UpsertMode::Replace => cart.put_line(line.clone()),
        }
        .map_err(corrupt)?
        .clone();
        cart.touch(Utc::now());

        self.record_write();
        Ok(stored)
    }

    async fn remove_line(&self, user_id: UserId, key: &LineKey) -> Result<bool> {
        self.check_available()?;

        let mut carts = self.carts.write().await;
        let Some(cart) = carts.get_mut(&user_id) else {
            return Ok(false);
        };
        let removed = cart.remove_line(key).is_ok();
        if removed {
            cart.touch(Utc::now());
            self.record_write();
        }
        Ok(removed)
    }

    async fn clear(&self, user_id: UserId) -> Result<()> {
        self.check_available()?;

        if let Some(cart) = self.carts.write().await.get_mut(&user_id) {
            cart.clear();
            cart.touch(Utc::now());
        }
        self.record_write();
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryOrderState {
    orders: HashMap<OrderId, Order>,
    billing_upserts: HashMap<OrderId, usize>,
    status_writes: HashMap<OrderId, usize>,
}

/// In-memory order store for testing.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<InMemoryOrderState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns how many times a billing address was written for an order.
    pub async fn billing_upsert_count(&self, id: OrderId) -> usize {
        self.state
            .read()
            .await
            .billing_upserts
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    /// Returns how many status changes were written for an order.
    pub async fn status_write_count(&self, id: OrderId) -> usize {
        self.state
            .read()
            .await
            .status_writes
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("order store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<()> {
        self.check_available()?;

        let mut state = self.state.write().await;
        if state
            .orders
            .values()
            .any(|o| o.payment_reference == order.payment_reference)
        {
            return Err(StoreError::DuplicatePaymentReference(
                order.payment_reference.clone(),
            ));
        }
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        self.check_available()?;
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Order>> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .orders
            .values()
            .find(|o| o.payment_reference == reference)
            .cloned())
    }

    async fn compare_and_set_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
        change: StatusChange<'_>,
    ) -> Result<bool> {
        self.check_available()?;

        let mut state = self.state.write().await;
        let Some(order) = state.orders.get_mut(&id) else {
            return Ok(false);
        };
        if order.status != expected {
            return Ok(false);
        }

        order.status = next;
        if let Some(reason) = change.reason {
            order.cancel_reason = Some(reason.to_string());
        }
        if let Some(billing) = change.billing {
            order.billing_address = Some(billing.clone());
        }
        order.updated_at = Utc::now();

        if change.billing.is_some() {
            *state.billing_upserts.entry(id).or_insert(0) += 1;
        }
        *state.status_writes.entry(id).or_insert(0) += 1;
        Ok(true)
    }

    async fn upsert_billing_address(&self, id: OrderId, address: &Address) -> Result<()> {
        self.check_available()?;

        let mut state = self.state.write().await;
        let Some(order) = state.orders.get_mut(&id) else {
            return Err(StoreError::Corrupt(format!("order {id} does not exist")));
        };
        order.billing_address = Some(address.clone());
        order.updated_at = Utc::now();
        *state.billing_upserts.entry(id).or_insert(0) += 1;
        Ok(())
    }
}
