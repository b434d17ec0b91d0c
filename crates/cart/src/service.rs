//! Cart reads and single-line mutations.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use common::{OwnerKey, UserId};
use domain::{Cart, LineItem, LineKey, StockQuote, StockRequest};
use store::{CartStore, UpsertMode};
use tokio::sync::{Mutex, MutexGuard};

use crate::cache::{CacheError, CartCache, DEFAULT_CART_TTL};
use crate::error::{CartError, Result};
use crate::inventory::InventoryGate;

pub(crate) fn record_cache_error(operation: &'static str, owner: &OwnerKey, err: &CacheError) {
    metrics::counter!("cart_cache_errors_total", "operation" => operation).increment(1);
    tracing::warn!(%owner, operation, error = %err, "cart cache unavailable");
}

const GUARD_STRIPES: usize = 64;

/// Per-owner coordination state, striped by owner hash.
///
/// A generation counter is bumped after every durable write so a read-through
/// fill can tell whether it raced with one. Guest mutations take the owner's
/// lock for their whole read-modify-write. Owners sharing a stripe only cost
/// each other an extra invalidation or a short wait.
struct OwnerGuards {
    generations: Vec<AtomicU64>,
    guest_locks: Vec<Mutex<()>>,
}

impl OwnerGuards {
    fn new() -> Self {
        Self {
            generations: (0..GUARD_STRIPES).map(|_| AtomicU64::new(0)).collect(),
            guest_locks: (0..GUARD_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(owner: &OwnerKey) -> usize {
        let mut hasher = DefaultHasher::new();
        owner.hash(&mut hasher);
        (hasher.finish() % GUARD_STRIPES as u64) as usize
    }

    fn generation(&self, owner: &OwnerKey) -> u64 {
        self.generations[Self::stripe(owner)].load(Ordering::SeqCst)
    }

    fn bump(&self, owner: &OwnerKey) {
        self.generations[Self::stripe(owner)].fetch_add(1, Ordering::SeqCst);
    }

    async fn lock_guest(&self, owner: &OwnerKey) -> Option<MutexGuard<'_, ()>> {
        match owner {
            OwnerKey::Guest(_) => Some(self.guest_locks[Self::stripe(owner)].lock().await),
            OwnerKey::User(_) => None,
        }
    }
}

/// Service for reading and mutating carts.
///
/// Guest carts live only in the cache. User carts are written to the durable
/// store and the cached copy is invalidated afterwards; the new value is never
/// written into the cache from a mutation path. Cache failures are logged and
/// never block a mutation. Clones share their owner guards.
#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn CartStore>,
    cache: Arc<dyn CartCache>,
    gate: InventoryGate,
    ttl: Duration,
    guards: Arc<OwnerGuards>,
}

impl CartService {
    /// Creates a cart service with the default cache TTL.
    pub fn new(store: Arc<dyn CartStore>, cache: Arc<dyn CartCache>, gate: InventoryGate) -> Self {
        Self {
            store,
            cache,
            gate,
            ttl: DEFAULT_CART_TTL,
            guards: Arc::new(OwnerGuards::new()),
        }
    }

    /// Overrides the cache TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns the cache TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the inventory gate used for mutations.
    pub fn gate(&self) -> &InventoryGate {
        &self.gate
    }

    /// Returns the owner's cart, or an empty cart if there is none.
    #[tracing::instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn get(&self, owner: &OwnerKey) -> Result<Cart> {
        match owner {
            OwnerKey::Guest(_) => Ok(self.guest_cart(owner).await),
            OwnerKey::User(user_id) => self.read_through(owner, *user_id).await,
        }
    }

    /// Adds `quantity` of a product/variant, folding into an existing line.
    ///
    /// The resulting quantity is checked against current stock, and the line's
    /// price and display metadata are refreshed from the product service.
    #[tracing::instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn add_item(&self, owner: &OwnerKey, key: LineKey, quantity: u32) -> Result<Cart> {
        if quantity == 0 {
            return Err(CartError::Validation(
                "quantity must be at least 1".to_string(),
            ));
        }

        let _guest = self.guards.lock_guest(owner).await;
        let current = self.get(owner).await?;
        let existing = current.line(&key).map_or(0, |line| line.quantity);
        let quote = self.check_stock(&key, existing.saturating_add(quantity)).await?;
        let line = line_from_quote(key, quantity, quote);

        let cart = match owner {
            OwnerKey::Guest(_) => {
                let mut cart = current;
                cart.add_line(line)?;
                self.save_guest(owner, cart).await
            }
            OwnerKey::User(user_id) => {
                self.store
                    .upsert_line(*user_id, &line, UpsertMode::Increment)
                    .await?;
                self.invalidate(owner).await;
                self.load_durable(*user_id).await?
            }
        };

        metrics::counter!("cart_mutations_total", "operation" => "add_item").increment(1);
        Ok(cart)
    }

    /// Sets the quantity of an existing line. Zero removes the line.
    ///
    /// Increases are checked against current stock; decreases are not.
    #[tracing::instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn set_quantity(
        &self,
        owner: &OwnerKey,
        key: LineKey,
        quantity: u32,
    ) -> Result<Cart> {
        if quantity == 0 {
            return self.remove_item(owner, &key).await;
        }

        let _guest = self.guards.lock_guest(owner).await;
        let current = self.get(owner).await?;
        let existing = current
            .line(&key)
            .cloned()
            .ok_or_else(|| CartError::LineNotFound(key.clone()))?;

        let line = if quantity > existing.quantity {
            let quote = self.check_stock(&key, quantity).await?;
            line_from_quote(key, quantity, quote)
        } else {
            LineItem {
                quantity,
                ..existing
            }
        };

        let cart = match owner {
            OwnerKey::Guest(_) => {
                let mut cart = current;
                cart.put_line(line)?;
                self.save_guest(owner, cart).await
            }
            OwnerKey::User(user_id) => {
                self.store
                    .upsert_line(*user_id, &line, UpsertMode::Replace)
                    .await?;
                self.invalidate(owner).await;
                self.load_durable(*user_id).await?
            }
        };

        metrics::counter!("cart_mutations_total", "operation" => "set_quantity").increment(1);
        Ok(cart)
    }

    /// Removes a line. Fails with `LineNotFound` if it is not in the cart.
    #[tracing::instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn remove_item(&self, owner: &OwnerKey, key: &LineKey) -> Result<Cart> {
        let _guest = self.guards.lock_guest(owner).await;
        let cart = match owner {
            OwnerKey::Guest(_) => {
                let mut cart = self.guest_cart(owner).await;
                cart.remove_line(key)?;
                self.save_guest(owner, cart).await
            }
            OwnerKey::User(user_id) => {
                if !self.store.remove_line(*user_id, key).await? {
                    return Err(CartError::LineNotFound(key.clone()));
                }
                self.invalidate(owner).await;
                self.load_durable(*user_id).await?
            }
        };

        metrics::counter!("cart_mutations_total", "operation" => "remove_item").increment(1);
        Ok(cart)
    }

    /// Removes every line from the owner's cart.
    #[tracing::instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn clear(&self, owner: &OwnerKey) -> Result<Cart> {
        let _guest = self.guards.lock_guest(owner).await;
        match owner {
            OwnerKey::Guest(_) => {
                if let Err(e) = self.cache.remove(owner).await {
                    record_cache_error("remove", owner, &e);
                }
            }
            OwnerKey::User(user_id) => {
                self.store.clear(*user_id).await?;
                self.invalidate(owner).await;
            }
        }

        metrics::counter!("cart_mutations_total", "operation" => "clear").increment(1);
        Ok(Cart::new(owner.clone()))
    }

    async fn check_stock(&self, key: &LineKey, quantity: u32) -> Result<StockQuote> {
        self.gate
            .check_one(&StockRequest::new(key.clone(), quantity))
            .await
            .map_err(|item| CartError::StockConflict(vec![item]))
    }

    async fn guest_cart(&self, owner: &OwnerKey) -> Cart {
        match self.cache.get(owner).await {
            Ok(Some(cart)) => {
                metrics::counter!("cart_cache_hits_total").increment(1);
                cart
            }
            Ok(None) => {
                metrics::counter!("cart_cache_misses_total").increment(1);
                Cart::new(owner.clone())
            }
            Err(e) => {
                record_cache_error("get", owner, &e);
                Cart::new(owner.clone())
            }
        }
    }

    async fn read_through(&self, owner: &OwnerKey, user_id: UserId) -> Result<Cart> {
        match self.cache.get(owner).await {
            Ok(Some(cart)) => {
                metrics::counter!("cart_cache_hits_total").increment(1);
                return Ok(cart);
            }
            Ok(None) => metrics::counter!("cart_cache_misses_total").increment(1),
            Err(e) => record_cache_error("get", owner, &e),
        }

        let generation = self.guards.generation(owner);
        let cart = self.load_durable(user_id).await?;
        if let Err(e) = self.cache.put(owner, &cart, self.ttl).await {
            record_cache_error("put", owner, &e);
            return Ok(cart);
        }

        // A write landed while we were loading; the snapshot may be stale.
        if self.guards.generation(owner) != generation {
            metrics::counter!("cart_cache_stale_fills_total").increment(1);
            if let Err(e) = self.cache.invalidate(owner).await {
                record_cache_error("invalidate", owner, &e);
            }
        }
        Ok(cart)
    }

    pub(crate) async fn load_durable(&self, user_id: UserId) -> Result<Cart> {
        Ok(self
            .store
            .load(user_id)
            .await?
            .unwrap_or_else(|| Cart::new(OwnerKey::user(user_id))))
    }

    async fn save_guest(&self, owner: &OwnerKey, mut cart: Cart) -> Cart {
        cart.touch(Utc::now());
        if let Err(e) = self.cache.put(owner, &cart, self.ttl).await {
            record_cache_error("put", owner, &e);
        }
        cart
    }

    /// Drops the cached copy after a durable write.
    pub(crate) async fn invalidate(&self, owner: &OwnerKey) {
        self.guards.bump(owner);
        if let Err(e) = self.cache.invalidate(owner).await {
            record_cache_error("invalidate", owner, &e);
        }
    }

    /// Holds the owner's guest lock; `None` for users.
    pub(crate) async fn lock_guest(&self, owner: &OwnerKey) -> Option<MutexGuard<'_, ()>> {
        self.guards.lock_guest(owner).await
    }

    pub(crate) fn store(&self) -> &Arc<dyn CartStore> {
        &self.store
    }

    pub(crate) fn cache(&self) -> &Arc<dyn CartCache> {
        &self.cache
    }
}

fn line_from_quote(key: LineKey, quantity: u32, quote: StockQuote) -> LineItem {
    LineItem {
        product_id: key.product_id,
        variant_id: key.variant_id,
        quantity,
        unit_price: quote.price,
        stock_at_add: quote.stock,
        display_name: quote.display_name,
        image_ref: quote.image_ref,
        refreshed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use async_trait::async_trait;
    use common::Money;
    use domain::ItemErrorReason;
    use store::InMemoryCartStore;
    use tokio::sync::Notify;

    use super::*;
    use crate::cache::MokaCartCache;
    use crate::services::InMemoryProductService;

    /// Holds the first armed `load` after it has read, until resumed.
    #[derive(Clone)]
    struct PausedLoad {
        inner: InMemoryCartStore,
        armed: Arc<AtomicBool>,
        loaded: Arc<Notify>,
        resume: Arc<Notify>,
    }

    #[async_trait]
    impl CartStore for PausedLoad {
        async fn load(&self, user_id: UserId) -> store::Result<Option<Cart>> {
            let cart = self.inner.load(user_id).await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.loaded.notify_one();
                self.resume.notified().await;
            }
            Ok(cart)
        }

        async fn replace_all(&self, user_id: UserId, lines: &[LineItem]) -> store::Result<Cart> {
            self.inner.replace_all(user_id, lines).await
        }

        async fn merge_guest_lines(
            &self,
            user_id: UserId,
            guest: &[LineItem],
        ) -> store::Result<Cart> {
            self.inner.merge_guest_lines(user_id, guest).await
        }

        async fn upsert_line(
            &self,
            user_id: UserId,
            line: &LineItem,
            mode: UpsertMode,
        ) -> store::Result<LineItem> {
            self.inner.upsert_line(user_id, line, mode).await
        }

        async fn remove_line(&self, user_id: UserId, key: &LineKey) -> store::Result<bool> {
            self.inner.remove_line(user_id, key).await
        }

        async fn clear(&self, user_id: UserId) -> store::Result<()> {
            self.inner.clear(user_id).await
        }
    }

    struct Fixture {
        service: CartService,
        store: InMemoryCartStore,
        cache: MokaCartCache,
        products: InMemoryProductService,
    }

    fn fixture() -> Fixture {
        let store = InMemoryCartStore::new();
        let cache = MokaCartCache::default();
        let products = InMemoryProductService::new();
        products.put_product(LineKey::product("SKU-1"), "Mug", Money::from_cents(1000), 10);
        products.put_product(LineKey::product("SKU-2"), "Cup", Money::from_cents(500), 2);

        let service = CartService::new(
            Arc::new(store.clone()),
            Arc::new(cache.clone()),
            InventoryGate::new(Arc::new(products.clone())),
        );
        Fixture {
            service,
            store,
            cache,
            products,
        }
    }

    #[tokio::test]
    async fn test_guest_add_lives_only_in_cache() {
        let f = fixture();
        let guest = OwnerKey::guest("g1");

        let cart = f
            .service
            .add_item(&guest, LineKey::product("SKU-1"), 2)
            .await
            .unwrap();

        assert_eq!(cart.total_quantity(), 2);
        assert_eq!(cart.lines()[0].unit_price, Money::from_cents(1000));
        assert_eq!(cart.lines()[0].stock_at_add, 10);
        assert!(f.cache.contains(&guest).await);
        assert_eq!(f.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_add_rejects_zero_quantity() {
        let f = fixture();
        let err = f
            .service
            .add_item(&OwnerKey::guest("g"), LineKey::product("SKU-1"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::Validation(_)));
    }

    #[tokio::test]
    async fn test_add_checks_resulting_quantity_against_stock() {
        let f = fixture();
        let guest = OwnerKey::guest("g2");
        f.service
            .add_item(&guest, LineKey::product("SKU-2"), 2)
            .await
            .unwrap();

        let err = f
            .service
            .add_item(&guest, LineKey::product("SKU-2"), 1)
            .await
            .unwrap_err();
        let CartError::StockConflict(items) = err else {
            panic!("expected stock conflict, got {err:?}");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].requested, 3);
        assert_eq!(
            items[0].reason,
            ItemErrorReason::InsufficientStock { available: 2 }
        );

        let cart = f.service.get(&guest).await.unwrap();
        assert_eq!(cart.total_quantity(), 2);
    }

    #[tokio::test]
    async fn test_user_write_invalidates_cache() {
        let f = fixture();
        let user = OwnerKey::user(UserId::new());

        // Warm the cache with the empty cart.
        f.service.get(&user).await.unwrap();
        assert!(f.cache.contains(&user).await);

        f.service
            .add_item(&user, LineKey::product("SKU-1"), 1)
            .await
            .unwrap();
        assert!(!f.cache.contains(&user).await);

        let cart = f.service.get(&user).await.unwrap();
        assert_eq!(cart.total_quantity(), 1);
        assert!(f.cache.contains(&user).await);
    }

    #[tokio::test]
    async fn test_user_mutation_succeeds_with_cache_down() {
        let f = fixture();
        let user = OwnerKey::user(UserId::new());
        f.cache.set_unavailable(true);

        f.service
            .add_item(&user, LineKey::product("SKU-1"), 3)
            .await
            .unwrap();
        let cart = f.service.get(&user).await.unwrap();

        assert_eq!(cart.total_quantity(), 3);
        assert_eq!(f.store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_guest_read_with_cache_down_is_empty() {
        let f = fixture();
        let guest = OwnerKey::guest("g3");
        f.service
            .add_item(&guest, LineKey::product("SKU-1"), 1)
            .await
            .unwrap();

        f.cache.set_unavailable(true);
        let cart = f.service.get(&guest).await.unwrap();
        assert!(cart.is_empty());
    }

    #[tokio::test]
    async fn test_set_quantity_and_remove() {
        let f = fixture();
        let user = OwnerKey::user(UserId::new());
        f.service
            .add_item(&user, LineKey::product("SKU-1"), 2)
            .await
            .unwrap();

        let cart = f
            .service
            .set_quantity(&user, LineKey::product("SKU-1"), 7)
            .await
            .unwrap();
        assert_eq!(cart.total_quantity(), 7);

        let cart = f
            .service
            .set_quantity(&user, LineKey::product("SKU-1"), 0)
            .await
            .unwrap();
        assert!(cart.is_empty());

        let err = f
            .service
            .remove_item(&user, &LineKey::product("SKU-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::LineNotFound(_)));
    }

    #[tokio::test]
    async fn test_set_quantity_on_missing_line() {
        let f = fixture();
        let err = f
            .service
            .set_quantity(&OwnerKey::guest("g4"), LineKey::product("SKU-1"), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::LineNotFound(_)));
    }

    #[tokio::test]
    async fn test_decrease_skips_stock_check() {
        let f = fixture();
        let guest = OwnerKey::guest("g5");
        f.service
            .add_item(&guest, LineKey::product("SKU-1"), 5)
            .await
            .unwrap();
        f.products.set_stock(&LineKey::product("SKU-1"), 1);

        let cart = f
            .service
            .set_quantity(&guest, LineKey::product("SKU-1"), 3)
            .await
            .unwrap();
        assert_eq!(cart.total_quantity(), 3);
    }

    #[tokio::test]
    async fn test_add_fails_closed_when_product_service_down() {
        let f = fixture();
        f.products.set_fail_on_lookup(true);

        let err = f
            .service
            .add_item(&OwnerKey::guest("g6"), LineKey::product("SKU-1"), 1)
            .await
            .unwrap_err();
        let CartError::StockConflict(items) = err else {
            panic!("expected stock conflict, got {err:?}");
        };
        assert_eq!(items[0].reason, ItemErrorReason::ServiceUnavailable);
    }

    #[tokio::test]
    async fn test_clear_user_cart() {
        let f = fixture();
        let user_id = UserId::new();
        let user = OwnerKey::user(user_id);
        f.service
            .add_item(&user, LineKey::product("SKU-1"), 1)
            .await
            .unwrap();

        let cart = f.service.clear(&user).await.unwrap();
        assert!(cart.is_empty());
        assert!(f.store.load(user_id).await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_fill_after_concurrent_write_is_dropped() {
        let f = fixture();
        let user_id = UserId::new();
        let user = OwnerKey::user(user_id);
        let paused = PausedLoad {
            inner: f.store.clone(),
            armed: Arc::new(AtomicBool::new(true)),
            loaded: Arc::new(Notify::new()),
            resume: Arc::new(Notify::new()),
        };
        let service = CartService::new(
            Arc::new(paused.clone()),
            Arc::new(f.cache.clone()),
            InventoryGate::new(Arc::new(f.products.clone())),
        );

        // The reader loads the empty cart, then stalls before filling.
        let reader = tokio::spawn({
            let service = service.clone();
            let user = user.clone();
            async move { service.get(&user).await }
        });
        paused.loaded.notified().await;

        service
            .add_item(&user, LineKey::product("SKU-1"), 2)
            .await
            .unwrap();

        paused.resume.notify_one();
        let stale = reader.await.unwrap().unwrap();
        assert!(stale.is_empty());

        let cart = service.get(&user).await.unwrap();
        assert_eq!(cart.total_quantity(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_guest_adds_are_not_lost() {
        let f = fixture();
        let guest = OwnerKey::guest("g7");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = f.service.clone();
            let guest = guest.clone();
            handles.push(tokio::spawn(async move {
                service.add_item(&guest, LineKey::product("SKU-1"), 1).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let cart = f.service.get(&guest).await.unwrap();
        assert_eq!(cart.total_quantity(), 8);
    }
}
