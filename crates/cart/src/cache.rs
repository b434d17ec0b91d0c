//! Short-lived cart cache.
//!
//! Guest carts live only here. User carts are cached disposably: the durable
//! store is the source of truth and writes invalidate the cached copy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::OwnerKey;
use domain::Cart;
use moka::Expiry;
use moka::future::Cache;
use thiserror::Error;

/// Default time-to-live for cached carts.
pub const DEFAULT_CART_TTL: Duration = Duration::from_secs(300);

/// Errors returned by the cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The cache could not be reached.
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Returns the cache key for an owner: `cart:guest:<token>` or `cart:user:<id>`.
pub fn cache_key(owner: &OwnerKey) -> String {
    format!("cart:{owner}")
}

/// Key/value cache for carts.
#[async_trait]
pub trait CartCache: Send + Sync {
    /// Returns the cached cart, if present and not expired.
    async fn get(&self, owner: &OwnerKey) -> Result<Option<Cart>, CacheError>;

    /// Stores a cart for `ttl`.
    async fn put(&self, owner: &OwnerKey, cart: &Cart, ttl: Duration) -> Result<(), CacheError>;

    /// Drops a disposable copy so the next read goes to the store.
    async fn invalidate(&self, owner: &OwnerKey) -> Result<(), CacheError>;

    /// Deletes an entry that is retired for good (a merged guest cart).
    async fn remove(&self, owner: &OwnerKey) -> Result<(), CacheError>;
}

#[derive(Clone)]
struct CachedCart {
    cart: Arc<Cart>,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, CachedCart> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedCart,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedCart,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process cart cache backed by `moka`, with per-entry TTL.
#[derive(Clone)]
pub struct MokaCartCache {
    cache: Cache<String, CachedCart>,
    unavailable: Arc<AtomicBool>,
}

impl MokaCartCache {
    /// Creates a cache holding at most `max_capacity` carts.
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();

        Self {
            cache,
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulates an outage: every call fails with `CacheError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns true if an entry exists for the owner (ignoring outages).
    pub async fn contains(&self, owner: &OwnerKey) -> bool {
        self.cache.get(&cache_key(owner)).await.is_some()
    }

    fn check_available(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("cache offline".to_string()));
        }
        Ok(())
    }
}

impl Default for MokaCartCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CartCache for MokaCartCache {
    async fn get(&self, owner: &OwnerKey) -> Result<Option<Cart>, CacheError> {
        self.check_available()?;
        Ok(self
            .cache
            .get(&cache_key(owner))
            .await
            .map(|entry| entry.cart.as_ref().clone()))
    }

    async fn put(&self, owner: &OwnerKey, cart: &Cart, ttl: Duration) -> Result<(), CacheError> {
        self.check_available()?;
        let entry = CachedCart {
            cart: Arc::new(cart.clone()),
            ttl,
        };
        self.cache.insert(cache_key(owner), entry).await;
        Ok(())
    }

    async fn invalidate(&self, owner: &OwnerKey) -> Result<(), CacheError> {
        self.check_available()?;
        self.cache.invalidate(&cache_key(owner)).await;
        Ok(())
    }

    async fn remove(&self, owner: &OwnerKey) -> Result<(), CacheError> {
        self.check_available()?;
        self.cache.remove(&cache_key(owner)).await;
        Ok(())
    }
}
