//! Product service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{Money, ProductId, VariantId};
use domain::{LineKey, StockQuote};
use thiserror::Error;

/// Errors returned by the product service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProductServiceError {
    /// The service could not be reached or timed out.
    #[error("Product service unavailable: {0}")]
    Unavailable(String),
}

/// Authoritative source of stock levels and prices.
#[async_trait]
pub trait ProductService: Send + Sync {
    /// Looks up the exact product/variant pair. Returns None if it does not exist.
    async fn get_stock_and_price(
        &self,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
    ) -> Result<Option<StockQuote>, ProductServiceError>;
}

/// In-memory product catalog for testing and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProductService {
    catalog: Arc<RwLock<HashMap<LineKey, StockQuote>>>,
    fail_on_lookup: Arc<AtomicBool>,
    lookups: Arc<AtomicUsize>,
}

impl InMemoryProductService {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a product/variant in the catalog.
    pub fn put_product(
        &self,
        key: LineKey,
        name: impl Into<String>,
        price: Money,
        stock: u32,
    ) {
        let quote = StockQuote {
            stock,
            price,
            display_name: name.into(),
            image_ref: None,
        };
        self.catalog
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, quote);
    }

    /// Sets the stock level of an existing entry. Unknown keys are ignored.
    pub fn set_stock(&self, key: &LineKey, stock: u32) {
        if let Some(quote) = self
            .catalog
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(key)
        {
            quote.stock = stock;
        }
    }

    /// Sets the price of an existing entry. Unknown keys are ignored.
    pub fn set_price(&self, key: &LineKey, price: Money) {
        if let Some(quote) = self
            .catalog
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(key)
        {
            quote.price = price;
        }
    }

    /// Configures every lookup to fail as if the service were down.
    pub fn set_fail_on_lookup(&self, fail: bool) {
        self.fail_on_lookup.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of lookups served (including failed ones).
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProductService for InMemoryProductService {
    async fn get_stock_and_price(
        &self,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
    ) -> Result<Option<StockQuote>, ProductServiceError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        if self.fail_on_lookup.load(Ordering::SeqCst) {
            return Err(ProductServiceError::Unavailable(
                "connection refused".to_string(),
            ));
        }

        let key = LineKey::new(product_id.clone(), variant_id.cloned());
        Ok(self
            .catalog
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_is_exact_on_variant() {
        let service = InMemoryProductService::new();
        service.put_product(
            LineKey::new("TEE", Some("M".into())),
            "Tee",
            Money::from_cents(2000),
            4,
        );

        let found = service
            .get_stock_and_price(&"TEE".into(), Some(&"M".into()))
            .await
            .unwrap();
        assert_eq!(found.map(|q| q.stock), Some(4));

        let plain = service.get_stock_and_price(&"TEE".into(), None).await.unwrap();
        assert!(plain.is_none());
    }

    #[tokio::test]
    async fn test_fail_on_lookup() {
        let service = InMemoryProductService::new();
        service.set_fail_on_lookup(true);

        let result = service.get_stock_and_price(&"SKU-1".into(), None).await;
        assert!(matches!(result, Err(ProductServiceError::Unavailable(_))));
        assert_eq!(service.lookup_count(), 1);
    }
}
