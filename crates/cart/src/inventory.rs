//! Inventory gate: point-in-time stock checks against the product service.

use std::sync::Arc;

use domain::{ItemError, ItemErrorReason, StockQuote, StockRequest};
use futures_util::future::join_all;

use crate::services::ProductService;

/// Validates requested quantities against live stock.
///
/// The gate is read-only and never reserves stock. When the product service
/// cannot be reached every affected item is reported as
/// [`ItemErrorReason::ServiceUnavailable`].
#[derive(Clone)]
pub struct InventoryGate {
    products: Arc<dyn ProductService>,
}

impl InventoryGate {
    /// Creates a gate over a product service.
    pub fn new(products: Arc<dyn ProductService>) -> Self {
        Self { products }
    }

    /// Checks every item and returns the complete list of failures.
    ///
    /// Lookups run concurrently; the result lists failures in request order.
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    pub async fn validate(&self, items: &[StockRequest]) -> Result<(), Vec<ItemError>> {
        let checks = items.iter().map(|request| self.check_one(request));
        let failures: Vec<ItemError> = join_all(checks)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if failures.is_empty() {
            return Ok(());
        }

        tracing::warn!(failed = failures.len(), "inventory validation rejected items");
        Err(failures)
    }

    /// Checks one item, returning the current quote when it can be fulfilled.
    pub async fn check_one(&self, request: &StockRequest) -> Result<StockQuote, ItemError> {
        let result = self.lookup(request).await;
        if result.is_err() {
            metrics::counter!("inventory_rejections_total").increment(1);
        }
        result
    }

    async fn lookup(&self, request: &StockRequest) -> Result<StockQuote, ItemError> {
        let lookup = self
            .products
            .get_stock_and_price(&request.product_id, request.variant_id.as_ref())
            .await;

        match lookup {
            Ok(Some(quote)) if quote.stock >= request.quantity => Ok(quote),
            Ok(Some(quote)) => Err(ItemError::new(
                request,
                ItemErrorReason::InsufficientStock {
                    available: quote.stock,
                },
            )),
            Ok(None) => Err(ItemError::new(request, ItemErrorReason::NotFound)),
            Err(e) => {
                tracing::warn!(product = %request.product_id, error = %e, "stock lookup failed");
                Err(ItemError::new(request, ItemErrorReason::ServiceUnavailable))
            }
        }
    }
}
