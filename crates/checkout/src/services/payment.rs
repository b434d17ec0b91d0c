//! Payment provider trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned by the payment provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Payment provider error: {0}")]
pub struct GatewayError(pub String);

/// A payment intent created by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Provider reference; correlates webhooks with orders.
    pub id: String,
    /// Secret handed to the client to confirm the payment.
    pub client_secret: String,
    pub amount: Money,
    pub currency: String,
    pub metadata: HashMap<String, String>,
}

/// Trait for the external payment provider.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Creates a payment intent for `amount` with opaque metadata.
    async fn create_payment_intent(
        &self,
        amount: Money,
        currency: &str,
        metadata: HashMap<String, String>,
    ) -> Result<PaymentIntent, GatewayError>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    intents: Vec<PaymentIntent>,
    next_id: u32,
    fail_on_create: bool,
}

/// In-memory payment provider for testing and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentProvider {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentProvider {
    /// Creates a new in-memory payment provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the provider to reject intent creation.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .fail_on_create = fail;
    }

    /// Returns the number of intents created.
    pub fn intent_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .intents
            .len()
    }

    /// Returns the most recently created intent.
    pub fn last_intent(&self) -> Option<PaymentIntent> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .intents
            .last()
            .cloned()
    }
}

#[async_trait]
impl PaymentProvider for InMemoryPaymentProvider {
    async fn create_payment_intent(
        &self,
        amount: Money,
        currency: &str,
        metadata: HashMap<String, String>,
    ) -> Result<PaymentIntent, GatewayError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());

        if state.fail_on_create {
            return Err(GatewayError("card network unavailable".to_string()));
        }

        state.next_id += 1;
        let id = format!("pi_{:06}", state.next_id);
        let intent = PaymentIntent {
            client_secret: format!("{id}_secret_{}", uuid::Uuid::new_v4().simple()),
            id,
            amount,
            currency: currency.to_string(),
            metadata,
        };
        state.intents.push(intent.clone());

        Ok(intent)
    }
}
