//! Checkout endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use ::checkout::CheckoutSession;

use super::AppState;
use crate::error::ApiError;
use crate::identity::Identity;

/// POST /checkout — validate the cart against live stock and open a payment intent.
#[tracing::instrument(skip(state))]
pub async fn begin(
    State(state): State<Arc<AppState>>,
    Identity(owner): Identity,
) -> Result<Json<CheckoutSession>, ApiError> {
    let session = state.checkout.begin_checkout(&owner).await?;
    Ok(Json(session))
}
