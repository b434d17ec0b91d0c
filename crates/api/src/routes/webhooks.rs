//! Payment-provider webhook endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use ::checkout::{Ack, FailedEvent};

use super::AppState;
use crate::error::ApiError;

/// Header carrying `t=<unix>,v1=<hex hmac>`.
pub const SIGNATURE_HEADER: &str = "payment-signature";

/// POST /webhooks/payments
///
/// Every verified event is acknowledged with 200, including unknown orders
/// and event types, so the provider stops redelivering.
#[tracing::instrument(skip_all)]
pub async fn receive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Ack>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let ack = state.webhooks.dispatch(&body, signature).await?;
    Ok(Json(ack))
}

/// GET /admin/webhooks/failed — deliveries that exhausted their retries.
pub async fn failed(State(state): State<Arc<AppState>>) -> Json<Vec<FailedEvent>> {
    Json(state.webhooks.failed_events().await)
}
