//! Cart endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use common::{Money, VariantId};
use domain::{Cart, LineItem, LineKey};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::ApiError;
use crate::identity::{self, Identity};

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct SetQuantityRequest {
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Default)]
pub struct VariantQuery {
    pub variant_id: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct CartResponse {
    pub owner: String,
    pub lines: Vec<LineItem>,
    pub total_quantity: u32,
    pub total: Money,
    pub last_synced_at: DateTime<Utc>,
}

impl From<Cart> for CartResponse {
    fn from(cart: Cart) -> Self {
        Self {
            owner: cart.owner_key().to_string(),
            total_quantity: cart.total_quantity(),
            total: cart.total(),
            last_synced_at: cart.last_synced_at(),
            lines: cart.into_lines(),
        }
    }
}

fn line_key(product_id: String, variant_id: Option<String>) -> LineKey {
    LineKey::new(product_id, variant_id.map(VariantId::new))
}

// -- Handlers --

/// GET /cart
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Identity(owner): Identity,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state.carts.get(&owner).await?;
    Ok(Json(cart.into()))
}

/// POST /cart/items — add a quantity of a product (or variant).
#[tracing::instrument(skip(state, req))]
pub async fn add_item(
    State(state): State<Arc<AppState>>,
    Identity(owner): Identity,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let key = line_key(req.product_id, req.variant_id);
    let cart = state.carts.add_item(&owner, key, req.quantity).await?;
    Ok(Json(cart.into()))
}

/// PUT /cart/items/{product_id} — set a line's quantity; zero removes it.
#[tracing::instrument(skip(state, req))]
pub async fn set_quantity(
    State(state): State<Arc<AppState>>,
    Identity(owner): Identity,
    Path(product_id): Path<String>,
    Query(query): Query<VariantQuery>,
    Json(req): Json<SetQuantityRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let key = line_key(product_id, query.variant_id);
    let cart = state.carts.set_quantity(&owner, key, req.quantity).await?;
    Ok(Json(cart.into()))
}

/// DELETE /cart/items/{product_id}
#[tracing::instrument(skip(state))]
pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    Identity(owner): Identity,
    Path(product_id): Path<String>,
    Query(query): Query<VariantQuery>,
) -> Result<Json<CartResponse>, ApiError> {
    let key = line_key(product_id, query.variant_id);
    let cart = state.carts.remove_item(&owner, &key).await?;
    Ok(Json(cart.into()))
}

/// DELETE /cart
#[tracing::instrument(skip(state))]
pub async fn clear(
    State(state): State<Arc<AppState>>,
    Identity(owner): Identity,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state.carts.clear(&owner).await?;
    Ok(Json(cart.into()))
}

/// POST /cart/merge — fold the guest cart into the user's cart at login.
///
/// Needs both `x-user-id` and `x-guest-token`.
#[tracing::instrument(skip(state, headers))]
pub async fn merge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CartResponse>, ApiError> {
    let user = identity::user_id(&headers)?
        .ok_or_else(|| ApiError::Unauthorized("merge requires x-user-id".to_string()))?;
    let guest = identity::guest_token(&headers)
        .ok_or_else(|| ApiError::BadRequest("merge requires x-guest-token".to_string()))?;

    let cart = state.reconciler.merge(&guest, user).await?;
    Ok(Json(cart.into()))
}
