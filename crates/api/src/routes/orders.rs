//! Order placement, lookup and back-office status endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::OrderId;
use domain::{Address, Order, OrderStatus};
use serde::Deserialize;

use super::AppState;
use crate::error::ApiError;
use crate::identity::Identity;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub payment_reference: String,
    pub shipping_address: Address,
    pub customer_email: String,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceRequest {
    pub status: OrderStatus,
}

// -- Handlers --

/// POST /orders — snapshot the caller's cart into a pending order.
#[tracing::instrument(skip(state, req))]
pub async fn place(
    State(state): State<Arc<AppState>>,
    Identity(owner): Identity,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = state
        .orders
        .place_order(
            &owner,
            &req.payment_reference,
            req.shipping_address,
            &req.customer_email,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders/{id} — only the owner sees the order.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Identity(owner): Identity,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.orders.get(order_id).await?;
    if order.owner_key != owner {
        return Err(ApiError::NotFound(format!("Order {id} not found")));
    }
    Ok(Json(order))
}

/// POST /admin/orders/{id}/status — fulfillment or operator cancellation.
#[tracing::instrument(skip(state, req))]
pub async fn advance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AdvanceRequest>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.orders.advance(order_id, req.status).await?;
    Ok(Json(order))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(OrderId::from_uuid(uuid))
}
