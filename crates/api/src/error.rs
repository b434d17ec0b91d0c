//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cart::CartError;
use checkout::{CheckoutError, WebhookError};
use domain::ItemError;
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// No usable identity headers.
    Unauthorized(String),
    /// Cart operation failed.
    Cart(CartError),
    /// Checkout or order operation failed.
    Checkout(CheckoutError),
    /// Webhook delivery failed.
    Webhook(WebhookError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, items) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            ApiError::Cart(err) => cart_error_to_response(err),
            ApiError::Checkout(err) => checkout_error_to_response(err),
            ApiError::Webhook(err) => (webhook_status(&err), err.to_string(), None),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, None),
        };

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "request failed");
        }

        let body = match items {
            Some(items) => serde_json::json!({ "error": message, "items": items }),
            None => serde_json::json!({ "error": message }),
        };
        (status, axum::Json(body)).into_response()
    }
}

type ErrorParts = (StatusCode, String, Option<Vec<ItemError>>);

fn store_status(err: &StoreError) -> StatusCode {
    if err.is_transient() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn cart_error_to_response(err: CartError) -> ErrorParts {
    let message = err.to_string();
    match err {
        CartError::Validation(_) => (StatusCode::BAD_REQUEST, message, None),
        CartError::StockConflict(items) => (StatusCode::CONFLICT, message, Some(items)),
        CartError::LineNotFound(_) => (StatusCode::NOT_FOUND, message, None),
        CartError::Store(e) => (store_status(&e), message, None),
    }
}

fn checkout_error_to_response(err: CheckoutError) -> ErrorParts {
    let message = err.to_string();
    match err {
        CheckoutError::Validation(_) => (StatusCode::BAD_REQUEST, message, None),
        CheckoutError::StockConflict(items) => (StatusCode::CONFLICT, message, Some(items)),
        CheckoutError::OrderNotFound(_) => (StatusCode::NOT_FOUND, message, None),
        CheckoutError::IllegalTransition { .. } | CheckoutError::DuplicateOrder(_) => {
            (StatusCode::CONFLICT, message, None)
        }
        CheckoutError::Gateway(_) => (StatusCode::BAD_GATEWAY, message, None),
        CheckoutError::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, message, None),
        CheckoutError::Store(e) => (store_status(&e), message, None),
    }
}

fn webhook_status(err: &WebhookError) -> StatusCode {
    match err {
        WebhookError::RejectedSignature(_) | WebhookError::Malformed(_) => StatusCode::BAD_REQUEST,
        WebhookError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        WebhookError::Internal(_) | WebhookError::RetryExhausted { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<CartError> for ApiError {
    fn from(err: CartError) -> Self {
        ApiError::Cart(err)
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        ApiError::Webhook(err)
    }
}
