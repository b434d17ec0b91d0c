//! Caller identity from request headers.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use common::{GuestToken, OwnerKey, UserId};

use crate::error::ApiError;

/// Header carrying an authenticated user's id.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying an anonymous visitor's token.
pub const GUEST_TOKEN_HEADER: &str = "x-guest-token";

/// The cart owner making the request. A user id wins over a guest token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(pub OwnerKey);

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        owner_key(&parts.headers).map(Identity)
    }
}

/// Resolves the owner key from identity headers.
pub fn owner_key(headers: &HeaderMap) -> Result<OwnerKey, ApiError> {
    if let Some(user) = user_id(headers)? {
        return Ok(OwnerKey::user(user));
    }
    guest_token(headers)
        .map(OwnerKey::Guest)
        .ok_or_else(|| ApiError::Unauthorized("missing x-user-id or x-guest-token".to_string()))
}

/// Reads the user id header, if present.
pub fn user_id(headers: &HeaderMap) -> Result<Option<UserId>, ApiError> {
    let Some(value) = header(headers, USER_ID_HEADER) else {
        return Ok(None);
    };
    uuid::Uuid::parse_str(value)
        .map(|uuid| Some(UserId::from_uuid(uuid)))
        .map_err(|_| ApiError::Unauthorized("x-user-id is not a valid id".to_string()))
}

/// Reads the guest token header, if present.
pub fn guest_token(headers: &HeaderMap) -> Option<GuestToken> {
    header(headers, GUEST_TOKEN_HEADER).map(GuestToken::new)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
