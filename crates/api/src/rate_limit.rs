//! Per-owner rate limiting using governor and `tower_governor`.

use std::sync::Arc;

use axum::http::Request;
use governor::clock::QuantaInstant;
use governor::middleware::NoOpMiddleware;
use tower_governor::{GovernorError, GovernorLayer, governor::GovernorConfigBuilder};

use crate::identity;

/// Keys requests by cart owner (`user:<id>` or `guest:<token>`).
///
/// Requests without identity share one bucket; the handler rejects them
/// with 401 anyway.
#[derive(Clone, Copy)]
pub struct OwnerKeyExtractor;

impl tower_governor::key_extractor::KeyExtractor for OwnerKeyExtractor {
    type Key = String;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        Ok(identity::owner_key(req.headers())
            .map(|owner| owner.to_string())
            .unwrap_or_else(|_| "anonymous".to_string()))
    }
}

/// Rate limiter layer type for Axum.
pub type RateLimiterLayer =
    GovernorLayer<OwnerKeyExtractor, NoOpMiddleware<QuantaInstant>, axum::body::Body>;

/// Creates a limiter allowing `per_minute` requests per owner, with the full
/// minute's budget available as a burst.
///
/// Returns `None` if `per_minute` is zero.
pub fn owner_rate_limiter(per_minute: u32) -> Option<RateLimiterLayer> {
    if per_minute == 0 {
        return None;
    }
    let replenish_ms = (60_000 / u64::from(per_minute)).max(1);

    let config = GovernorConfigBuilder::default()
        .key_extractor(OwnerKeyExtractor)
        .per_millisecond(replenish_ms)
        .burst_size(per_minute)
        .finish()?;
    Some(GovernorLayer::new(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_budget_is_rejected() {
        assert!(owner_rate_limiter(0).is_none());
        assert!(owner_rate_limiter(120).is_some());
        assert!(owner_rate_limiter(1_000_000).is_some());
    }

    #[test]
    fn test_key_is_owner() {
        use tower_governor::key_extractor::KeyExtractor;

        let req = Request::builder()
            .header(identity::GUEST_TOKEN_HEADER, "g1")
            .body(())
            .unwrap();
        assert_eq!(OwnerKeyExtractor.extract(&req).unwrap(), "guest:g1");

        let anonymous = Request::builder().body(()).unwrap();
        assert_eq!(OwnerKeyExtractor.extract(&anonymous).unwrap(), "anonymous");
    }
}
