//! Webhook signature verification.
//!
//! The provider signs `"<timestamp>.<body>"` with HMAC-SHA256 and sends
//! `t=<timestamp>,v1=<hex mac>` in the signature header.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::error::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Default replay window for signed timestamps.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Verifies provider signatures with a shared secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl SignatureVerifier {
    /// Creates a verifier with the default 5 minute tolerance.
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    /// Overrides the timestamp tolerance.
    pub fn with_tolerance_secs(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    /// Verifies `header` against `body` at time `now`.
    pub fn verify(
        &self,
        body: &[u8],
        header: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        let header = header.ok_or_else(|| reject("missing signature header"))?;
        let (timestamp, signatures) = parse_header(header)?;

        let tolerance = u64::try_from(self.tolerance_secs).unwrap_or(0);
        let skew = now
            .timestamp()
            .checked_sub(timestamp)
            .map(i64::unsigned_abs);
        if skew.is_none_or(|skew| skew > tolerance) {
            return Err(reject("timestamp outside tolerance"));
        }

        // Any v1 entry may match; providers send several during secret rotation.
        for candidate in signatures {
            let Ok(expected) = hex::decode(candidate) else {
                continue;
            };
            if self.mac(timestamp, body)?.verify_slice(&expected).is_ok() {
                return Ok(());
            }
        }

        Err(reject("signature mismatch"))
    }

    /// Builds a signature header for `body` at `timestamp`.
    pub fn sign(&self, body: &[u8], timestamp: i64) -> Result<String, WebhookError> {
        let mac = self.mac(timestamp, body)?;
        Ok(format!(
            "t={timestamp},v1={}",
            hex::encode(mac.finalize().into_bytes())
        ))
    }

    fn mac(&self, timestamp: i64, body: &[u8]) -> Result<HmacSha256, WebhookError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| WebhookError::Internal(e.to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(mac)
    }
}

fn reject(reason: &str) -> WebhookError {
    WebhookError::RejectedSignature(reason.to_string())
}

fn parse_header(header: &str) -> Result<(i64, Vec<&str>), WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(
                    value
                        .parse::<i64>()
                        .map_err(|_| reject("invalid timestamp"))?,
                );
            }
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| reject("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(reject("missing v1 signature"));
    }
    Ok((timestamp, signatures))
}
