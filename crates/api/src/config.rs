//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

const DEV_WEBHOOK_SECRET: &str = "whsec_dev_only";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables (and `.env`, if present):
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `text` or `json` (default: `text`)
/// - `DATABASE_URL` — PostgreSQL URL; unset keeps everything in memory
/// - `WEBHOOK_SECRET` — payment-provider signing secret
/// - `CART_CACHE_TTL_SECS` — cart cache entry lifetime (default: `300`)
/// - `CART_CACHE_CAPACITY` — maximum cached carts (default: `10000`)
/// - `CURRENCY` — checkout currency (default: `"usd"`)
/// - `RATE_LIMIT_PER_MINUTE` — per-owner request budget (default: `120`)
/// - `WEBHOOK_MAX_ATTEMPTS` — handler attempts per delivery (default: `5`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub webhook_secret: SecretString,
    pub cart_cache_ttl: Duration,
    pub cart_cache_capacity: u64,
    pub currency: String,
    pub rate_limit_per_minute: u32,
    pub webhook_max_attempts: u32,
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            webhook_secret: lookup("WEBHOOK_SECRET")
                .map(SecretString::from)
                .unwrap_or(defaults.webhook_secret),
            cart_cache_ttl: parse_var(&lookup, "CART_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cart_cache_ttl),
            cart_cache_capacity: parse_var(&lookup, "CART_CACHE_CAPACITY")
                .unwrap_or(defaults.cart_cache_capacity),
            currency: lookup("CURRENCY")
                .map(|c| c.to_ascii_lowercase())
                .unwrap_or(defaults.currency),
            rate_limit_per_minute: parse_var::<u32>(&lookup, "RATE_LIMIT_PER_MINUTE")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.rate_limit_per_minute),
            webhook_max_attempts: parse_var::<u32>(&lookup, "WEBHOOK_MAX_ATTEMPTS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.webhook_max_attempts),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            webhook_secret: SecretString::from(DEV_WEBHOOK_SECRET.to_string()),
            cart_cache_ttl: Duration::from_secs(300),
            cart_cache_capacity: 10_000,
            currency: "usd".to_string(),
            rate_limit_per_minute: 120,
            webhook_max_attempts: 5,
        }
    }
}
