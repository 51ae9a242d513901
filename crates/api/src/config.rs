//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use common::{Money, ProductId};
use thiserror::Error;

/// One product to register in the ledger and price in the catalog at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedProduct {
    pub product_id: ProductId,
    pub available: u32,
    pub threshold: u32,
    pub price: Money,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid SEED_PRODUCTS entry '{0}': expected product_id:available:threshold:price_cents")]
pub struct SeedParseError(String);

impl FromStr for SeedProduct {
    type Err = SeedParseError;

    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let invalid = || SeedParseError(entry.to_string());
        let parts: Vec<&str> = entry.trim().split(':').collect();
        let [product_id, available, threshold, price] = parts.as_slice() else {
            return Err(invalid());
        };
        if product_id.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            product_id: ProductId::new(*product_id),
            available: available.parse().map_err(|_| invalid())?,
            threshold: threshold.parse().map_err(|_| invalid())?,
            price: Money::from_cents(price.parse().map_err(|_| invalid())?),
        })
    }
}

/// Server and worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `pretty` or `json` (default `pretty`)
/// - `DATABASE_URL`: PostgreSQL event store and ledger when set, in-memory otherwise
/// - `ORDER_WORKERS`, `PAYMENT_WORKERS`: consumers per queue (default 4 and 2)
/// - `BATCH_SIZE`, `VISIBILITY_TIMEOUT_SECS`, `WAIT_TIME_MS`, `MAX_RECEIVE_COUNT`:
///   consumer tuning (default 10, 30, 1000, 5)
/// - `CURRENCY`: order currency (default `USD`)
/// - `CLEAR_CART_ON_CHECKOUT`: cart policy (default `true`)
/// - `SEED_PRODUCTS`: comma-separated `product_id:available:threshold:price_cents`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub database_url: Option<String>,
    pub order_workers: usize,
    pub payment_workers: usize,
    pub batch_size: usize,
    pub visibility_timeout: Duration,
    pub wait_time: Duration,
    pub max_receive_count: u32,
    pub currency: String,
    pub clear_cart_on_checkout: bool,
    pub seed_products: Vec<SeedProduct>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    ///
    /// Only a malformed `SEED_PRODUCTS` is an error; other unparsable values
    /// fall back to their defaults.
    pub fn from_env() -> Result<Self, SeedParseError> {
        let defaults = Self::default();

        let seed_products = match std::env::var("SEED_PRODUCTS") {
            Ok(raw) => parse_seed_products(&raw)?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: parsed("PORT").unwrap_or(defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_json: std::env::var("LOG_FORMAT")
                .map(|format| format.eq_ignore_ascii_case("json"))
                .unwrap_or(defaults.log_json),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            order_workers: parsed("ORDER_WORKERS").unwrap_or(defaults.order_workers),
            payment_workers: parsed("PAYMENT_WORKERS").unwrap_or(defaults.payment_workers),
            batch_size: parsed("BATCH_SIZE").unwrap_or(defaults.batch_size),
            visibility_timeout: parsed("VISIBILITY_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.visibility_timeout),
            wait_time: parsed("WAIT_TIME_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.wait_time),
            max_receive_count: parsed("MAX_RECEIVE_COUNT").unwrap_or(defaults.max_receive_count),
            currency: std::env::var("CURRENCY").unwrap_or(defaults.currency),
            clear_cart_on_checkout: parsed("CLEAR_CART_ON_CHECKOUT")
                .unwrap_or(defaults.clear_cart_on_checkout),
            seed_products,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_json: false,
            database_url: None,
            order_workers: 4,
            payment_workers: 2,
            batch_size: 10,
            visibility_timeout: Duration::from_secs(30),
            wait_time: Duration::from_millis(1000),
            max_receive_count: 5,
            currency: "USD".to_string(),
            clear_cart_on_checkout: true,
            seed_products: Vec::new(),
        }
    }
}

fn parsed<T: FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|value| value.trim().parse().ok())
}

pub fn parse_seed_products(raw: &str) -> Result<Vec<SeedProduct>, SeedParseError> {
    raw.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(str::parse)
        .collect()
}
