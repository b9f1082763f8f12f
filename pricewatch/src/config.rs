use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};

use crate::analysis::detector::{DEFAULT_EFFECTIVELY_ZERO_PRICE, DEFAULT_THRESHOLD_PCT, DetectorConfig};
use crate::market::polygon::QuoteEndpoint;
use crate::prices::model::Symbol;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string (any sqlx `Any` URL).
    pub database_url: String,

    /// Upper bound on pooled database connections.
    pub db_max_connections: u32,

    // =========================
    // Detection
    // =========================
    /// Threshold and zero-guard used to classify price moves.
    pub detector: DetectorConfig,

    // =========================
    // Polling
    // =========================
    /// Time between two scheduled batches.
    ///
    /// A batch that takes longer than this delays the next tick instead of
    /// stacking ticks up.
    pub poll_interval: Duration,

    /// Maximum wait for a single ticker's upstream fetch.
    ///
    /// A ticker that exceeds it is recorded as timed out; the rest of the
    /// batch carries on.
    pub fetch_timeout: Duration,

    /// How many tickers of one batch may be in flight at once.
    pub max_concurrent_fetches: usize,

    // =========================
    // Market data
    // =========================
    pub polygon_base_url: String,
    pub polygon_api_key: String,
    pub quote_endpoint: QuoteEndpoint,

    /// Symbols inserted at startup if not already present.
    pub seed_symbols: Vec<Symbol>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Missing keys fall back
    /// to defaults; present but malformed values are an error.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL")
            .unwrap_or_else(|| "sqlite://pricewatch_dev.db?mode=rwc".to_string());

        let threshold_pct = parse_or(&var, "CHANGE_THRESHOLD_PCT", DEFAULT_THRESHOLD_PCT)?;
        let effectively_zero_price =
            parse_or(&var, "EFFECTIVELY_ZERO_PRICE", DEFAULT_EFFECTIVELY_ZERO_PRICE)?;
        if threshold_pct.is_sign_negative() {
            return Err(anyhow!("CHANGE_THRESHOLD_PCT must not be negative: {threshold_pct}"));
        }

        let quote_endpoint = match var("PRICE_SOURCE") {
            Some(v) => QuoteEndpoint::from_str(&v)?,
            None => QuoteEndpoint::LastTrade,
        };

        let seed_symbols = match var("SEED_SYMBOLS") {
            Some(v) => parse_symbols(&v)?,
            None => parse_symbols(DEFAULT_SEED_SYMBOLS)?,
        };

        Ok(Self {
            database_url,
            db_max_connections: parse_or(&var, "DB_MAX_CONNECTIONS", 16u32)?.max(1),

            detector: DetectorConfig {
                threshold_pct,
                effectively_zero_price,
            },

            poll_interval: Duration::from_secs(parse_or(&var, "POLL_INTERVAL_SECS", 60u64)?.max(1)),
            fetch_timeout: Duration::from_millis(parse_or(&var, "FETCH_TIMEOUT_MS", 10_000u64)?),
            max_concurrent_fetches: parse_or(&var, "MAX_CONCURRENT_FETCHES", 8usize)?.max(1),

            polygon_base_url: var("POLYGON_BASE_URL")
                .unwrap_or_else(|| "https://api.polygon.io".to_string()),
            polygon_api_key: var("POLYGON_API_KEY").unwrap_or_default(),
            quote_endpoint,

            seed_symbols,
        })
    }
}

const DEFAULT_SEED_SYMBOLS: &str = "GOOGL:Alphabet Inc.,AMZN:Amazon.com Inc.,MSFT:Microsoft Corp.";

fn parse_or<T, V>(var: &V, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

/// Parses `TICKER:Name,TICKER:Name`. A bare `TICKER` uses the ticker as name.
fn parse_symbols(raw: &str) -> anyhow::Result<Vec<Symbol>> {
    let mut out = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (ticker, name) = match item.split_once(':') {
            Some((t, n)) => (t.trim(), n.trim()),
            None => (item, item),
        };
        if ticker.is_empty() {
            return Err(anyhow!("empty ticker in symbol list: {raw:?}"));
        }
        out.push(Symbol::new(ticker.to_uppercase(), name));
    }
    Ok(out)
}
