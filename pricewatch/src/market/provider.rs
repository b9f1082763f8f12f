use async_trait::async_trait;
use chrono::NaiveDate;

use crate::market::errors::MarketDataError;

/// Latest quote as reported upstream, before conversion to fixed point.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub price: f64,
    pub timestamp_ms: i64,
    pub volume: Option<i64>,
}

/// One trading day's aggregate bar.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyBar {
    pub close: f64,
    pub volume: Option<f64>,
    /// Bar start, epoch milliseconds.
    pub timestamp_ms: i64,
}

/// Source of market data. Implementations own their transport timeouts;
/// the batch driver adds its own per-ticker cap on top.
#[async_trait]
pub trait MarketDataProvider: Send + Sync + 'static {
    async fn latest_trade(&self, ticker: &str) -> Result<Trade, MarketDataError>;

    /// Daily bars between `from` and `to`, both inclusive, oldest first.
    /// An empty range is `Ok(vec![])`.
    async fn daily_aggregates(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>, MarketDataError>;
}
