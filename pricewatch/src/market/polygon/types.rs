use serde::Deserialize;

use crate::market::errors::MarketDataError;
use crate::market::provider::{DailyBar, Trade};

/// `GET /v2/last/trade/{ticker}`
#[derive(Debug, Deserialize)]
pub struct LastTradeEnvelope {
    pub status: String,
    pub results: Option<LastTrade>,
}

#[derive(Debug, Deserialize)]
pub struct LastTrade {
    /// Price
    pub p: f64,
    /// Size
    pub s: Option<f64>,
    /// SIP timestamp, nanoseconds
    pub t: i64,
}

/// `GET /v2/aggs/ticker/{ticker}/prev` and
/// `GET /v2/aggs/ticker/{ticker}/range/1/day/{from}/{to}`
#[derive(Debug, Deserialize)]
pub struct AggregatesEnvelope {
    pub status: String,
    #[serde(default)]
    pub results: Vec<Aggregate>,
}

#[derive(Debug, Deserialize)]
pub struct Aggregate {
    /// Close
    pub c: f64,
    /// Volume
    pub v: Option<f64>,
    /// Bar start, milliseconds
    pub t: i64,
}

impl LastTradeEnvelope {
    pub fn into_trade(self, ticker: &str) -> Result<Trade, MarketDataError> {
        if self.status != "OK" && self.status != "DELAYED" {
            return Err(MarketDataError::NoData(ticker.to_string()));
        }
        let r = self
            .results
            .ok_or_else(|| MarketDataError::NoData(ticker.to_string()))?;

        Ok(Trade {
            price: r.p,
            timestamp_ms: r.t.div_euclid(1_000_000),
            volume: r.s.map(|s| s as i64),
        })
    }
}

impl AggregatesEnvelope {
    pub fn into_trade(self, ticker: &str) -> Result<Trade, MarketDataError> {
        if self.status != "OK" && self.status != "DELAYED" {
            return Err(MarketDataError::NoData(ticker.to_string()));
        }
        let bar = self
            .results
            .into_iter()
            .next()
            .ok_or_else(|| MarketDataError::NoData(ticker.to_string()))?;

        Ok(Trade {
            price: bar.c,
            timestamp_ms: bar.t,
            volume: bar.v.map(|v| v as i64),
        })
    }

    /// A range with no trading days comes back as `OK` with no results, which
    /// is an empty series rather than missing data.
    pub fn into_daily_bars(self, ticker: &str) -> Result<Vec<DailyBar>, MarketDataError> {
        if self.status != "OK" && self.status != "DELAYED" {
            return Err(MarketDataError::NoData(ticker.to_string()));
        }
        Ok(self
            .results
            .into_iter()
            .map(|bar| DailyBar {
                close: bar.c,
                volume: bar.v,
                timestamp_ms: bar.t,
            })
            .collect())
    }
}
