use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::InvalidInput;
use crate::time;

pub type ObservationId = Uuid;
pub type EventId = Uuid;

/// A tradable symbol. Immutable once seeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub ticker: String,
    pub name: String,
}

impl Symbol {
    pub fn new(ticker: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            name: name.into(),
        }
    }
}

/// Reads an upstream float through its shortest decimal representation so
/// `150.1` stays `150.1` instead of picking up binary noise.
pub fn decimal_from_f64(value: f64) -> Result<Decimal, InvalidInput> {
    if !value.is_finite() {
        return Err(InvalidInput::UnparseablePrice(value.to_string()));
    }
    Decimal::from_str(&value.to_string())
        .or_else(|_| Decimal::from_scientific(&format!("{value:e}")))
        .map_err(|_| InvalidInput::UnparseablePrice(value.to_string()))
}

/// One ingested data point, before it has been stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
    pub volume: Option<i64>,
}

impl Observation {
    pub fn new(price: Decimal, observed_at: DateTime<Utc>) -> Self {
        Self {
            price,
            observed_at,
            volume: None,
        }
    }

    pub fn with_volume(mut self, volume: Option<i64>) -> Self {
        self.volume = volume;
        self
    }

    /// Converts a raw upstream quote (binary float price, epoch-ms time) into a
    /// fixed-point observation.
    pub fn from_raw(price: f64, timestamp_ms: i64, volume: Option<i64>) -> Result<Self, InvalidInput> {
        let price = decimal_from_f64(price)?;
        let observed_at = time::from_ms(timestamp_ms)
            .ok_or_else(|| InvalidInput::MalformedTimestamp(timestamp_ms.to_string()))?;

        Ok(Self {
            price,
            observed_at,
            volume,
        })
    }

    /// Rejects inputs that must never reach a store and normalises the
    /// timestamp to storage precision.
    pub fn validated(self) -> Result<Self, InvalidInput> {
        if self.price.is_sign_negative() && !self.price.is_zero() {
            return Err(InvalidInput::NegativePrice(self.price));
        }
        Ok(Self {
            observed_at: time::truncate_to_ms(self.observed_at),
            ..self
        })
    }
}

/// Stored price row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub id: ObservationId,
    pub ticker: String,
    pub observed_at: DateTime<Utc>,
    pub price: Decimal,
    pub volume: Option<i64>,
}

impl PriceObservation {
    pub fn new(ticker: &str, obs: &Observation) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticker: ticker.to_string(),
            observed_at: obs.observed_at,
            price: obs.price,
            volume: obs.volume,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "PRICE_INCREASE")]
    Increase,
    #[serde(rename = "PRICE_DECREASE")]
    Decrease,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Increase => "PRICE_INCREASE",
            EventKind::Decrease => "PRICE_DECREASE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRICE_INCREASE" => Ok(EventKind::Increase),
            "PRICE_DECREASE" => Ok(EventKind::Decrease),
            other => Err(anyhow::anyhow!("Invalid EventKind value: {}", other)),
        }
    }
}

/// Context stored with every event. Persisted as JSON with decimal strings
/// and RFC 3339 timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDetails {
    pub previous_price: Decimal,
    pub current_price: Decimal,
    /// Always exactly two fractional digits, e.g. `"-2.00"`.
    pub percentage_change: String,
    pub previous_timestamp: Option<DateTime<Utc>>,
    pub current_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignificantEvent {
    pub id: EventId,
    pub ticker: String,
    pub kind: EventKind,
    /// Wall-clock time of detection, not of either observation.
    pub detected_at: DateTime<Utc>,
    pub details: EventDetails,
}

/// Selection for event queries. `since` is inclusive, `until` exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub since: DateTime<Utc>,
    pub until: Option<DateTime<Utc>>,
    pub ticker: Option<String>,
    pub kind: Option<EventKind>,
}

impl EventFilter {
    pub fn since(since: DateTime<Utc>) -> Self {
        Self {
            since,
            until: None,
            ticker: None,
            kind: None,
        }
    }

    pub fn ticker(mut self, ticker: impl Into<String>) -> Self {
        self.ticker = Some(ticker.into());
        self
    }

    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn matches(&self, ev: &SignificantEvent) -> bool {
        ev.detected_at >= self.since
            && self.until.is_none_or(|u| ev.detected_at < u)
            && self.ticker.as_deref().is_none_or(|t| t == ev.ticker)
            && self.kind.is_none_or(|k| k == ev.kind)
    }
}
