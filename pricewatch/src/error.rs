use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Why an observation was rejected before touching any state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidInput {
    #[error("negative price {0}")]
    NegativePrice(Decimal),

    #[error("unparseable price {0:?}")]
    UnparseablePrice(String),

    #[error("malformed timestamp {0:?}")]
    MalformedTimestamp(String),

    /// Strictly older than the last accepted observation for the ticker.
    /// The row is not stored, so history only ever holds observations in
    /// timestamp order and the cached price never moves backwards. An equal
    /// timestamp is accepted and supersedes the earlier row.
    #[error("observation at {observed} is older than last known {previous}")]
    OutOfOrder {
        previous: DateTime<Utc>,
        observed: DateTime<Utc>,
    },
}

/// Per-ticker failure reported by the analysis engine and the batch driver.
/// None of these are fatal to a batch.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("symbol {ticker} not found")]
    SymbolNotFound { ticker: String },

    #[error("market data unavailable for {ticker}: {reason}")]
    UpstreamUnavailable { ticker: String, reason: String },

    #[error("store failure for {ticker}")]
    StoreFailure {
        ticker: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid input for {ticker}: {reason}")]
    InvalidInput { ticker: String, reason: InvalidInput },
}

impl ProcessError {
    pub fn ticker(&self) -> &str {
        match self {
            ProcessError::SymbolNotFound { ticker }
            | ProcessError::UpstreamUnavailable { ticker, .. }
            | ProcessError::StoreFailure { ticker, .. }
            | ProcessError::InvalidInput { ticker, .. } => ticker,
        }
    }

    pub(crate) fn store(ticker: &str, source: anyhow::Error) -> Self {
        ProcessError::StoreFailure {
            ticker: ticker.to_string(),
            source,
        }
    }

    pub(crate) fn invalid(ticker: &str, reason: InvalidInput) -> Self {
        ProcessError::InvalidInput {
            ticker: ticker.to_string(),
            reason,
        }
    }
}
