use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from market data provider: {0}")]
    InvalidResponse(String),

    #[error("no data returned for {0}")]
    NoData(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
