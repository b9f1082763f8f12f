pub mod errors;
pub mod poller;
pub mod polygon;
pub mod provider;

pub use errors::MarketDataError;
pub use provider::{DailyBar, MarketDataProvider, Trade};
