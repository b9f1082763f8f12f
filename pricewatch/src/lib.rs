pub mod analysis;
pub mod config;
pub mod db;
pub mod market;
pub mod metrics;
pub mod prices;

pub mod error;
pub mod logger;
pub mod time;
