use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::prices::model::{
    EventFilter, EventId, ObservationId, PriceObservation, SignificantEvent, Symbol,
};

/// Lookup of the symbols the service tracks.
#[async_trait]
pub trait SymbolDirectory: Send + Sync {
    async fn get_symbol(&self, ticker: &str) -> Result<Option<Symbol>>;

    /// All symbols, ordered by ticker.
    async fn list_symbols(&self) -> Result<Vec<Symbol>>;

    /// Administrative seed. Returns false if the ticker already existed,
    /// in which case nothing is changed.
    async fn insert_symbol(&self, symbol: &Symbol) -> Result<bool>;
}

/// Append-only price history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn latest_observation(&self, ticker: &str) -> Result<Option<PriceObservation>>;

    async fn insert_observation(&self, obs: &PriceObservation) -> Result<ObservationId>;

    /// Observations at or after `since`, oldest first.
    async fn query_observations(
        &self,
        ticker: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_event(&self, event: &SignificantEvent) -> Result<EventId>;

    /// Matching events, newest detection first.
    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<SignificantEvent>>;
}

/// Everything the analysis engine needs from durable storage.
#[async_trait]
pub trait PriceRepository: SymbolDirectory + HistoryStore + EventStore {
    /// Writes the event (if any) and the observation atomically: either both
    /// rows exist afterwards or neither does.
    async fn commit_observation(
        &self,
        obs: &PriceObservation,
        event: Option<&SignificantEvent>,
    ) -> Result<()>;
}
