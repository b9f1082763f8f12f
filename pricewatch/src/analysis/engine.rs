//! Analysis engine: turns one new observation into an optional event, a
//! history row and a cache update.
//!
//! Guarantees, per successful `process_new_price_data` call:
//! - exactly one new observation row, and at most one event row, committed
//!   in a single transaction;
//! - the cache is updated only after that commit, so it never runs ahead of
//!   the store;
//! - calls for the same ticker are serialized, calls for different tickers
//!   never wait on each other.
//!
//! Failures are reported as `ProcessError` and leave cache and store
//! untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::analysis::detector::ChangeDetector;
use crate::analysis::summary::EventSummary;
use crate::error::{InvalidInput, ProcessError};
use crate::logger::warn_if_slow;
use crate::prices::cache::{PriceCache, PriceEntry};
use crate::prices::model::{
    EventDetails, EventFilter, Observation, PriceObservation, SignificantEvent,
};
use crate::prices::repository::PriceRepository;
use crate::time;

/// Where a previous price can come from, in lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    Cache,
    History,
}

const LOOKUP_ORDER: [PriceSource; 2] = [PriceSource::Cache, PriceSource::History];

/// One async mutex per ticker, created on first use.
#[derive(Default)]
struct TickerLocks {
    inner: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TickerLocks {
    fn for_ticker(&self, ticker: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .lock()
            .entry(ticker.to_string())
            .or_default()
            .clone()
    }
}

pub struct AnalysisEngine {
    repo: Arc<dyn PriceRepository>,
    cache: Arc<PriceCache>,
    detector: ChangeDetector,
    locks: TickerLocks,
}

impl AnalysisEngine {
    pub fn new(
        repo: Arc<dyn PriceRepository>,
        cache: Arc<PriceCache>,
        detector: ChangeDetector,
    ) -> Self {
        Self {
            repo,
            cache,
            detector,
            locks: TickerLocks::default(),
        }
    }

    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }

    pub fn repository(&self) -> &Arc<dyn PriceRepository> {
        &self.repo
    }

    /// Rebuilds the cache from history. Safe to call at any time.
    pub async fn warm_start(&self) -> anyhow::Result<usize> {
        self.cache.warm_start(self.repo.as_ref()).await
    }

    #[instrument(
        skip(self, obs),
        target = "analysis",
        fields(price = %obs.price, observed_at = %obs.observed_at)
    )]
    pub async fn process_new_price_data(
        &self,
        ticker: &str,
        obs: Observation,
    ) -> Result<Option<SignificantEvent>, ProcessError> {
        let obs = obs
            .validated()
            .map_err(|reason| ProcessError::invalid(ticker, reason))?;

        let symbol = warn_if_slow("db_get_symbol", Duration::from_millis(50), async {
            self.repo.get_symbol(ticker).await
        })
        .await
        .map_err(|e| ProcessError::store(ticker, e))?;

        if symbol.is_none() {
            warn!(ticker, "symbol not found; cannot process");
            return Err(ProcessError::SymbolNotFound {
                ticker: ticker.to_string(),
            });
        }

        let lock = self.locks.for_ticker(ticker);
        let _guard = lock.lock().await;

        let previous = self
            .previous_price(ticker)
            .await
            .map_err(|e| ProcessError::store(ticker, e))?;

        if let Some((prev, _)) = &previous {
            if obs.observed_at < prev.observed_at {
                warn!(
                    ticker,
                    previous = %prev.observed_at,
                    observed = %obs.observed_at,
                    "rejecting out-of-order observation"
                );
                return Err(ProcessError::invalid(
                    ticker,
                    InvalidInput::OutOfOrder {
                        previous: prev.observed_at,
                        observed: obs.observed_at,
                    },
                ));
            }
        }

        let event = previous
            .as_ref()
            .and_then(|(prev, _)| self.detect(ticker, prev, &obs));

        let row = PriceObservation::new(ticker, &obs);

        warn_if_slow("db_commit_observation", Duration::from_millis(100), async {
            self.repo.commit_observation(&row, event.as_ref()).await
        })
        .await
        .map_err(|e| ProcessError::store(ticker, e))?;

        self.cache.put(ticker, obs.price, obs.observed_at);

        if let Some(ev) = &event {
            info!(
                ticker,
                kind = %ev.kind,
                pct = %ev.details.percentage_change,
                "significant event created"
            );
        }
        debug!(ticker, price = %obs.price, "price observation saved");

        Ok(event)
    }

    /// Walks `LOOKUP_ORDER` and stops at the first hit.
    async fn previous_price(
        &self,
        ticker: &str,
    ) -> anyhow::Result<Option<(PriceEntry, PriceSource)>> {
        for source in LOOKUP_ORDER {
            if let Some(entry) = self.lookup(source, ticker).await? {
                if source != PriceSource::Cache {
                    info!(ticker, ?source, price = %entry.price, "previous price not cached; using fallback");
                }
                return Ok(Some((entry, source)));
            }
        }
        Ok(None)
    }

    async fn lookup(&self, source: PriceSource, ticker: &str) -> anyhow::Result<Option<PriceEntry>> {
        match source {
            PriceSource::Cache => Ok(self.cache.get(ticker)),
            PriceSource::History => {
                let latest = warn_if_slow("db_latest_observation", Duration::from_millis(50), async {
                    self.repo.latest_observation(ticker).await
                })
                .await
                .context("history lookup failed")?;
                Ok(latest.as_ref().map(PriceEntry::from))
            }
        }
    }

    fn detect(&self, ticker: &str, prev: &PriceEntry, obs: &Observation) -> Option<SignificantEvent> {
        let c = self.detector.classify(prev.price, obs.price);

        info!(
            ticker,
            prev_price = %prev.price,
            curr_price = %obs.price,
            pct_change = %c.percentage_display(),
            "price change computed"
        );

        let kind = c.kind?;
        Some(SignificantEvent {
            id: Uuid::new_v4(),
            ticker: ticker.to_string(),
            kind,
            detected_at: time::now(),
            details: EventDetails {
                previous_price: prev.price,
                current_price: obs.price,
                percentage_change: c.percentage_display(),
                previous_timestamp: Some(prev.observed_at),
                current_timestamp: obs.observed_at,
            },
        })
    }

    /// Observations of the last `days` days, oldest first. Unknown tickers
    /// yield an empty history.
    #[instrument(skip(self), target = "analysis")]
    pub async fn get_price_history(
        &self,
        ticker: &str,
        days: u32,
    ) -> anyhow::Result<Vec<PriceObservation>> {
        if self.repo.get_symbol(ticker).await?.is_none() {
            warn!(ticker, "symbol not found; cannot retrieve history");
            return Ok(Vec::new());
        }

        self.repo
            .query_observations(ticker, window_start(days))
            .await
            .context("failed to query price history")
    }

    pub async fn significant_events(
        &self,
        filter: &EventFilter,
    ) -> anyhow::Result<Vec<SignificantEvent>> {
        self.repo
            .query_events(filter)
            .await
            .context("failed to query significant events")
    }

    #[instrument(skip(self), target = "analysis")]
    pub async fn get_significant_events_summary(&self, days: u32) -> anyhow::Result<EventSummary> {
        let events = self
            .significant_events(&EventFilter::since(window_start(days)))
            .await?;

        Ok(EventSummary::from_events(days, &events))
    }
}

fn window_start(days: u32) -> DateTime<Utc> {
    time::now() - TimeDelta::days(i64::from(days))
}
