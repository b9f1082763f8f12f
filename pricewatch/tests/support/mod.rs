#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use uuid::Uuid;

use pricewatch::analysis::{AnalysisEngine, ChangeDetector};
use pricewatch::db::schema;
use pricewatch::market::{DailyBar, MarketDataError, MarketDataProvider, Trade};
use pricewatch::prices::cache::PriceCache;
use pricewatch::prices::model::{
    EventFilter, EventId, ObservationId, PriceObservation, SignificantEvent, Symbol,
};
use pricewatch::prices::repository::{
    EventStore, HistoryStore, PriceRepository, SymbolDirectory,
};
use pricewatch::time;

pub fn ts(ms: i64) -> DateTime<Utc> {
    time::from_ms(ms).unwrap()
}

/// Isolated in-memory DB per test.
/// Unique name prevents test interference during parallel execution.
/// `cache=shared` allows multiple connections within the same pool to see the same in-memory DB.
pub async fn setup_db() -> AnyPool {
    sqlx::any::install_default_drivers();

    let db_name = Uuid::new_v4().to_string();
    let conn = format!("sqlite:file:{}?mode=memory&cache=shared", db_name);

    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&conn)
        .await
        .expect("connect sqlite memory db");

    schema::migrate(&pool).await.expect("migrate schema");

    pool
}

/// In-memory stand-in for the durable store.
#[derive(Default)]
pub struct MockRepository {
    pub symbols: Mutex<BTreeMap<String, Symbol>>,
    pub observations: Mutex<Vec<PriceObservation>>,
    pub events: Mutex<Vec<SignificantEvent>>,

    pub fail_commits: AtomicBool,
    pub history_lookups: AtomicUsize,
}

impl MockRepository {
    pub fn with_symbols(tickers: &[&str]) -> Arc<Self> {
        let repo = Self::default();
        {
            let mut map = repo.symbols.lock();
            for t in tickers {
                map.insert(t.to_string(), Symbol::new(*t, format!("{t} Corp")));
            }
        }
        Arc::new(repo)
    }

    /// Seeds a history row directly, bypassing the engine.
    pub fn seed_observation(&self, ticker: &str, price: Decimal, at: DateTime<Utc>) {
        self.observations.lock().push(PriceObservation {
            id: Uuid::new_v4(),
            ticker: ticker.to_string(),
            observed_at: at,
            price,
            volume: None,
        });
    }

    pub fn observations_for(&self, ticker: &str) -> Vec<PriceObservation> {
        self.observations
            .lock()
            .iter()
            .filter(|o| o.ticker == ticker)
            .cloned()
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

#[async_trait]
impl SymbolDirectory for MockRepository {
    async fn get_symbol(&self, ticker: &str) -> anyhow::Result<Option<Symbol>> {
        Ok(self.symbols.lock().get(ticker).cloned())
    }

    async fn list_symbols(&self) -> anyhow::Result<Vec<Symbol>> {
        Ok(self.symbols.lock().values().cloned().collect())
    }

    async fn insert_symbol(&self, symbol: &Symbol) -> anyhow::Result<bool> {
        let mut map = self.symbols.lock();
        if map.contains_key(&symbol.ticker) {
            return Ok(false);
        }
        map.insert(symbol.ticker.clone(), symbol.clone());
        Ok(true)
    }
}

#[async_trait]
impl HistoryStore for MockRepository {
    async fn latest_observation(&self, ticker: &str) -> anyhow::Result<Option<PriceObservation>> {
        self.history_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .observations
            .lock()
            .iter()
            .filter(|o| o.ticker == ticker)
            .max_by_key(|o| o.observed_at)
            .cloned())
    }

    async fn insert_observation(&self, obs: &PriceObservation) -> anyhow::Result<ObservationId> {
        self.observations.lock().push(obs.clone());
        Ok(obs.id)
    }

    async fn query_observations(
        &self,
        ticker: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PriceObservation>> {
        let mut out: Vec<_> = self
            .observations
            .lock()
            .iter()
            .filter(|o| o.ticker == ticker && o.observed_at >= since)
            .cloned()
            .collect();
        out.sort_by_key(|o| o.observed_at);
        Ok(out)
    }
}

#[async_trait]
impl EventStore for MockRepository {
    async fn insert_event(&self, event: &SignificantEvent) -> anyhow::Result<EventId> {
        self.events.lock().push(event.clone());
        Ok(event.id)
    }

    async fn query_events(&self, filter: &EventFilter) -> anyhow::Result<Vec<SignificantEvent>> {
        let mut out: Vec<_> = self
            .events
            .lock()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        Ok(out)
    }
}

#[async_trait]
impl PriceRepository for MockRepository {
    async fn commit_observation(
        &self,
        obs: &PriceObservation,
        event: Option<&SignificantEvent>,
    ) -> anyhow::Result<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(anyhow!("Database Offline"));
        }
        if let Some(ev) = event {
            self.events.lock().push(ev.clone());
        }
        self.observations.lock().push(obs.clone());
        Ok(())
    }
}

pub fn engine_over(repo: Arc<dyn PriceRepository>) -> Arc<AnalysisEngine> {
    Arc::new(AnalysisEngine::new(
        repo,
        Arc::new(PriceCache::new()),
        ChangeDetector::default(),
    ))
}

/// What the scripted provider answers for one ticker.
#[derive(Clone)]
pub enum Quote {
    Trade(Trade),
    NoData,
    Broken,
    Hang,
}

pub fn trade(price: f64, timestamp_ms: i64) -> Quote {
    Quote::Trade(Trade {
        price,
        timestamp_ms,
        volume: None,
    })
}

#[derive(Default)]
pub struct ScriptedProvider {
    quotes: Mutex<HashMap<String, Quote>>,
    bars: Mutex<HashMap<String, Vec<DailyBar>>>,
    pub calls: AtomicUsize,
    pub ranges: Mutex<Vec<(String, NaiveDate, NaiveDate)>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, ticker: &str, quote: Quote) {
        self.quotes.lock().insert(ticker.to_string(), quote);
    }

    pub fn set_bars(&self, ticker: &str, bars: Vec<DailyBar>) {
        self.bars.lock().insert(ticker.to_string(), bars);
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedProvider {
    async fn latest_trade(&self, ticker: &str) -> Result<Trade, MarketDataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let quote = self.quotes.lock().get(ticker).cloned();
        match quote {
            Some(Quote::Trade(t)) => Ok(t),
            Some(Quote::NoData) | None => Err(MarketDataError::NoData(ticker.to_string())),
            Some(Quote::Broken) => Err(MarketDataError::InvalidResponse("garbled body".into())),
            Some(Quote::Hang) => std::future::pending().await,
        }
    }

    async fn daily_aggregates(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>, MarketDataError> {
        self.ranges.lock().push((ticker.to_string(), from, to));
        match self.bars.lock().get(ticker) {
            Some(bars) => Ok(bars.clone()),
            None => Err(MarketDataError::NoData(ticker.to_string())),
        }
    }
}
