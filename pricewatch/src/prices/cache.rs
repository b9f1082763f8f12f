use std::collections::HashMap;
use std::hash::{BuildHasher, RandomState};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument};

use crate::logger::warn_if_slow;
use crate::prices::model::PriceObservation;
use crate::prices::repository::{HistoryStore, SymbolDirectory};

/// Last known price of one ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceEntry {
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

impl From<&PriceObservation> for PriceEntry {
    fn from(o: &PriceObservation) -> Self {
        Self {
            price: o.price,
            observed_at: o.observed_at,
        }
    }
}

const DEFAULT_SHARDS: usize = 16;

/// In-memory "last known price per ticker", shared by every processing path.
///
/// Guarantees:
/// - O(1) lookups that never touch the store.
/// - Tickers are spread over independent shards, so unrelated tickers
///   rarely share a lock.
/// - `put` is last-write-wins; ordering is the caller's responsibility.
pub struct PriceCache {
    shards: Box<[RwLock<HashMap<String, PriceEntry>>]>,
    hasher: RandomState,
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceCache {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(n: usize) -> Self {
        let shards = (0..n.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, ticker: &str) -> &RwLock<HashMap<String, PriceEntry>> {
        let idx = self.hasher.hash_one(ticker) as usize % self.shards.len();
        &self.shards[idx]
    }

    pub fn get(&self, ticker: &str) -> Option<PriceEntry> {
        self.shard(ticker).read().get(ticker).copied()
    }

    pub fn put(&self, ticker: &str, price: Decimal, observed_at: DateTime<Utc>) {
        self.shard(ticker)
            .write()
            .insert(ticker.to_string(), PriceEntry { price, observed_at });
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every entry, for diagnostics and tests.
    pub fn snapshot(&self) -> HashMap<String, PriceEntry> {
        let mut out = HashMap::new();
        for shard in self.shards.iter() {
            out.extend(shard.read().iter().map(|(k, v)| (k.clone(), *v)));
        }
        out
    }

    /// Rebuilds the cache from durable history: the newest observation of
    /// every known symbol. Symbols without history are left out.
    ///
    /// The full snapshot is loaded before any shard is touched, so a failed
    /// warm start leaves the previous contents in place. Returns the number
    /// of tickers loaded.
    #[instrument(skip(self, store), target = "cache")]
    pub async fn warm_start<S>(&self, store: &S) -> anyhow::Result<usize>
    where
        S: SymbolDirectory + HistoryStore + ?Sized,
    {
        info!("initializing price cache from history");

        let symbols = warn_if_slow("db_list_symbols", Duration::from_millis(200), async {
            store.list_symbols().await
        })
        .await
        .context("failed to list symbols for warm start")?;

        let mut fresh: Vec<HashMap<String, PriceEntry>> = vec![HashMap::new(); self.shards.len()];
        for symbol in &symbols {
            let latest = store
                .latest_observation(&symbol.ticker)
                .await
                .with_context(|| format!("failed to load latest price for {}", symbol.ticker))?;

            if let Some(obs) = latest {
                debug!(ticker = %symbol.ticker, price = %obs.price, "warm entry loaded");
                let idx = self.hasher.hash_one(symbol.ticker.as_str()) as usize % self.shards.len();
                fresh[idx].insert(symbol.ticker.clone(), PriceEntry::from(&obs));
            }
        }

        let count = fresh.iter().map(HashMap::len).sum();
        for (shard, map) in self.shards.iter().zip(fresh) {
            *shard.write() = map;
        }

        info!(
            symbols = symbols.len(),
            loaded = count,
            "price cache initialization complete"
        );
        Ok(count)
    }
}
