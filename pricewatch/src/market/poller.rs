//! Market Poller
//!
//! Fetches the latest trade for each ticker, converts it to a fixed-point
//! observation and hands it to the `AnalysisEngine`. One ticker's failure
//! (no data, timeout, bad payload, store error) is recorded in the batch
//! report and never stops the others.
//!
//! Data flow:
//! Provider → Poller → AnalysisEngine → (store, cache)

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{Instrument, Span, debug, error, info, warn};
use uuid::Uuid;

use crate::analysis::AnalysisEngine;
use crate::error::ProcessError;
use crate::logger::{batch_span, record_batch_size, ticker_span};
use crate::market::errors::MarketDataError;
use crate::market::provider::MarketDataProvider;
use crate::metrics::counters::Counters;
use crate::prices::model::{EventKind, Observation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickerOutcome {
    Event(EventKind),
    NoEvent,
    NoData,
    TimedOut,
    Failed(String),
}

impl fmt::Display for TickerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickerOutcome::Event(kind) => write!(f, "event {kind}"),
            TickerOutcome::NoEvent => f.write_str("no significant event"),
            TickerOutcome::NoData => f.write_str("no data"),
            TickerOutcome::TimedOut => f.write_str("timed out"),
            TickerOutcome::Failed(reason) => write!(f, "error: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerReport {
    pub ticker: String,
    pub outcome: TickerOutcome,
}

/// Per-ticker outcomes of one batch, in the order the tickers were given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub results: Vec<TickerReport>,
}

impl BatchReport {
    pub fn outcome(&self, ticker: &str) -> Option<&TickerOutcome> {
        self.results
            .iter()
            .find(|r| r.ticker == ticker)
            .map(|r| &r.outcome)
    }

    pub fn events(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, TickerOutcome::Event(_)))
            .count()
    }

    pub fn failures(&self) -> usize {
        self.results
            .iter()
            .filter(|r| {
                matches!(
                    r.outcome,
                    TickerOutcome::NoData | TickerOutcome::TimedOut | TickerOutcome::Failed(_)
                )
            })
            .count()
    }

    pub fn summary_line(&self) -> String {
        let parts: Vec<String> = self
            .results
            .iter()
            .map(|r| format!("{}: {}", r.ticker, r.outcome))
            .collect();
        format!(
            "Processed {} symbols. Results: {}",
            self.results.len(),
            parts.join("; ")
        )
    }
}

pub struct Poller<P: MarketDataProvider> {
    engine: Arc<AnalysisEngine>,
    provider: Arc<P>,
    counters: Counters,

    /// Cap on a single upstream fetch.
    fetch_timeout: Duration,

    /// Tickers of one batch in flight at once.
    max_concurrent: usize,
}

impl<P: MarketDataProvider> Poller<P> {
    pub fn new(
        engine: Arc<AnalysisEngine>,
        provider: Arc<P>,
        counters: Counters,
        fetch_timeout: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            engine,
            provider,
            counters,
            fetch_timeout,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Runs one batch. `None` means every known symbol.
    pub async fn run_batch(&self, tickers: Option<Vec<String>>) -> BatchReport {
        self.run_batch_with_id(Uuid::new_v4(), tickers).await
    }

    /// Starts a batch in the background and returns its id straight away.
    /// Outcomes land in the event and history stores, not in the return value.
    pub fn trigger(self: &Arc<Self>, tickers: Option<Vec<String>>) -> Uuid {
        let batch_id = Uuid::new_v4();
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let report = this.run_batch_with_id(batch_id, tickers).await;
            debug!(%batch_id, events = report.events(), "triggered batch finished");
        });

        info!(%batch_id, "batch triggered");
        batch_id
    }

    /// Polls on a fixed cadence until the task is dropped. A slow batch
    /// delays the next tick rather than queueing extra ones.
    pub async fn run(self: Arc<Self>, every: Duration) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(every_ms = every.as_millis() as u64, "market poller started");

        loop {
            ticker.tick().await;
            self.run_batch(None).await;
        }
    }

    async fn run_batch_with_id(&self, batch_id: Uuid, tickers: Option<Vec<String>>) -> BatchReport {
        let span = batch_span(batch_id);

        async move {
            self.counters.batches.fetch_add(1, Ordering::Relaxed);

            let tickers = match tickers {
                Some(t) => t,
                None => match self.engine.repository().list_symbols().await {
                    Ok(symbols) => symbols.into_iter().map(|s| s.ticker).collect(),
                    Err(e) => {
                        error!(error = ?e, "failed to list symbols; batch is empty");
                        Vec::new()
                    }
                },
            };

            if tickers.is_empty() {
                warn!("no ticker symbols provided or found for fetching data");
                return BatchReport {
                    batch_id,
                    results: Vec::new(),
                };
            }

            record_batch_size(&Span::current(), tickers.len());
            info!("fetching data for symbols");

            let results: Vec<TickerReport> = futures::stream::iter(tickers)
                .map(|ticker| async move {
                    let outcome = self
                        .process_ticker(&ticker)
                        .instrument(ticker_span(&ticker))
                        .await;
                    TickerReport { ticker, outcome }
                })
                .buffered(self.max_concurrent)
                .collect()
                .await;

            let report = BatchReport { batch_id, results };
            info!(
                events = report.events(),
                failures = report.failures(),
                "{}",
                report.summary_line()
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn process_ticker(&self, ticker: &str) -> TickerOutcome {
        self.counters.tickers.fetch_add(1, Ordering::Relaxed);

        let trade = match timeout(self.fetch_timeout, self.provider.latest_trade(ticker)).await {
            Err(_) => {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    timeout_ms = self.fetch_timeout.as_millis() as u64,
                    "market data fetch timed out"
                );
                return TickerOutcome::TimedOut;
            }
            Ok(Err(MarketDataError::NoData(_))) => {
                self.counters.no_data.fetch_add(1, Ordering::Relaxed);
                warn!("no trade data received");
                return TickerOutcome::NoData;
            }
            Ok(Err(e)) => {
                let err = ProcessError::UpstreamUnavailable {
                    ticker: ticker.to_string(),
                    reason: e.to_string(),
                };
                return self.failed(&err);
            }
            Ok(Ok(trade)) => trade,
        };

        debug!(price = trade.price, ts_ms = trade.timestamp_ms, "fetched trade");

        let obs = match Observation::from_raw(trade.price, trade.timestamp_ms, trade.volume) {
            Ok(obs) => obs,
            Err(reason) => {
                let err = ProcessError::InvalidInput {
                    ticker: ticker.to_string(),
                    reason,
                };
                return self.failed(&err);
            }
        };

        match self.engine.process_new_price_data(ticker, obs).await {
            Ok(Some(ev)) => {
                self.counters.events.fetch_add(1, Ordering::Relaxed);
                TickerOutcome::Event(ev.kind)
            }
            Ok(None) => TickerOutcome::NoEvent,
            Err(e) => self.failed(&e),
        }
    }

    fn failed(&self, err: &ProcessError) -> TickerOutcome {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        let reason = error_chain(err);
        error!(error = %reason, "error processing data");
        TickerOutcome::Failed(reason)
    }
}

/// `outer: inner: root` rendering of an error and its sources.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut cur = err.source();
    while let Some(e) = cur {
        out.push_str(": ");
        out.push_str(&e.to_string());
        cur = e.source();
    }
    out
}
