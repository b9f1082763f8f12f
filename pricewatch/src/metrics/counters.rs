use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub batches: Arc<AtomicU64>,
    pub tickers: Arc<AtomicU64>,
    pub events: Arc<AtomicU64>,

    // per-ticker failure reasons
    pub no_data: Arc<AtomicU64>,
    pub timeouts: Arc<AtomicU64>,
    pub failures: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub batches: u64,
    pub tickers: u64,
    pub events: u64,
    pub no_data: u64,
    pub timeouts: u64,
    pub failures: u64,
}

impl Counters {
    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            batches: load(&self.batches),
            tickers: load(&self.tickers),
            events: load(&self.events),
            no_data: load(&self.no_data),
            timeouts: load(&self.timeouts),
            failures: load(&self.failures),
        }
    }
}
