use std::collections::BTreeMap;

use serde::Serialize;

use crate::prices::model::{EventKind, SignificantEvent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventCounts {
    pub total: u64,
    pub increases: u64,
    pub decreases: u64,
}

impl EventCounts {
    fn record(&mut self, kind: EventKind) {
        self.total += 1;
        match kind {
            EventKind::Increase => self.increases += 1,
            EventKind::Decrease => self.decreases += 1,
        }
    }
}

/// Event totals over a trailing window of days. Only tickers with at least
/// one event appear in `by_symbol`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    pub period_days: u32,
    pub total_events: u64,
    pub increases: u64,
    pub decreases: u64,
    pub by_symbol: BTreeMap<String, EventCounts>,
}

impl EventSummary {
    pub fn from_events<'a, I>(period_days: u32, events: I) -> Self
    where
        I: IntoIterator<Item = &'a SignificantEvent>,
    {
        let mut totals = EventCounts::default();
        let mut by_symbol: BTreeMap<String, EventCounts> = BTreeMap::new();

        for ev in events {
            totals.record(ev.kind);
            by_symbol.entry(ev.ticker.clone()).or_default().record(ev.kind);
        }

        Self {
            period_days,
            total_events: totals.total,
            increases: totals.increases,
            decreases: totals.decreases,
            by_symbol,
        }
    }
}
