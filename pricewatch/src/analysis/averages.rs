//! Daily bars compared against their trailing average.
//!
//! Every value is fixed point. Upstream floats go through
//! `decimal_from_f64` once, on the way in.

use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::market::errors::MarketDataError;
use crate::market::provider::{DailyBar, MarketDataProvider};
use crate::prices::model::decimal_from_f64;
use crate::time;

pub const DEFAULT_WINDOW_DAYS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VsAverage {
    pub diff: Decimal,
    /// Zero when the average itself is zero.
    pub diff_pct: Decimal,
    pub is_above_avg: bool,
}

impl VsAverage {
    fn of(value: Decimal, avg: Decimal) -> Self {
        let diff = value - avg;
        let diff_pct = (diff * Decimal::ONE_HUNDRED)
            .checked_div(avg)
            .unwrap_or(Decimal::ZERO);
        Self {
            diff,
            diff_pct,
            is_above_avg: value > avg,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayVsAverage {
    /// UTC calendar day of the bar start.
    pub date: NaiveDate,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_vs_avg: VsAverage,
    pub volume_vs_avg: VsAverage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AverageReport {
    pub ticker: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub days: u32,
    pub avg_close: Decimal,
    pub avg_volume: Decimal,
    pub daily: Vec<DayVsAverage>,
}

struct Bar {
    date: NaiveDate,
    close: Decimal,
    volume: Decimal,
}

impl Bar {
    fn convert(ticker: &str, raw: &DailyBar) -> Result<Self, MarketDataError> {
        let invalid = |what: String| MarketDataError::InvalidResponse(format!("{ticker}: {what}"));

        let date = time::from_ms(raw.timestamp_ms)
            .ok_or_else(|| invalid(format!("bar timestamp {} out of range", raw.timestamp_ms)))?
            .date_naive();
        let close = decimal_from_f64(raw.close).map_err(|e| invalid(e.to_string()))?;
        // a bar without volume counts as zero volume
        let volume = match raw.volume {
            Some(v) => decimal_from_f64(v).map_err(|e| invalid(e.to_string()))?,
            None => Decimal::ZERO,
        };

        Ok(Self {
            date,
            close,
            volume,
        })
    }
}

fn mean(values: impl Iterator<Item = Decimal>, count: usize) -> Decimal {
    values
        .sum::<Decimal>()
        .checked_div(Decimal::from(count))
        .unwrap_or(Decimal::ZERO)
}

impl AverageReport {
    /// Builds the report from bars already fetched for `[from, to]`.
    /// An empty series is `NoData`.
    pub fn from_bars(
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
        days: u32,
        bars: &[DailyBar],
    ) -> Result<Self, MarketDataError> {
        if bars.is_empty() {
            return Err(MarketDataError::NoData(ticker.to_string()));
        }

        let bars = bars
            .iter()
            .map(|b| Bar::convert(ticker, b))
            .collect::<Result<Vec<_>, _>>()?;

        let avg_close = mean(bars.iter().map(|b| b.close), bars.len());
        let avg_volume = mean(bars.iter().map(|b| b.volume), bars.len());

        let daily = bars
            .into_iter()
            .map(|b| DayVsAverage {
                date: b.date,
                close: b.close,
                volume: b.volume,
                close_vs_avg: VsAverage::of(b.close, avg_close),
                volume_vs_avg: VsAverage::of(b.volume, avg_volume),
            })
            .collect();

        Ok(Self {
            ticker: ticker.to_string(),
            from,
            to,
            days,
            avg_close,
            avg_volume,
            daily,
        })
    }
}

/// Fetches the daily bars of the `days` calendar days up to and including
/// `today` and compares each against the window average.
pub async fn against_average<P>(
    provider: &P,
    ticker: &str,
    days: u32,
    today: NaiveDate,
) -> Result<AverageReport, MarketDataError>
where
    P: MarketDataProvider + ?Sized,
{
    let from = today
        .checked_sub_days(Days::new(u64::from(days)))
        .ok_or_else(|| MarketDataError::InvalidRequest(format!("window of {days} days is out of range")))?;

    let bars = provider.daily_aggregates(ticker, from, today).await?;
    if bars.is_empty() {
        warn!(ticker, %from, to = %today, "no aggregate data in range");
    }

    let report = AverageReport::from_bars(ticker, from, today, days, &bars)?;
    info!(
        ticker,
        days,
        bars = report.daily.len(),
        avg_close = %report.avg_close,
        "daily aggregates compared against average"
    );
    Ok(report)
}
