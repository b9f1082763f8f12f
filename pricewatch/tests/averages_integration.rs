mod support;

use chrono::NaiveDate;
use rust_decimal_macros::dec;

use pricewatch::analysis::against_average;
use pricewatch::analysis::averages::DEFAULT_WINDOW_DAYS;
use pricewatch::market::{DailyBar, MarketDataError};

use support::ScriptedProvider;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
}

fn bar(close: f64, volume: f64, d: u32) -> DailyBar {
    DailyBar {
        close,
        volume: Some(volume),
        timestamp_ms: day(d).and_hms_opt(4, 0, 0).unwrap().and_utc().timestamp_millis(),
    }
}

#[tokio::test]
async fn report_covers_the_trailing_window() {
    let provider = ScriptedProvider::new();
    provider.set_bars(
        "GOOGL",
        vec![
            bar(170.0, 2_000.0, 27),
            bar(176.0, 1_000.0, 28),
            bar(173.0, 3_000.0, 29),
        ],
    );

    let report = against_average(provider.as_ref(), "GOOGL", DEFAULT_WINDOW_DAYS, day(31))
        .await
        .unwrap();

    assert_eq!(
        provider.ranges.lock().clone(),
        vec![("GOOGL".to_string(), day(1), day(31))]
    );
    assert_eq!((report.from, report.to, report.days), (day(1), day(31), 30));
    assert_eq!(report.avg_close, dec!(173));
    assert_eq!(report.avg_volume, dec!(2000));

    let dates: Vec<_> = report.daily.iter().map(|d| d.date).collect();
    assert_eq!(dates, vec![day(27), day(28), day(29)]);

    let peak = &report.daily[1];
    assert_eq!(peak.close_vs_avg.diff, dec!(3));
    assert!(peak.close_vs_avg.is_above_avg);
    assert_eq!(peak.volume_vs_avg.diff_pct, dec!(-50));
    assert!(!peak.volume_vs_avg.is_above_avg);
}

#[tokio::test]
async fn empty_range_is_no_data() {
    let provider = ScriptedProvider::new();
    provider.set_bars("HOLIDAY", Vec::new());

    let err = against_average(provider.as_ref(), "HOLIDAY", 1, day(26))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketDataError::NoData(t) if t == "HOLIDAY"));
    assert_eq!(provider.ranges.lock()[0].1, day(25));
}

#[tokio::test]
async fn upstream_errors_pass_through() {
    let provider = ScriptedProvider::new();

    let err = against_average(provider.as_ref(), "NOPE", 7, day(31))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketDataError::NoData(_)));
}

#[tokio::test]
async fn window_before_the_calendar_starts_is_rejected_without_fetching() {
    let provider = ScriptedProvider::new();

    let err = against_average(provider.as_ref(), "GOOGL", u32::MAX, day(31))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketDataError::InvalidRequest(_)));
    assert!(provider.ranges.lock().is_empty());
}
