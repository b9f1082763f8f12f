use std::time::{Duration, Instant};

use tracing::{Span, field};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

/// Used when `RUST_LOG` is unset. sqlx logs every statement at info.
const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// JSON lines in production, pretty output otherwise. Span close events
/// carry the batch and ticker timings.
pub fn init_tracing(json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let base = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_span_events(fmt::format::FmtSpan::CLOSE);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(base.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(base.pretty())
            .init();
    }
}

/// Parent span of one poll batch. `batch_size` is filled in once the ticker
/// list is resolved.
pub fn batch_span(batch_id: Uuid) -> Span {
    tracing::info_span!("poll_batch", %batch_id, batch_size = field::Empty)
}

pub fn record_batch_size(span: &Span, size: usize) {
    span.record("batch_size", size as u64);
}

/// Child of the batch span, one per ticker.
pub fn ticker_span(ticker: &str) -> Span {
    tracing::info_span!("ticker", ticker = %ticker)
}

/// Runs `fut` and warns when it took longer than `max`.
pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "pricewatch::latency",
            label,
            elapsed_ms = elapsed.as_millis() as u64,
            limit_ms = max.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Instrument;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn slow_operations_are_reported() {
        let out = warn_if_slow("cache_read", Duration::from_millis(1), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            7
        })
        .await;

        assert_eq!(out, 7);
        assert!(logs_contain("slow operation detected"));
        assert!(logs_contain("label=\"cache_read\""));
        assert!(logs_contain("limit_ms=1"));
    }

    #[tokio::test]
    #[traced_test]
    async fn fast_operations_are_silent() {
        let out = warn_if_slow("quick", Duration::from_secs(5), async { 1 }).await;

        assert_eq!(out, 1);
        assert!(!logs_contain("slow operation detected"));
    }

    #[tokio::test]
    #[traced_test]
    async fn ticker_events_carry_batch_context() {
        let batch_id = Uuid::new_v4();
        let span = batch_span(batch_id);
        record_batch_size(&span, 3);

        async {
            async { tracing::info!("fetched trade") }
                .instrument(ticker_span("GOOGL"))
                .await
        }
        .instrument(span)
        .await;

        assert!(logs_contain(&format!("batch_id={batch_id}")));
        assert!(logs_contain("batch_size=3"));
        assert!(logs_contain("ticker=GOOGL"));
    }
}
