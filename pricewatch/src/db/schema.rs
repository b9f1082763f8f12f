use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Symbols
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS symbols (
  ticker TEXT PRIMARY KEY,
  name TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Price history. Prices are decimal strings so they round-trip exactly.
    // `seq` is a per-ticker insertion counter that orders rows sharing a timestamp.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS price_observations (
  observation_id TEXT PRIMARY KEY,
  ticker TEXT NOT NULL REFERENCES symbols(ticker),
  observed_at_ms BIGINT NOT NULL,
  seq BIGINT NOT NULL,
  price TEXT NOT NULL,
  volume BIGINT
);
"#,
    )
    .execute(pool)
    .await?;

    // Significant events
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS significant_events (
  event_id TEXT PRIMARY KEY,
  ticker TEXT NOT NULL REFERENCES symbols(ticker),
  kind TEXT NOT NULL,
  detected_at_ms BIGINT NOT NULL,
  details TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_observations_ticker_time ON price_observations(ticker, observed_at_ms DESC, seq DESC);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_events_ticker_time ON significant_events(ticker, detected_at_ms DESC);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_events_time ON significant_events(detected_at_ms);"#)
        .execute(pool)
        .await?;

    Ok(())
}
