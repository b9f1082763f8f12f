use std::str::FromStr;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::any::AnyRow;
use sqlx::{Any, AnyPool, Executor, Row};
use uuid::Uuid;

use crate::prices::model::{
    EventDetails, EventFilter, EventId, EventKind, ObservationId, PriceObservation,
    SignificantEvent, Symbol,
};
use crate::prices::repository::{EventStore, HistoryStore, PriceRepository, SymbolDirectory};
use crate::time;

/* =========================
Statements

Numbered `$N` placeholders are understood by both the SQLite and the
Postgres drivers behind `Any`; `?` only works on SQLite.
========================= */

const SELECT_SYMBOL: &str = "SELECT ticker, name FROM symbols WHERE ticker = $1;";

const LIST_SYMBOLS: &str = "SELECT ticker, name FROM symbols ORDER BY ticker;";

const INSERT_SYMBOL: &str = r#"
INSERT INTO symbols (ticker, name)
VALUES ($1, $2)
ON CONFLICT (ticker) DO NOTHING;
"#;

// Ties on observed_at_ms resolve to the most recently inserted row, which is
// also the row the engine last wrote to the cache.
const LATEST_OBSERVATION: &str = r#"
SELECT observation_id, ticker, observed_at_ms, price, volume
FROM price_observations
WHERE ticker = $1
ORDER BY observed_at_ms DESC, seq DESC
LIMIT 1;
"#;

const QUERY_OBSERVATIONS: &str = r#"
SELECT observation_id, ticker, observed_at_ms, price, volume
FROM price_observations
WHERE ticker = $1 AND observed_at_ms >= $2
ORDER BY observed_at_ms ASC, seq ASC;
"#;

const INSERT_OBSERVATION: &str = r#"
INSERT INTO price_observations (observation_id, ticker, observed_at_ms, seq, price, volume)
VALUES (
  $1, $2, $3,
  (SELECT COALESCE(MAX(seq), 0) + 1 FROM price_observations WHERE ticker = $2),
  $4, $5
);
"#;

const INSERT_EVENT: &str = r#"
INSERT INTO significant_events (event_id, ticker, kind, detected_at_ms, details)
VALUES ($1, $2, $3, $4, $5);
"#;

/// Event query for `filter`, numbering one placeholder per present clause.
/// Binds go in the same order: since, until, ticker, kind.
fn events_sql(filter: &EventFilter) -> String {
    let mut sql = String::from(
        r#"
SELECT event_id, ticker, kind, detected_at_ms, details
FROM significant_events
WHERE detected_at_ms >= $1"#,
    );
    let mut n = 1;
    let mut clause = |sql: &mut String, col: &str, op: &str| {
        n += 1;
        sql.push_str(&format!(" AND {col} {op} ${n}"));
    };
    if filter.until.is_some() {
        clause(&mut sql, "detected_at_ms", "<");
    }
    if filter.ticker.is_some() {
        clause(&mut sql, "ticker", "=");
    }
    if filter.kind.is_some() {
        clause(&mut sql, "kind", "=");
    }
    sql.push_str(" ORDER BY detected_at_ms DESC;");
    sql
}

/// SQLx-backed implementation of the price stores.
/// Responsible only for persistence and row mapping.
#[derive(Clone)]
pub struct SqlxPriceRepository {
    pool: AnyPool,
}

impl SqlxPriceRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SymbolDirectory for SqlxPriceRepository {
    async fn get_symbol(&self, ticker: &str) -> anyhow::Result<Option<Symbol>> {
        let row = sqlx::query(SELECT_SYMBOL)
            .bind(ticker.to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Symbol::new(r.get::<String, _>("ticker"), r.get::<String, _>("name"))))
    }

    async fn list_symbols(&self) -> anyhow::Result<Vec<Symbol>> {
        let rows = sqlx::query(LIST_SYMBOLS)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|r| Symbol::new(r.get::<String, _>("ticker"), r.get::<String, _>("name")))
            .collect())
    }

    async fn insert_symbol(&self, symbol: &Symbol) -> anyhow::Result<bool> {
        let res = sqlx::query(INSERT_SYMBOL)
            .bind(symbol.ticker.clone())
            .bind(symbol.name.clone())
            .execute(&self.pool)
            .await?;

        Ok(res.rows_affected() == 1)
    }
}

#[async_trait]
impl HistoryStore for SqlxPriceRepository {
    async fn latest_observation(&self, ticker: &str) -> anyhow::Result<Option<PriceObservation>> {
        let row = sqlx::query(LATEST_OBSERVATION)
            .bind(ticker.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_observation(&r)?)),
            None => Ok(None),
        }
    }

    async fn insert_observation(&self, obs: &PriceObservation) -> anyhow::Result<ObservationId> {
        insert_observation_on(&self.pool, obs).await?;
        Ok(obs.id)
    }

    async fn query_observations(
        &self,
        ticker: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PriceObservation>> {
        let rows = sqlx::query(QUERY_OBSERVATIONS)
            .bind(ticker.to_string())
            .bind(since.timestamp_millis())
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_observation(&r) {
                Ok(o) => out.push(o),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the query
                    tracing::warn!(error = %e, ticker, "skipping malformed observation row");
                }
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl EventStore for SqlxPriceRepository {
    async fn insert_event(&self, event: &SignificantEvent) -> anyhow::Result<EventId> {
        insert_event_on(&self.pool, event).await?;
        Ok(event.id)
    }

    async fn query_events(&self, filter: &EventFilter) -> anyhow::Result<Vec<SignificantEvent>> {
        let sql = events_sql(filter);

        let mut q = sqlx::query(&sql).bind(filter.since.timestamp_millis());
        if let Some(until) = filter.until {
            q = q.bind(until.timestamp_millis());
        }
        if let Some(ticker) = &filter.ticker {
            q = q.bind(ticker.clone());
        }
        if let Some(kind) = filter.kind {
            q = q.bind(kind.as_str().to_string());
        }

        let rows = q.fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_event(&r) {
                Ok(ev) => out.push(ev),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed event row");
                }
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl PriceRepository for SqlxPriceRepository {
    async fn commit_observation(
        &self,
        obs: &PriceObservation,
        event: Option<&SignificantEvent>,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await.context("begin transaction")?;

        if let Some(ev) = event {
            insert_event_on(&mut *tx, ev).await?;
        }
        insert_observation_on(&mut *tx, obs).await?;

        tx.commit().await.context("commit observation")?;
        Ok(())
    }
}

/* =========================
Statements shared by pool and transaction
========================= */

async fn insert_observation_on<'e, E>(exec: E, obs: &PriceObservation) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Any>,
{
    sqlx::query(INSERT_OBSERVATION)
        .bind(obs.id.to_string())
        .bind(obs.ticker.clone())
        .bind(obs.observed_at.timestamp_millis())
        .bind(obs.price.to_string())
        .bind(obs.volume)
        .execute(exec)
        .await
        .with_context(|| format!("insert observation for {}", obs.ticker))?;

    Ok(())
}

async fn insert_event_on<'e, E>(exec: E, ev: &SignificantEvent) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Any>,
{
    let details = serde_json::to_string(&ev.details).context("encode event details")?;

    sqlx::query(INSERT_EVENT)
        .bind(ev.id.to_string())
        .bind(ev.ticker.clone())
        .bind(ev.kind.as_str().to_string())
        .bind(ev.detected_at.timestamp_millis())
        .bind(details)
        .execute(exec)
        .await
        .with_context(|| format!("insert event for {}", ev.ticker))?;

    Ok(())
}

/* =========================
Row mapping + conversions
========================= */

fn row_to_observation(r: &AnyRow) -> anyhow::Result<PriceObservation> {
    let id_str: String = r.get("observation_id");
    let price_str: String = r.get("price");

    Ok(PriceObservation {
        id: Uuid::parse_str(&id_str).context("invalid observation_id")?,
        ticker: r.get::<String, _>("ticker"),
        observed_at: ms_to_datetime(r.get("observed_at_ms"))?,
        price: Decimal::from_str(&price_str)
            .with_context(|| format!("invalid price {price_str:?}"))?,
        volume: r.get::<Option<i64>, _>("volume"),
    })
}

fn row_to_event(r: &AnyRow) -> anyhow::Result<SignificantEvent> {
    let id_str: String = r.get("event_id");
    let kind_str: String = r.get("kind");
    let details_str: String = r.get("details");

    let details: EventDetails = serde_json::from_str(&details_str)
        .map_err(|e| anyhow!("Invalid event details JSON '{}': {}", details_str, e))?;

    Ok(SignificantEvent {
        id: Uuid::parse_str(&id_str).context("invalid event_id")?,
        ticker: r.get::<String, _>("ticker"),
        kind: EventKind::from_str(&kind_str)?,
        detected_at: ms_to_datetime(r.get("detected_at_ms"))?,
        details,
    })
}

fn ms_to_datetime(ms: i64) -> anyhow::Result<DateTime<Utc>> {
    time::from_ms(ms).ok_or_else(|| anyhow!("timestamp out of range: {ms}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prices::model::EventKind;
    use crate::time;

    const STATEMENTS: [&str; 7] = [
        SELECT_SYMBOL,
        LIST_SYMBOLS,
        INSERT_SYMBOL,
        LATEST_OBSERVATION,
        QUERY_OBSERVATIONS,
        INSERT_OBSERVATION,
        INSERT_EVENT,
    ];

    #[test]
    fn statements_use_numbered_placeholders() {
        for sql in STATEMENTS {
            assert!(!sql.contains('?'), "positional placeholder in: {sql}");
        }
        assert!(INSERT_OBSERVATION.contains("$5"));
        assert!(INSERT_EVENT.contains("$5"));
    }

    #[test]
    fn event_query_numbers_only_present_clauses() {
        let since = time::from_ms(0).unwrap();

        let bare = events_sql(&EventFilter::since(since));
        assert!(bare.contains("detected_at_ms >= $1"));
        assert!(!bare.contains("$2"));

        let by_kind = events_sql(&EventFilter::since(since).kind(EventKind::Increase));
        assert!(by_kind.contains("kind = $2"));

        let full = events_sql(
            &EventFilter::since(since)
                .until(since)
                .ticker("GOOGL")
                .kind(EventKind::Decrease),
        );
        assert!(full.contains("detected_at_ms < $2"));
        assert!(full.contains("ticker = $3"));
        assert!(full.contains("kind = $4"));
        assert!(!full.contains('?'));
    }
}
