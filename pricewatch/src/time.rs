use chrono::{DateTime, TimeZone, Utc};

/// Current wall-clock time, truncated to millisecond precision.
pub fn now() -> DateTime<Utc> {
    truncate_to_ms(Utc::now())
}

/// Drops sub-millisecond precision. Stored timestamps are epoch millis,
/// so anything cached must be truncated the same way.
pub fn truncate_to_ms(ts: DateTime<Utc>) -> DateTime<Utc> {
    from_ms(ts.timestamp_millis()).unwrap_or(ts)
}

pub fn from_ms(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}
