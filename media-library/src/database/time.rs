//! Timestamp helpers for the database layer.
//!
//! Timestamps are stored as `INTEGER` Unix epoch milliseconds (UTC).

use chrono::{DateTime, TimeZone, Utc};

/// Current time as Unix epoch milliseconds (UTC).
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert Unix epoch milliseconds to `DateTime<Utc>`, falling back to the
/// epoch for values chrono cannot represent.
#[inline]
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .earliest()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
