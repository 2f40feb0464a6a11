//! Server clock helpers.

use chrono::{DateTime, SecondsFormat, Utc};

/// Current server time.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// ISO-8601 with millisecond precision and a `Z` suffix
/// (`2026-01-01T00:00:00.000Z`).
pub fn to_iso8601(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
