//! Millisecond-precision wall clock.
//!
//! Timestamps are persisted as epoch milliseconds, so values produced in
//! memory are truncated to the same precision. That keeps a timestamp equal
//! to itself after a trip through the store.

use chrono::{DateTime, Utc};

/// Current time truncated to whole milliseconds.
pub fn now() -> DateTime<Utc> {
    truncate(Utc::now())
}

/// Drop sub-millisecond precision.
pub fn truncate(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(t.timestamp_millis()).unwrap_or(t)
}
