//! Time and timestamp helpers.

use chrono::{DateTime, TimeZone, Utc};

/// UTC timestamp used for event times, schedule due times, etc.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// The earliest representable log position, used as "read everything".
#[must_use]
pub fn epoch() -> Timestamp {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Milliseconds since the Unix epoch; the resolution events are ordered at.
#[must_use]
pub fn to_millis(ts: Timestamp) -> i64 {
    ts.timestamp_millis()
}

/// Inverse of [`to_millis`]. Out-of-range values clamp to the epoch.
#[must_use]
pub fn from_millis(ms: i64) -> Timestamp {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(epoch)
}
