//! Trigger: when a schedule becomes due.

use chrono::{Duration, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::time::Timestamp;

/// When a schedule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fires every `every_secs` seconds.
    Interval { every_secs: u64 },
    /// Fires once a day at `at` (`"HH:MM"`, UTC).
    Daily { at: String },
    /// Fires a single time.
    Once { at: Timestamp },
}

impl Trigger {
    /// Check the trigger is well-formed.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ZeroInterval`] or
    /// [`ValidationError::InvalidTimeOfDay`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Interval { every_secs: 0 } => Err(ValidationError::ZeroInterval),
            Self::Daily { at } => parse_time_of_day(at).map(|_| ()),
            Self::Interval { .. } | Self::Once { .. } => Ok(()),
        }
    }

    /// The first firing time strictly after `after`, or `None` when the
    /// trigger never fires again.
    #[must_use]
    pub fn next_after(&self, after: Timestamp) -> Option<Timestamp> {
        match self {
            Self::Interval { every_secs } => {
                let secs = i64::try_from(*every_secs).ok()?;
                after.checked_add_signed(Duration::try_seconds(secs)?)
            }
            Self::Daily { at } => {
                let time = parse_time_of_day(at).ok()?;
                let today = after.date_naive().and_time(time).and_utc();
                if today > after {
                    Some(today)
                } else {
                    today.checked_add_signed(Duration::days(1))
                }
            }
            Self::Once { at } => (*at > after).then_some(*at),
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval { every_secs } => write!(f, "every({every_secs}s)"),
            Self::Daily { at } => write!(f, "daily({at})"),
            Self::Once { at } => write!(f, "once({})", at.to_rfc3339()),
        }
    }
}

fn parse_time_of_day(at: &str) -> Result<NaiveTime, ValidationError> {
    NaiveTime::parse_from_str(at, "%H:%M")
        .map_err(|_| ValidationError::InvalidTimeOfDay(at.to_string()))
}
