//! Event: an immutable record of something that happened.
//!
//! Events are produced when a device reports a state change, when a
//! resident arrives or leaves and when a schedule fires. They are appended
//! to the log and never mutated or removed afterwards. The log's total order
//! is `(timestamp, sequence)`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::address::ParameterAddress;
use crate::device::ParameterValue;
use crate::id::{EventId, ScheduleId};
use crate::time::{Timestamp, to_millis};

/// What kind of event was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DeviceStateChange,
    ResidentArrive,
    ResidentLeave,
    ScheduleFired,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeviceStateChange => "device_state_change",
            Self::ResidentArrive => "resident_arrive",
            Self::ResidentLeave => "resident_leave",
            Self::ScheduleFired => "schedule_fired",
        }
    }

    #[must_use]
    pub fn is_presence(self) -> bool {
        matches!(self, Self::ResidentArrive | Self::ResidentLeave)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown [`EventKind`] string.
#[derive(Debug, thiserror::Error)]
#[error("unknown event kind {0:?}")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "device_state_change" => Ok(Self::DeviceStateChange),
            "resident_arrive" => Ok(Self::ResidentArrive),
            "resident_leave" => Ok(Self::ResidentLeave),
            "schedule_fired" => Ok(Self::ScheduleFired),
            other => Err(UnknownEventKind(other.to_string())),
        }
    }
}

/// An immutable log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    /// Parameter address for device events, resident name for presence
    /// events, schedule id for schedule events.
    pub source: String,
    pub kind: EventKind,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(
        kind: EventKind,
        source: impl Into<String>,
        timestamp: Timestamp,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: EventId::new(),
            timestamp,
            source: source.into(),
            kind,
            payload,
        }
    }

    /// A device parameter changed value.
    #[must_use]
    pub fn device_state_change(
        address: &ParameterAddress,
        value: &serde_json::Value,
        timestamp: Timestamp,
    ) -> Self {
        let source = address.to_string();
        let id = EventId::derived(&format!("{source}@{}", to_millis(timestamp)));
        Self {
            id,
            ..Self::new(
                EventKind::DeviceStateChange,
                source,
                timestamp,
                serde_json::json!({ "value": value }),
            )
        }
    }

    /// A resident arrived (`present == true`) or left.
    pub fn presence(
        resident: impl Into<String>,
        present: bool,
        cause: Option<&str>,
        timestamp: Timestamp,
    ) -> Self {
        let kind = if present {
            EventKind::ResidentArrive
        } else {
            EventKind::ResidentLeave
        };
        Self::new(
            kind,
            resident,
            timestamp,
            serde_json::json!({ "cause": cause }),
        )
    }

    /// A schedule finished executing; `error` is set when the action failed.
    #[must_use]
    pub fn schedule_fired(
        schedule_id: ScheduleId,
        name: &str,
        error: Option<String>,
        timestamp: Timestamp,
    ) -> Self {
        let payload = match error {
            None => serde_json::json!({ "name": name, "outcome": "ok" }),
            Some(message) => {
                serde_json::json!({ "name": name, "outcome": "error", "error": message })
            }
        };
        Self::new(
            EventKind::ScheduleFired,
            schedule_id.to_string(),
            timestamp,
            payload,
        )
    }

    /// The parameter address for device events.
    #[must_use]
    pub fn parameter_address(&self) -> Option<ParameterAddress> {
        if self.kind == EventKind::DeviceStateChange {
            self.source.parse().ok()
        } else {
            None
        }
    }

    /// The raw value carried by a device event.
    #[must_use]
    pub fn value(&self) -> Option<&serde_json::Value> {
        self.payload.get("value")
    }

    /// Interpret the carried value as a boolean, accepting loose encodings.
    #[must_use]
    pub fn value_as_bool(&self) -> Option<bool> {
        crate::device::ValueKind::Boolean
            .coerce(self.value()?)
            .and_then(|v| match v {
                ParameterValue::Bool(b) => Some(b),
                _ => None,
            })
    }

    /// Whether a schedule event reports a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.payload.get("outcome").and_then(serde_json::Value::as_str) == Some("error")
    }
}
