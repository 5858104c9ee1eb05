//! Structured errors reported by the remote controller.
//!
//! The CCU reports failures in several native shapes: XML-RPC faults with a
//! numeric code, JSON-RPC error objects and raw script (Rega/TCL) output.
//! All of them are decoded into a [`RemoteError`] so callers can branch on a
//! [`RemoteErrorKind`] instead of matching on opaque text.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What went wrong on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// The controller could not be reached.
    Connection,
    /// The controller answered with something that is not a valid response.
    Protocol,
    /// The event subscription was lost while it was active.
    SubscriptionLost,
    /// Fault `-1`.
    General,
    /// Fault `-2`.
    UnknownDevice,
    /// Fault `-3`.
    UnknownParamset,
    /// Fault `-4`.
    AddressExpected,
    /// Fault `-5`.
    UnknownParameter,
    /// Fault `-6`.
    UnsupportedOperation,
    /// Fault `-7`.
    UpdateFailed,
    /// Fault `-8`.
    DutyCycle,
    /// Fault `-9`.
    OutOfRange,
    /// A fault code without a dedicated kind.
    Fault { code: i32 },
    /// A script executed on the controller reported an error.
    Script,
}

impl RemoteErrorKind {
    /// Map an XML-RPC fault code to a kind.
    #[must_use]
    pub fn from_fault_code(code: i32) -> Self {
        match code {
            -1 => Self::General,
            -2 => Self::UnknownDevice,
            -3 => Self::UnknownParamset,
            -4 => Self::AddressExpected,
            -5 => Self::UnknownParameter,
            -6 => Self::UnsupportedOperation,
            -7 => Self::UpdateFailed,
            -8 => Self::DutyCycle,
            -9 => Self::OutOfRange,
            code => Self::Fault { code },
        }
    }

    /// Whether retrying the same request later may succeed.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Connection
                | Self::Protocol
                | Self::SubscriptionLost
                | Self::UpdateFailed
                | Self::DutyCycle
                | Self::OutOfRange
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Protocol => "protocol",
            Self::SubscriptionLost => "subscription_lost",
            Self::General => "general",
            Self::UnknownDevice => "unknown_device",
            Self::UnknownParamset => "unknown_paramset",
            Self::AddressExpected => "address_expected",
            Self::UnknownParameter => "unknown_parameter",
            Self::UnsupportedOperation => "unsupported_operation",
            Self::UpdateFailed => "update_failed",
            Self::DutyCycle => "duty_cycle",
            Self::OutOfRange => "out_of_range",
            Self::Fault { .. } => "fault",
            Self::Script => "script",
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fault { code } => write!(f, "fault({code})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// A decoded remote failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Connection, message)
    }

    pub fn subscription_lost(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::SubscriptionLost, message)
    }

    /// Decode an XML-RPC fault (`faultCode`, `faultString`).
    pub fn from_fault(code: i32, text: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::from_fault_code(code), text)
    }

    /// Decode a JSON-RPC error object as returned by the CCU's JSON API.
    ///
    /// The JSON API carries its own `code` (HTTP-like, e.g. `501`) and a
    /// `name`/`message` pair. Negative codes are XML-RPC faults forwarded by
    /// the JSON API and are decoded as such.
    #[must_use]
    pub fn from_json_error(error: &serde_json::Value) -> Self {
        let code = error
            .get("code")
            .and_then(serde_json::Value::as_i64)
            .and_then(|c| i32::try_from(c).ok());
        let name = error.get("name").and_then(serde_json::Value::as_str);
        let message = error
            .get("message")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let text = match name {
            Some(name) if !name.is_empty() => format!("{name}: {message}"),
            _ => message.to_string(),
        };
        match code {
            Some(code) if code < 0 => Self::from_fault(code, text),
            Some(code) => Self::new(RemoteErrorKind::Fault { code }, text),
            None => Self::new(RemoteErrorKind::Protocol, text),
        }
    }

    /// Decode the output of a failed Rega/TCL script.
    ///
    /// Script errors arrive as free text, sometimes followed by a TCL stack
    /// trace (`while executing ...`). Only the first meaningful line is kept
    /// and a leading `Error:` marker is stripped.
    #[must_use]
    pub fn from_script_output(output: &str) -> Self {
        let line = output
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default();
        let message = ["Error:", "ERROR:", "error:"]
            .iter()
            .find_map(|prefix| line.strip_prefix(prefix))
            .unwrap_or(line)
            .trim();
        Self::new(RemoteErrorKind::Script, message)
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}
