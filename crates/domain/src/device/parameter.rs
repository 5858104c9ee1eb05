//! Parameters: typed scalar values exposed by a channel.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Declared kind of a parameter, as reported by the controller's paramset
/// description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueKind {
    Boolean,
    Numeric {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    /// Enumerated values, addressed by index into `values`.
    Enumerated { values: Vec<String> },
    String,
}

impl ValueKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Numeric { .. } => "numeric",
            Self::Enumerated { .. } => "enumerated",
            Self::String => "string",
        }
    }

    /// Check that `value` is acceptable for this kind.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ValueKindMismatch`] when the variant does
    /// not match, a number is out of `min..=max` or an enum index is out of
    /// range.
    pub fn check(&self, value: &ParameterValue) -> Result<(), ValidationError> {
        let ok = match (self, value) {
            (Self::Boolean, ParameterValue::Bool(_)) | (Self::String, ParameterValue::String(_)) => {
                true
            }
            (Self::Numeric { min, max }, ParameterValue::Number(n)) => {
                min.is_none_or(|min| *n >= min) && max.is_none_or(|max| *n <= max)
            }
            (Self::Enumerated { values }, ParameterValue::Enum(idx)) => {
                usize::try_from(*idx).is_ok_and(|i| i < values.len())
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(ValidationError::ValueKindMismatch {
                expected: self.as_str(),
            })
        }
    }

    /// Interpret a raw JSON value delivered by the controller as this kind.
    ///
    /// Homematic interfaces are loose about types: booleans may arrive as
    /// `0`/`1` or `"true"`, numbers as strings.
    #[must_use]
    pub fn coerce(&self, raw: &serde_json::Value) -> Option<ParameterValue> {
        use serde_json::Value;
        match self {
            Self::Boolean => match raw {
                Value::Bool(b) => Some(ParameterValue::Bool(*b)),
                Value::Number(n) => n.as_f64().map(|n| ParameterValue::Bool(n != 0.0)),
                Value::String(s) => match s.to_ascii_lowercase().as_str() {
                    "true" | "1" => Some(ParameterValue::Bool(true)),
                    "false" | "0" => Some(ParameterValue::Bool(false)),
                    _ => None,
                },
                _ => None,
            },
            Self::Numeric { .. } => match raw {
                Value::Number(n) => n.as_f64().map(ParameterValue::Number),
                Value::String(s) => s.parse().ok().map(ParameterValue::Number),
                _ => None,
            },
            Self::Enumerated { values } => match raw {
                Value::Number(n) => n
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .map(ParameterValue::Enum),
                Value::String(s) => values
                    .iter()
                    .position(|v| v == s)
                    .and_then(|i| u32::try_from(i).ok())
                    .map(ParameterValue::Enum),
                _ => None,
            },
            Self::String => match raw {
                Value::String(s) => Some(ParameterValue::String(s.clone())),
                Value::Null => None,
                other => Some(ParameterValue::String(other.to_string())),
            },
        }
    }
}

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Enum(u32),
    Number(f64),
    String(String),
}

impl ParameterValue {
    /// JSON representation used in event payloads.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Enum(i) => serde_json::Value::from(*i),
            Self::Number(n) => serde_json::Value::from(*n),
            Self::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

/// Operations a parameter supports, mirroring the `OPERATIONS` bitmask of
/// the paramset description (1 = read, 2 = write, 4 = event).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operations {
    pub read: bool,
    pub write: bool,
    pub event: bool,
}

impl Operations {
    #[must_use]
    pub fn from_mask(mask: u8) -> Self {
        Self {
            read: mask & 1 != 0,
            write: mask & 2 != 0,
            event: mask & 4 != 0,
        }
    }
}

/// A named value on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub kind: ValueKind,
    pub operations: Operations,
    pub value: Option<ParameterValue>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, kind: ValueKind, operations: Operations) -> Self {
        Self {
            name: name.into(),
            kind,
            operations,
            value: None,
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: ParameterValue) -> Self {
        self.value = Some(value);
        self
    }

    /// Replace the current value after checking it against the kind.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ValueKindMismatch`] for mismatching values.
    pub fn set(&mut self, value: ParameterValue) -> Result<(), ValidationError> {
        self.kind.check(&value)?;
        self.value = Some(value);
        Ok(())
    }
}
