//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into [`CcuError`]
//! via `#[from]`. The four kinds callers care about are local validation
//! failures, remote transport failures, storage failures and listener
//! failures.

mod remote;

pub use remote::{RemoteError, RemoteErrorKind};

use crate::address::AddressError;

/// Top-level error returned across port boundaries.
#[derive(Debug, thiserror::Error)]
pub enum CcuError {
    /// A local invariant was violated by the caller's request.
    #[error("validation error")]
    Validation(#[from] ValidationError),

    /// The requested object does not exist.
    #[error("not found")]
    NotFound(#[from] NotFoundError),

    /// The remote controller or the transport to it failed.
    #[error("remote transport error")]
    Remote(#[from] RemoteError),

    /// The persistent store failed.
    #[error("storage error")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A registered listener failed during dispatch.
    #[error("listener error")]
    Listener(#[from] ListenerError),
}

impl CcuError {
    /// Whether this error came from the remote controller.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

impl From<AddressError> for CcuError {
    fn from(err: AddressError) -> Self {
        Self::Validation(ValidationError::Address(err))
    }
}

/// Local validation failures.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("interval must be greater than zero")]
    ZeroInterval,

    #[error("invalid time of day {0:?}, expected HH:MM")]
    InvalidTimeOfDay(String),

    #[error("schedule is busy ({state}), edits are only possible while idle")]
    ScheduleBusy { state: &'static str },

    #[error("parameter {address} is not {capability}")]
    MissingCapability {
        address: String,
        capability: &'static str,
    },

    #[error("value does not match parameter kind {expected}")]
    ValueKindMismatch { expected: &'static str },

    #[error("channel {0} already exists on device")]
    DuplicateChannel(String),

    #[error("channel {channel} does not belong to device {device}")]
    ForeignChannel { channel: String, device: String },

    #[error("invalid address")]
    Address(#[source] AddressError),
}

/// A lookup by identifier or address found nothing.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// A listener returned an error while handling an event.
#[derive(Debug, thiserror::Error)]
#[error("listener {listener} failed: {message}")]
pub struct ListenerError {
    pub listener: String,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ListenerError {
    /// Build a listener error without an underlying source.
    pub fn new(listener: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            listener: listener.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a [`CcuError`] raised inside a listener.
    pub fn from_ccu(listener: impl Into<String>, err: CcuError) -> Self {
        Self {
            listener: listener.into(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}
