//! Schedule: a time-triggered action.
//!
//! A schedule has a [`Trigger`] deciding when it is due and a
//! [`ScheduleAction`] to execute. Schedules are persisted and driven by the
//! schedule runner, which tracks a [`ScheduleState`] for each of them.

mod action;
mod state;
mod trigger;

pub use action::ScheduleAction;
pub use state::ScheduleState;
pub use trigger::Trigger;

use serde::{Deserialize, Serialize};

use crate::error::{CcuError, ValidationError};
use crate::id::ScheduleId;

/// A persisted, time-triggered action definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub name: String,
    pub trigger: Trigger,
    pub action: ScheduleAction,
    pub enabled: bool,
}

impl Schedule {
    /// Create a builder for constructing a [`Schedule`].
    #[must_use]
    pub fn builder() -> ScheduleBuilder {
        ScheduleBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`CcuError::Validation`] when the name is empty or the
    /// trigger is malformed.
    pub fn validate(&self) -> Result<(), CcuError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        self.trigger.validate()?;
        Ok(())
    }
}

/// Step-by-step builder for [`Schedule`].
#[derive(Debug, Default)]
pub struct ScheduleBuilder {
    id: Option<ScheduleId>,
    name: Option<String>,
    trigger: Option<Trigger>,
    action: Option<ScheduleAction>,
    enabled: Option<bool>,
}

impl ScheduleBuilder {
    #[must_use]
    pub fn id(mut self, id: ScheduleId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    #[must_use]
    pub fn action(mut self, action: ScheduleAction) -> Self {
        self.action = Some(action);
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Consume the builder, validate, and return a [`Schedule`].
    ///
    /// # Errors
    ///
    /// Returns [`CcuError::Validation`] if required fields are missing or invalid.
    pub fn build(self) -> Result<Schedule, CcuError> {
        let schedule = Schedule {
            id: self.id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            trigger: self.trigger.ok_or(ValidationError::MissingField("trigger"))?,
            action: self.action.ok_or(ValidationError::MissingField("action"))?,
            enabled: self.enabled.unwrap_or(true),
        };
        schedule.validate()?;
        Ok(schedule)
    }
}
