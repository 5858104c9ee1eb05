//! Action: the effect performed when a schedule fires.

use serde::{Deserialize, Serialize};

use crate::address::ParameterAddress;
use crate::device::ParameterValue;

/// Reference to the action a schedule executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleAction {
    /// Write a value to a device parameter on the controller.
    WriteParameter {
        address: ParameterAddress,
        value: ParameterValue,
    },
    /// Run a locally registered action by name.
    Named { name: String },
}

impl std::fmt::Display for ScheduleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WriteParameter { address, .. } => write!(f, "write({address})"),
            Self::Named { name } => write!(f, "named({name})"),
        }
    }
}
