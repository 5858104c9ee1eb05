//! Residents and their presence.
//!
//! A resident is a tracked person whose presence is derived from a single
//! sensor parameter on the controller (a presence switch, a key-fob
//! channel, a system variable mirrored onto a virtual channel).

use serde::{Deserialize, Serialize};

use crate::address::ParameterAddress;
use crate::error::{CcuError, ValidationError};
use crate::event::{Event, EventKind};

/// A tracked person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resident {
    pub name: String,
    /// Parameter whose value reflects the resident's presence.
    pub sensor: ParameterAddress,
    /// Sensor value meaning "at home". Defaults to `true`.
    #[serde(default = "default_present_when")]
    pub present_when: bool,
}

fn default_present_when() -> bool {
    true
}

impl Resident {
    pub fn new(name: impl Into<String>, sensor: ParameterAddress) -> Self {
        Self {
            name: name.into(),
            sensor,
            present_when: true,
        }
    }

    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyName`] for a blank name.
    pub fn validate(&self) -> Result<(), CcuError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        Ok(())
    }

    /// Presence reported by a device event from this resident's sensor.
    #[must_use]
    pub fn presence_from(&self, event: &Event) -> Option<bool> {
        if event.kind != EventKind::DeviceStateChange || event.source != self.sensor.to_string() {
            return None;
        }
        event.value_as_bool().map(|v| v == self.present_when)
    }
}

/// Presence carried by a logged arrive/leave event.
#[must_use]
pub fn presence_of(event: &Event) -> Option<bool> {
    match event.kind {
        EventKind::ResidentArrive => Some(true),
        EventKind::ResidentLeave => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::now;

    fn alice() -> Resident {
        Resident::new("alice", "HM-9:1.STATE".parse().unwrap())
    }

    #[test]
    fn should_read_presence_from_sensor_event() {
        let addr: ParameterAddress = "HM-9:1.STATE".parse().unwrap();
        let event = Event::device_state_change(&addr, &serde_json::json!(true), now());
        assert_eq!(alice().presence_from(&event), Some(true));
    }

    #[test]
    fn should_invert_presence_when_configured() {
        let mut resident = alice();
        resident.present_when = false;
        let addr = resident.sensor.clone();
        let event = Event::device_state_change(&addr, &serde_json::json!(false), now());
        assert_eq!(resident.presence_from(&event), Some(true));
    }

    #[test]
    fn should_ignore_other_sources() {
        let addr: ParameterAddress = "HM-1:1.STATE".parse().unwrap();
        let event = Event::device_state_change(&addr, &serde_json::json!(true), now());
        assert_eq!(alice().presence_from(&event), None);
    }

    #[test]
    fn should_read_presence_of_logged_events() {
        assert_eq!(presence_of(&Event::presence("a", true, None, now())), Some(true));
        assert_eq!(presence_of(&Event::presence("a", false, None, now())), Some(false));
    }

    #[test]
    fn should_default_present_when_to_true() {
        let r: Resident =
            serde_json::from_str(r#"{"name":"bob","sensor":"HM-2:1.STATE"}"#).unwrap();
        assert!(r.present_when);
    }

    #[test]
    fn should_reject_blank_name() {
        let r = Resident::new(" ", "HM-2:1.STATE".parse().unwrap());
        assert!(r.validate().is_err());
    }
}
