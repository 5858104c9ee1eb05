//! Virtual switch actuator (`HM-LC-Sw1-FM`).

use ccuhub_domain::device::{
    CapabilitySet, Channel, Device, Operations, Parameter, ParameterValue, ValueKind,
};
use ccuhub_domain::error::ValidationError;

use super::{READ_WRITE_EVENT, channel, maintenance};

pub const SERIAL: &str = "VSW0000001";

/// A switch actuator with one `STATE` parameter on channel 1.
///
/// # Errors
///
/// Returns a validation error if the channel layout is inconsistent.
pub fn switch() -> Result<Device, ValidationError> {
    let state = Parameter::new(
        "STATE",
        ValueKind::Boolean,
        Operations::from_mask(READ_WRITE_EVENT),
    )
    .with_value(ParameterValue::Bool(false));

    Device::new(SERIAL, "HM-LC-Sw1-FM", CapabilitySet::all())
        .with_name("Virtual Switch")
        .with_channel(maintenance(SERIAL)?)?
        .with_channel(Channel::new(channel(SERIAL, 1)?, "SWITCH").with_parameter(state))
}
