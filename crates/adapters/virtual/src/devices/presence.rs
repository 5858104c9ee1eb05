//! Virtual presence sensor, modelled as a remote key fob channel.

use ccuhub_domain::device::{
    Capability, CapabilitySet, Channel, Device, Operations, Parameter, ParameterValue, ValueKind,
};
use ccuhub_domain::error::ValidationError;

use super::{READ_EVENT, channel, maintenance};

pub const SERIAL: &str = "VPR0000001";

/// A read-only presence sensor (`PRESENCE_DETECTION_STATE` on channel 1).
///
/// # Errors
///
/// Returns a validation error if the channel layout is inconsistent.
pub fn presence_sensor() -> Result<Device, ValidationError> {
    let presence = Parameter::new(
        "PRESENCE_DETECTION_STATE",
        ValueKind::Boolean,
        Operations::from_mask(READ_EVENT),
    )
    .with_value(ParameterValue::Bool(false));

    let capabilities = CapabilitySet::default()
        .with(Capability::Readable)
        .with(Capability::EventEmitting);

    Device::new(SERIAL, "HM-Sen-Presence", capabilities)
        .with_name("Virtual Presence")
        .with_channel(maintenance(SERIAL)?)?
        .with_channel(Channel::new(channel(SERIAL, 1)?, "PRESENCE").with_parameter(presence))
}
