//! Virtual device catalog: switch, presence sensor, thermostat.
//!
//! Every device uses a fixed serial so addresses stay stable across
//! restarts of the daemon.

pub mod presence;
pub mod switch;
pub mod thermostat;

pub use presence::presence_sensor;
pub use switch::switch;
pub use thermostat::thermostat;

use ccuhub_domain::address::ChannelAddress;
use ccuhub_domain::device::{Channel, Operations, Parameter, ParameterValue, ValueKind};
use ccuhub_domain::error::ValidationError;

/// Read + event, the usual mask for status parameters.
pub(crate) const READ_EVENT: u8 = 5;
/// Read + write + event.
pub(crate) const READ_WRITE_EVENT: u8 = 7;

/// The maintenance channel `:0` every Homematic device carries.
pub(crate) fn maintenance(serial: &str) -> Result<Channel, ValidationError> {
    let flag = |name: &str| {
        Parameter::new(name, ValueKind::Boolean, Operations::from_mask(READ_EVENT))
            .with_value(ParameterValue::Bool(false))
    };
    Ok(Channel::new(channel(serial, 0)?, "MAINTENANCE")
        .with_parameter(flag("UNREACH"))
        .with_parameter(flag("LOWBAT")))
}

pub(crate) fn channel(serial: &str, index: u32) -> Result<ChannelAddress, ValidationError> {
    ChannelAddress::new(serial, index).map_err(ValidationError::Address)
}
