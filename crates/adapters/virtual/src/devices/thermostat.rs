//! Virtual radiator thermostat (`HM-CC-RT-DN`).

use ccuhub_domain::device::{
    CapabilitySet, Channel, Device, Operations, Parameter, ParameterValue, ValueKind,
};
use ccuhub_domain::error::ValidationError;

use super::{READ_EVENT, READ_WRITE_EVENT, channel, maintenance};

pub const SERIAL: &str = "VTH0000001";

/// Thermostat with a writable set point and a measured temperature.
///
/// # Errors
///
/// Returns a validation error if the channel layout is inconsistent.
pub fn thermostat() -> Result<Device, ValidationError> {
    let set_point = Parameter::new(
        "SET_TEMPERATURE",
        ValueKind::Numeric {
            min: Some(4.5),
            max: Some(30.5),
        },
        Operations::from_mask(READ_WRITE_EVENT),
    )
    .with_value(ParameterValue::Number(20.0));
    let actual = Parameter::new(
        "ACTUAL_TEMPERATURE",
        ValueKind::Numeric {
            min: Some(-10.0),
            max: Some(50.0),
        },
        Operations::from_mask(READ_EVENT),
    )
    .with_value(ParameterValue::Number(19.5));
    let mode = Parameter::new(
        "CONTROL_MODE",
        ValueKind::Enumerated {
            values: vec![
                "AUTO-MODE".to_string(),
                "MANU-MODE".to_string(),
                "PARTY-MODE".to_string(),
                "BOOST-MODE".to_string(),
            ],
        },
        Operations::from_mask(READ_EVENT),
    )
    .with_value(ParameterValue::Enum(0));

    Device::new(SERIAL, "HM-CC-RT-DN", CapabilitySet::all())
        .with_name("Virtual Thermostat")
        .with_channel(maintenance(SERIAL)?)?
        .with_channel(
            Channel::new(channel(SERIAL, 4)?, "CLIMATECONTROL_RT_TRANSCEIVER")
                .with_parameter(set_point)
                .with_parameter(actual)
                .with_parameter(mode),
        )
}
