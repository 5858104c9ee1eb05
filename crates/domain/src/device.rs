//! Device: a physical Homematic device with one or more channels.
//!
//! Devices are created on discovery from the controller and removed only
//! when a later discovery no longer reports them. What a device can do is
//! described by a [`CapabilitySet`]; every read, write and event is checked
//! against it explicitly.

mod parameter;

use std::collections::BTreeMap;

pub use parameter::{Operations, Parameter, ParameterValue, ValueKind};

use serde::{Deserialize, Serialize};

use crate::address::{ChannelAddress, ParameterAddress};
use crate::error::{CcuError, NotFoundError, ValidationError};

/// One thing a device or parameter can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Readable,
    Writable,
    EventEmitting,
}

impl Capability {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Readable => "readable",
            Self::Writable => "writable",
            Self::EventEmitting => "event-emitting",
        }
    }

    fn allowed_by(self, ops: Operations) -> bool {
        match self {
            Self::Readable => ops.read,
            Self::Writable => ops.write,
            Self::EventEmitting => ops.event,
        }
    }
}

/// The set of capabilities a device exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub readable: bool,
    pub writable: bool,
    pub event_emitting: bool,
}

impl CapabilitySet {
    #[must_use]
    pub fn all() -> Self {
        Self {
            readable: true,
            writable: true,
            event_emitting: true,
        }
    }

    #[must_use]
    pub fn contains(self, capability: Capability) -> bool {
        match capability {
            Capability::Readable => self.readable,
            Capability::Writable => self.writable,
            Capability::EventEmitting => self.event_emitting,
        }
    }

    #[must_use]
    pub fn with(mut self, capability: Capability) -> Self {
        match capability {
            Capability::Readable => self.readable = true,
            Capability::Writable => self.writable = true,
            Capability::EventEmitting => self.event_emitting = true,
        }
        self
    }
}

/// Addressable sub-unit of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub address: ChannelAddress,
    pub channel_type: String,
    pub parameters: BTreeMap<String, Parameter>,
}

impl Channel {
    pub fn new(address: ChannelAddress, channel_type: impl Into<String>) -> Self {
        Self {
            address,
            channel_type: channel_type.into(),
            parameters: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.insert(parameter.name.clone(), parameter);
        self
    }
}

/// A discovered device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Device serial, e.g. `HM-1` or `LEQ0123456`.
    pub address: String,
    pub device_type: String,
    pub name: Option<String>,
    pub capabilities: CapabilitySet,
    channels: BTreeMap<u32, Channel>,
}

impl Device {
    pub fn new(
        address: impl Into<String>,
        device_type: impl Into<String>,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            address: address.into(),
            device_type: device_type.into(),
            name: None,
            capabilities,
            channels: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach a channel.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ForeignChannel`] when the channel belongs to
    /// another device, or [`ValidationError::DuplicateChannel`] when the
    /// channel address is already taken.
    pub fn add_channel(&mut self, channel: Channel) -> Result<(), ValidationError> {
        if channel.address.device() != self.address {
            return Err(ValidationError::ForeignChannel {
                channel: channel.address.to_string(),
                device: self.address.clone(),
            });
        }
        let index = channel.address.index();
        if self.channels.contains_key(&index) {
            return Err(ValidationError::DuplicateChannel(channel.address.to_string()));
        }
        self.channels.insert(index, channel);
        Ok(())
    }

    /// Builder-style [`add_channel`](Self::add_channel).
    ///
    /// # Errors
    ///
    /// See [`add_channel`](Self::add_channel).
    pub fn with_channel(mut self, channel: Channel) -> Result<Self, ValidationError> {
        self.add_channel(channel)?;
        Ok(self)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    #[must_use]
    pub fn channel(&self, index: u32) -> Option<&Channel> {
        self.channels.get(&index)
    }

    #[must_use]
    pub fn parameter(&self, address: &ParameterAddress) -> Option<&Parameter> {
        if address.channel().device() != self.address {
            return None;
        }
        self.channels
            .get(&address.channel().index())
            .and_then(|c| c.parameters.get(address.name()))
    }

    /// Check that `capability` is available for the parameter at `address`
    /// and return it.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] for unknown parameters and
    /// [`ValidationError::MissingCapability`] when either the device or the
    /// parameter lacks the capability.
    pub fn require(
        &self,
        address: &ParameterAddress,
        capability: Capability,
    ) -> Result<&Parameter, CcuError> {
        let parameter = self.parameter(address).ok_or_else(|| NotFoundError {
            entity: "Parameter",
            id: address.to_string(),
        })?;
        if !self.capabilities.contains(capability) || !capability.allowed_by(parameter.operations)
        {
            return Err(ValidationError::MissingCapability {
                address: address.to_string(),
                capability: capability.as_str(),
            }
            .into());
        }
        Ok(parameter)
    }

    /// Store a new value for the parameter at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] for unknown parameters or a validation error
    /// when the value does not fit the parameter kind.
    pub fn set_value(
        &mut self,
        address: &ParameterAddress,
        value: ParameterValue,
    ) -> Result<(), CcuError> {
        let parameter = self
            .channels
            .get_mut(&address.channel().index())
            .filter(|c| c.address == *address.channel())
            .and_then(|c| c.parameters.get_mut(address.name()))
            .ok_or_else(|| NotFoundError {
                entity: "Parameter",
                id: address.to_string(),
            })?;
        parameter.set(value)?;
        Ok(())
    }

    fn maintenance_flag(&self, names: &[&str]) -> bool {
        self.channel(0).is_some_and(|c| {
            names.iter().any(|name| {
                c.parameters
                    .get(*name)
                    .is_some_and(|p| p.value == Some(ParameterValue::Bool(true)))
            })
        })
    }

    /// Whether the maintenance channel reports a low battery.
    #[must_use]
    pub fn is_battery_low(&self) -> bool {
        self.maintenance_flag(&["LOWBAT", "LOW_BAT"])
    }

    /// Whether the maintenance channel reports the device as unreachable.
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        self.maintenance_flag(&["UNREACH"])
    }
}
