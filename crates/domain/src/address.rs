//! Homematic addresses.
//!
//! A device is addressed by its serial (`HM-1`, `LEQ0123456`), a channel by
//! `<device>:<index>` and a single parameter of a channel by
//! `<channel>.<PARAMETER>`, e.g. `HM-1:1.STATE`. Channel `0` is the
//! maintenance channel carrying `UNREACH`, `LOWBAT` and similar.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Why an address string was rejected.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address {0:?} is missing the ':' channel separator")]
    MissingChannel(String),
    #[error("address {0:?} has an empty device part")]
    EmptyDevice(String),
    #[error("address {0:?} has a non-numeric channel index")]
    InvalidChannelIndex(String),
    #[error("address {0:?} is missing the '.' parameter separator")]
    MissingParameter(String),
    #[error("address {0:?} has an empty parameter name")]
    EmptyParameter(String),
}

/// Address of a channel, `<device>:<index>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelAddress {
    device: String,
    index: u32,
}

impl ChannelAddress {
    /// # Errors
    ///
    /// Returns [`AddressError::EmptyDevice`] when `device` is empty.
    pub fn new(device: impl Into<String>, index: u32) -> Result<Self, AddressError> {
        let device = device.into();
        if device.trim().is_empty() {
            return Err(AddressError::EmptyDevice(format!("{device}:{index}")));
        }
        Ok(Self { device, index })
    }

    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Whether this is the maintenance channel (`:0`).
    #[must_use]
    pub fn is_maintenance(&self) -> bool {
        self.index == 0
    }

    /// Address a parameter of this channel.
    #[must_use]
    pub fn parameter(&self, name: impl Into<String>) -> ParameterAddress {
        ParameterAddress {
            channel: self.clone(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device, self.index)
    }
}

impl FromStr for ChannelAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (device, index) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressError::MissingChannel(s.to_string()))?;
        if device.is_empty() {
            return Err(AddressError::EmptyDevice(s.to_string()));
        }
        let index = index
            .parse()
            .map_err(|_| AddressError::InvalidChannelIndex(s.to_string()))?;
        Ok(Self {
            device: device.to_string(),
            index,
        })
    }
}

impl TryFrom<String> for ChannelAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelAddress> for String {
    fn from(value: ChannelAddress) -> Self {
        value.to_string()
    }
}

/// Address of a single parameter, `<device>:<index>.<NAME>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParameterAddress {
    channel: ChannelAddress,
    name: String,
}

impl ParameterAddress {
    #[must_use]
    pub fn channel(&self) -> &ChannelAddress {
        &self.channel
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ParameterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.channel, self.name)
    }
}

impl FromStr for ParameterAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Parameter names never contain ':', device serials may contain '.'
        let colon = s
            .rfind(':')
            .ok_or_else(|| AddressError::MissingChannel(s.to_string()))?;
        let dot = s[colon..]
            .find('.')
            .map(|i| colon + i)
            .ok_or_else(|| AddressError::MissingParameter(s.to_string()))?;
        let name = &s[dot + 1..];
        if name.is_empty() {
            return Err(AddressError::EmptyParameter(s.to_string()));
        }
        let channel: ChannelAddress = s[..dot].parse()?;
        Ok(Self {
            channel,
            name: name.to_string(),
        })
    }
}

impl TryFrom<String> for ParameterAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ParameterAddress> for String {
    fn from(value: ParameterAddress) -> Self {
        value.to_string()
    }
}
