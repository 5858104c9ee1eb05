//! Device registry: cached view of the controller's devices.
//!
//! Filled by discovery, kept current by inbound events (the registry is
//! itself a [`Listener`]) and used as the capability gate for reads and
//! writes against the controller.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use futures::FutureExt;
use futures::future::BoxFuture;

use ccuhub_domain::address::ParameterAddress;
use ccuhub_domain::device::{Capability, Device, Parameter, ParameterValue};
use ccuhub_domain::error::{CcuError, ListenerError, NotFoundError, ValidationError};
use ccuhub_domain::event::{Event, EventKind};

use crate::ports::{Listener, RemoteClient};
use crate::sync::{read, write};

/// What changed during a [`DeviceRegistry::refresh`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub total: usize,
}

pub struct DeviceRegistry<R> {
    remote: Arc<R>,
    devices: RwLock<BTreeMap<String, Device>>,
}

impl<R: RemoteClient> DeviceRegistry<R> {
    pub fn new(remote: Arc<R>) -> Self {
        Self {
            remote,
            devices: RwLock::new(BTreeMap::new()),
        }
    }

    /// Re-run discovery. Devices missing from the answer are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CcuError::Remote`] when discovery fails; the cache is left
    /// untouched in that case.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Result<RefreshReport, CcuError> {
        let discovered = self.remote.list_devices().await?;

        let mut next = BTreeMap::new();
        for device in discovered {
            next.insert(device.address.clone(), device);
        }

        let mut devices = write(&self.devices);
        let report = RefreshReport {
            added: next
                .keys()
                .filter(|a| !devices.contains_key(*a))
                .cloned()
                .collect(),
            removed: devices
                .keys()
                .filter(|a| !next.contains_key(*a))
                .cloned()
                .collect(),
            total: next.len(),
        };
        *devices = next;
        drop(devices);

        tracing::info!(
            total = report.total,
            added = report.added.len(),
            removed = report.removed.len(),
            "device discovery finished"
        );
        Ok(report)
    }

    #[must_use]
    pub fn device(&self, address: &str) -> Option<Device> {
        read(&self.devices).get(address).cloned()
    }

    #[must_use]
    pub fn devices(&self) -> Vec<Device> {
        read(&self.devices).values().cloned().collect()
    }

    /// Devices whose maintenance channel reports a low battery.
    #[must_use]
    pub fn low_battery_devices(&self) -> Vec<Device> {
        read(&self.devices)
            .values()
            .filter(|d| d.is_battery_low())
            .cloned()
            .collect()
    }

    /// Read a parameter from the controller and cache the value.
    ///
    /// # Errors
    ///
    /// Returns [`CcuError::NotFound`] for unknown devices or parameters,
    /// [`ValidationError::MissingCapability`] for non-readable parameters,
    /// [`ValidationError::ValueKindMismatch`] when the controller answered
    /// with something that does not fit the declared kind, and
    /// [`CcuError::Remote`] on transport or controller errors.
    #[tracing::instrument(skip(self, address), fields(address = %address))]
    pub async fn read(&self, address: &ParameterAddress) -> Result<ParameterValue, CcuError> {
        let kind = self.checked(address, Capability::Readable, |p| p.kind.clone())?;

        let raw = self.remote.read(address).await?;
        let value = kind
            .coerce(&raw)
            .ok_or(ValidationError::ValueKindMismatch {
                expected: kind.as_str(),
            })?;

        self.store(address, value.clone());
        Ok(value)
    }

    /// Write a parameter on the controller.
    ///
    /// The value is checked locally before anything is sent.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingCapability`] for non-writable
    /// parameters, [`ValidationError::ValueKindMismatch`] for values that do
    /// not fit, [`CcuError::NotFound`] for unknown addresses and
    /// [`CcuError::Remote`] when the controller rejects the write.
    #[tracing::instrument(skip(self, address), fields(address = %address))]
    pub async fn write(
        &self,
        address: &ParameterAddress,
        value: ParameterValue,
    ) -> Result<(), CcuError> {
        self.checked(address, Capability::Writable, |p| p.kind.check(&value))??;

        self.remote.write(address, &value).await?;
        self.store(address, value);
        tracing::debug!("parameter written");
        Ok(())
    }

    /// Update the cached value from a device event.
    ///
    /// Returns whether the cache changed. Events for unknown addresses, for
    /// devices that do not emit events, or with values that do not fit the
    /// parameter kind are ignored.
    pub fn apply(&self, event: &Event) -> bool {
        if event.kind != EventKind::DeviceStateChange {
            return false;
        }
        let (Some(address), Some(raw)) = (event.parameter_address(), event.value()) else {
            return false;
        };

        let mut devices = write(&self.devices);
        let Some(device) = devices.get_mut(address.channel().device()) else {
            return false;
        };
        if !device.capabilities.contains(Capability::EventEmitting) {
            return false;
        }
        let Some(value) = device.parameter(&address).and_then(|p| p.kind.coerce(raw)) else {
            tracing::debug!(address = %address, "ignoring event for unknown parameter");
            return false;
        };
        match device.set_value(&address, value) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(address = %address, error = %err, "ignoring unusable event value");
                false
            }
        }
    }

    fn checked<T>(
        &self,
        address: &ParameterAddress,
        capability: Capability,
        f: impl FnOnce(&Parameter) -> T,
    ) -> Result<T, CcuError> {
        let devices = read(&self.devices);
        let device = devices
            .get(address.channel().device())
            .ok_or_else(|| NotFoundError {
                entity: "Device",
                id: address.channel().device().to_string(),
            })?;
        Ok(f(device.require(address, capability)?))
    }

    fn store(&self, address: &ParameterAddress, value: ParameterValue) {
        if let Some(device) = write(&self.devices).get_mut(address.channel().device())
            && let Err(err) = device.set_value(address, value)
        {
            tracing::debug!(address = %address, error = %err, "cached value not updated");
        }
    }
}

impl<R: RemoteClient> Listener for DeviceRegistry<R> {
    fn name(&self) -> &str {
        "device-registry"
    }

    fn handle<'a>(&'a self, event: &'a Event) -> BoxFuture<'a, Result<(), ListenerError>> {
        self.apply(event);
        async { Ok(()) }.boxed()
    }
}
