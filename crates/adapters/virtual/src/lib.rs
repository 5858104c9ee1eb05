//! # ccuhub-adapter-virtual
//!
//! Virtual CCU that provides simulated Homematic devices for testing and
//! demonstration purposes.
//!
//! ## Provided devices
//!
//! | Device | Serial | Behaviour |
//! |--------|--------|-----------|
//! | Virtual Switch | `VSW0000001` | `STATE` on `:1` is readable, writable and emits events |
//! | Virtual Presence | `VPR0000001` | `PRESENCE_DETECTION_STATE` on `:1`, read-only, changed via [`VirtualCcu::inject`] |
//! | Virtual Thermostat | `VTH0000001` | `SET_TEMPERATURE` (4.5–30.5) and `ACTUAL_TEMPERATURE` on `:4` |
//!
//! Transport faults can be simulated: an unreachable controller, refused
//! subscriptions and dropped connections.
//!
//! ## Dependency rule
//!
//! Depends on `ccuhub-app` (port traits) and `ccuhub-domain` only.

pub mod devices;
pub mod error;

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ccuhub_app::ports::{EventSink, RawEvent, RemoteClient, SubscriptionHandle};
use ccuhub_domain::address::ParameterAddress;
use ccuhub_domain::device::{Capability, Device, Parameter, ParameterValue};
use ccuhub_domain::error::{RemoteError, ValidationError};

pub use error::VirtualError;

/// Interface id reported with every virtual event.
pub const INTERFACE_ID: &str = "VirtualDevices";

/// Simulated controller.
pub struct VirtualCcu {
    devices: Mutex<BTreeMap<String, Device>>,
    sinks: Mutex<HashMap<u64, EventSink>>,
    next_handle: AtomicU64,
    unreachable: AtomicBool,
    refused_subscriptions: AtomicU32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl VirtualCcu {
    /// A controller with the demo device catalog.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a demo device is malformed.
    pub fn demo() -> Result<Self, ValidationError> {
        Ok(Self::with_devices(vec![
            devices::switch()?,
            devices::presence_sensor()?,
            devices::thermostat()?,
        ]))
    }

    #[must_use]
    pub fn with_devices(devices: Vec<Device>) -> Self {
        Self {
            devices: Mutex::new(
                devices
                    .into_iter()
                    .map(|d| (d.address.clone(), d))
                    .collect(),
            ),
            sinks: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            unreachable: AtomicBool::new(false),
            refused_subscriptions: AtomicU32::new(0),
        }
    }

    /// Simulate the controller disappearing from (or returning to) the network.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Refuse the next `count` subscribe calls.
    pub fn refuse_subscriptions(&self, count: u32) {
        self.refused_subscriptions.store(count, Ordering::SeqCst);
    }

    /// Break every open subscription as if the connection dropped.
    pub fn drop_connections(&self) {
        let sinks: Vec<EventSink> = lock(&self.sinks).drain().map(|(_, s)| s).collect();
        tracing::info!(count = sinks.len(), "dropping virtual connections");
        for sink in sinks {
            sink.lost(RemoteError::subscription_lost("virtual connection dropped"));
        }
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        lock(&self.sinks).len()
    }

    /// Change a parameter as if the device reported it, bypassing the
    /// write capability check, and emit the event.
    ///
    /// # Errors
    ///
    /// Returns [`VirtualError`] for unknown addresses or values that do not
    /// fit the parameter.
    pub fn inject(
        &self,
        address: &ParameterAddress,
        value: ParameterValue,
    ) -> Result<(), VirtualError> {
        self.store(address, value.clone())?;
        self.emit(address, &value);
        Ok(())
    }

    fn ensure_reachable(&self) -> Result<(), VirtualError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(VirtualError::Unreachable)
        } else {
            Ok(())
        }
    }

    fn parameter(&self, address: &ParameterAddress) -> Result<Parameter, VirtualError> {
        let devices = lock(&self.devices);
        let device = devices
            .get(address.channel().device())
            .ok_or_else(|| VirtualError::UnknownDevice(address.channel().device().to_string()))?;
        device
            .parameter(address)
            .cloned()
            .ok_or_else(|| VirtualError::UnknownParameter(address.to_string()))
    }

    fn store(&self, address: &ParameterAddress, value: ParameterValue) -> Result<(), VirtualError> {
        let mut devices = lock(&self.devices);
        let device = devices
            .get_mut(address.channel().device())
            .ok_or_else(|| VirtualError::UnknownDevice(address.channel().device().to_string()))?;
        device
            .set_value(address, value)
            .map_err(|_| VirtualError::OutOfRange(address.to_string()))
    }

    fn emit(&self, address: &ParameterAddress, value: &ParameterValue) {
        let emits = lock(&self.devices)
            .get(address.channel().device())
            .is_some_and(|d| d.capabilities.contains(Capability::EventEmitting));
        if !emits {
            return;
        }
        let raw = RawEvent::new(
            INTERFACE_ID,
            address.channel().to_string(),
            address.name(),
            value.to_json(),
        );
        for sink in lock(&self.sinks).values() {
            if !sink.deliver(raw.clone()) {
                tracing::debug!(generation = sink.generation(), "event sink closed");
            }
        }
    }

    fn read_now(&self, address: &ParameterAddress) -> Result<serde_json::Value, VirtualError> {
        self.ensure_reachable()?;
        let parameter = self.parameter(address)?;
        if !parameter.operations.read {
            return Err(VirtualError::UnsupportedOperation(address.to_string()));
        }
        Ok(parameter
            .value
            .map_or(serde_json::Value::Null, |v| v.to_json()))
    }

    fn write_now(
        &self,
        address: &ParameterAddress,
        value: &ParameterValue,
    ) -> Result<(), VirtualError> {
        self.ensure_reachable()?;
        let parameter = self.parameter(address)?;
        if !parameter.operations.write {
            return Err(VirtualError::UnsupportedOperation(address.to_string()));
        }
        self.store(address, value.clone())?;
        if parameter.operations.event {
            self.emit(address, value);
        }
        tracing::debug!(address = %address, "virtual parameter written");
        Ok(())
    }

    fn subscribe_now(&self, sink: EventSink) -> Result<SubscriptionHandle, VirtualError> {
        self.ensure_reachable()?;
        if self
            .refused_subscriptions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(VirtualError::Unreachable);
        }
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        lock(&self.sinks).insert(handle, sink);
        tracing::info!(handle, "virtual subscription opened");
        Ok(SubscriptionHandle(handle))
    }
}

impl RemoteClient for VirtualCcu {
    fn list_devices(&self) -> impl Future<Output = Result<Vec<Device>, RemoteError>> + Send {
        let result: Result<Vec<Device>, RemoteError> = self
            .ensure_reachable()
            .map(|()| lock(&self.devices).values().cloned().collect())
            .map_err(RemoteError::from);
        async { result }
    }

    fn read(
        &self,
        address: &ParameterAddress,
    ) -> impl Future<Output = Result<serde_json::Value, RemoteError>> + Send {
        let result = self.read_now(address).map_err(RemoteError::from);
        async { result }
    }

    fn write(
        &self,
        address: &ParameterAddress,
        value: &ParameterValue,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send {
        let result = self.write_now(address, value).map_err(RemoteError::from);
        async { result }
    }

    fn subscribe(
        &self,
        sink: EventSink,
    ) -> impl Future<Output = Result<SubscriptionHandle, RemoteError>> + Send {
        let result = self.subscribe_now(sink).map_err(RemoteError::from);
        async { result }
    }

    fn unsubscribe(
        &self,
        handle: SubscriptionHandle,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send {
        if lock(&self.sinks).remove(&handle.0).is_some() {
            tracing::info!(handle = handle.0, "virtual subscription closed");
        }
        async { Ok(()) }
    }
}
