//! Remote access port: the controller's API as the core consumes it.
//!
//! The concrete transport (JSON-RPC, XML-RPC, Rega script) lives in an
//! adapter. Whatever it is, failures must be decoded into a structured
//! [`RemoteError`] before they cross this boundary.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;

use ccuhub_domain::address::{AddressError, ParameterAddress};
use ccuhub_domain::device::{Device, ParameterValue};
use ccuhub_domain::error::RemoteError;
use ccuhub_domain::time::{Timestamp, now};

/// A change notification exactly as the controller reported it.
///
/// Mirrors the XML-RPC `event(interface_id, address, value_key, value)`
/// callback, stamped with the time of receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub interface_id: String,
    /// Channel address, e.g. `HM-1:1`.
    pub address: String,
    /// Parameter name, e.g. `STATE`.
    pub value_key: String,
    pub value: serde_json::Value,
    pub timestamp: Timestamp,
}

impl RawEvent {
    pub fn new(
        interface_id: impl Into<String>,
        address: impl Into<String>,
        value_key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            interface_id: interface_id.into(),
            address: address.into(),
            value_key: value_key.into(),
            value,
            timestamp: now(),
        }
    }

    #[must_use]
    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The full parameter address (`<address>.<value_key>`).
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] when the controller sent a malformed address.
    pub fn parameter_address(&self) -> Result<ParameterAddress, AddressError> {
        format!("{}.{}", self.address, self.value_key).parse()
    }
}

/// Something the remote side pushes into the event sink.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// A raw change notification from subscription `generation`.
    Event { generation: u64, raw: RawEvent },
    /// Subscription `generation` broke and will deliver nothing more.
    Lost { generation: u64, error: RemoteError },
}

/// Queue handle given to the remote client when subscribing.
///
/// The receiving end outlives individual subscriptions, so notices already
/// pushed are not lost when the subscription is torn down.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::UnboundedSender<Notice>,
    generation: u64,
}

impl EventSink {
    #[must_use]
    pub fn new(sender: mpsc::UnboundedSender<Notice>, generation: u64) -> Self {
        Self { sender, generation }
    }

    /// Subscription generation this sink belongs to.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Push a raw event. Returns `false` once the receiving side is gone.
    pub fn deliver(&self, raw: RawEvent) -> bool {
        self.sender
            .send(Notice::Event {
                generation: self.generation,
                raw,
            })
            .is_ok()
    }

    /// Report that the subscription broke.
    pub fn lost(&self, error: RemoteError) -> bool {
        self.sender
            .send(Notice::Lost {
                generation: self.generation,
                error,
            })
            .is_ok()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Opaque identifier of an open subscription on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// The controller's API: discovery, reads, writes and event subscription.
pub trait RemoteClient: Send + Sync {
    /// Discover all devices known to the controller.
    fn list_devices(&self) -> impl Future<Output = Result<Vec<Device>, RemoteError>> + Send;

    /// Read the current value of a parameter.
    fn read(
        &self,
        address: &ParameterAddress,
    ) -> impl Future<Output = Result<serde_json::Value, RemoteError>> + Send;

    /// Write a parameter value.
    fn write(
        &self,
        address: &ParameterAddress,
        value: &ParameterValue,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Open the event stream; notifications are pushed into `sink`.
    fn subscribe(
        &self,
        sink: EventSink,
    ) -> impl Future<Output = Result<SubscriptionHandle, RemoteError>> + Send;

    /// Close a subscription opened by [`subscribe`](Self::subscribe).
    fn unsubscribe(
        &self,
        handle: SubscriptionHandle,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

impl<T: RemoteClient> RemoteClient for Arc<T> {
    fn list_devices(&self) -> impl Future<Output = Result<Vec<Device>, RemoteError>> + Send {
        (**self).list_devices()
    }

    fn read(
        &self,
        address: &ParameterAddress,
    ) -> impl Future<Output = Result<serde_json::Value, RemoteError>> + Send {
        (**self).read(address)
    }

    fn write(
        &self,
        address: &ParameterAddress,
        value: &ParameterValue,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send {
        (**self).write(address, value)
    }

    fn subscribe(
        &self,
        sink: EventSink,
    ) -> impl Future<Output = Result<SubscriptionHandle, RemoteError>> + Send {
        (**self).subscribe(sink)
    }

    fn unsubscribe(
        &self,
        handle: SubscriptionHandle,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send {
        (**self).unsubscribe(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_join_address_and_value_key() {
        let raw = RawEvent::new("BidCos-RF", "HM-1:1", "STATE", serde_json::json!(true));
        assert_eq!(raw.parameter_address().unwrap().to_string(), "HM-1:1.STATE");
    }

    #[test]
    fn should_reject_malformed_raw_address() {
        let raw = RawEvent::new("BidCos-RF", "HM-1", "STATE", serde_json::json!(true));
        assert!(raw.parameter_address().is_err());
    }

    #[tokio::test]
    async fn should_tag_notices_with_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx, 7);
        let raw = RawEvent::new("BidCos-RF", "HM-1:1", "STATE", serde_json::json!(true));
        assert!(sink.deliver(raw.clone()));
        assert!(sink.lost(RemoteError::subscription_lost("gone")));
        assert_eq!(rx.recv().await, Some(Notice::Event { generation: 7, raw }));
        assert!(matches!(
            rx.recv().await,
            Some(Notice::Lost { generation: 7, .. })
        ));
    }

    #[test]
    fn should_report_closed_sink() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx, 1);
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.deliver(RawEvent::new("x", "HM-1:1", "STATE", serde_json::json!(1))));
    }
}
