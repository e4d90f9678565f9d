//! The broker link a device session runs on.
//!
//! [`DeviceLink`] is everything the session needs from the publish/subscribe
//! layer. [`crate::client::MqttClient`] implements it on top of any
//! [`crate::transport::MqttTransport`]; reconnect policies and TLS belong to
//! the implementation, not to the session.

use crate::packet::QoS;

/// An inbound message, borrowed from the link's receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<'m> {
    pub topic: &'m str,
    pub payload: &'m [u8],
}

/// A connection to a publish/subscribe broker.
#[allow(async_fn_in_trait)]
pub trait DeviceLink {
    /// The error type returned by the link.
    type Error: core::fmt::Debug;

    /// Opens the broker session.
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Closes the broker session.
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), Self::Error>;

    async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), Self::Error>;

    /// Waits for the next inbound message.
    async fn wait_message(&mut self) -> Result<Message<'_>, Self::Error>;

    /// Returns an inbound message if one is already available, without waiting.
    async fn check_message(&mut self) -> Result<Option<Message<'_>>, Self::Error>;
}
