//! # Device Session
//!
//! [`DeviceSession`] is the public surface of the device API. It validates
//! inputs, keeps the [`Router`] bookkeeping and performs each outbound
//! publish on its [`DeviceLink`].
//!
//! The router is borrowed, not owned, so registrations can be made from other
//! tasks while one task drives the session with [`DeviceSession::wait_msg`]:
//!
//! ```ignore
//! static ROUTER: Router = Router::new();
//!
//! let link = MqttClient::<_, 1024>::new(transport, MqttOptions::from_auth(&auth));
//! let mut session = DeviceSession::new(link, &ROUTER, SessionOptions::new());
//! session.connect().await?;
//! session.send_telemetry(&json!({"temperature": 21.5}), QoS::AtMostOnce).await?;
//!
//! loop {
//!     session.wait_msg().await?;
//! }
//! ```

use serde::Serialize;
use serde_json::Value;

use crate::codec::{self, AttributeRequest, Attributes, ClaimRequest, RpcCall};
use crate::error::{ConfigError, DecodeError, Error};
use crate::link::DeviceLink;
use crate::packet::QoS;
use crate::router::{AttributeFilter, CorrelationId, Routed, Router, SubscriptionHandle};
use crate::topic;

/// How long a claim request stays valid unless a duration is given.
pub const DEFAULT_CLAIM_DURATION_MS: u32 = 30_000;

/// Accepts the two QoS levels the device API uses.
pub fn validate_qos(qos: QoS) -> Result<QoS, ConfigError> {
    match qos {
        QoS::AtMostOnce | QoS::AtLeastOnce => Ok(qos),
        QoS::ExactlyOnce => Err(ConfigError::UnsupportedQos(qos)),
    }
}

/// Parses and validates a raw QoS level.
pub fn qos_from_u8(raw: u8) -> Result<QoS, ConfigError> {
    let qos = QoS::try_from(raw).map_err(ConfigError::InvalidQos)?;
    validate_qos(qos)
}

/// Session-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionOptions {
    qos: QoS,
}

impl SessionOptions {
    pub const fn new() -> Self {
        Self {
            qos: QoS::AtMostOnce,
        }
    }

    /// QoS used for the connect-time subscriptions, RPC calls, attribute
    /// requests and claiming.
    pub fn with_qos(mut self, qos: QoS) -> Result<Self, ConfigError> {
        self.qos = validate_qos(qos)?;
        Ok(self)
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// A device connection to the platform.
pub struct DeviceSession<'r, L: DeviceLink> {
    link: L,
    router: &'r Router,
    options: SessionOptions,
    state: ConnectionState,
}

impl<'r, L: DeviceLink> DeviceSession<'r, L> {
    /// Creates a disconnected session.
    pub fn new(link: L, router: &'r Router, options: SessionOptions) -> Self {
        Self {
            link,
            router,
            options,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn router(&self) -> &'r Router {
        self.router
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    // --- connection ---

    /// Connects and subscribes to the device API topics. Does nothing when
    /// already connected.
    pub async fn connect(&mut self) -> Result<(), Error<L::Error>> {
        if self.is_connected() {
            debug!("Already connected");
            return Ok(());
        }
        self.open().await
    }

    /// Connects again whatever the current state, e.g. after the link was
    /// re-established underneath the session.
    pub async fn reconnect(&mut self) -> Result<(), Error<L::Error>> {
        self.state = ConnectionState::Disconnected;
        self.open().await
    }

    /// Closes the connection. Pending requests and subscriptions are kept.
    pub async fn disconnect(&mut self) -> Result<(), Error<L::Error>> {
        if !self.is_connected() {
            return Ok(());
        }
        self.state = ConnectionState::Disconnected;
        info!("Disconnecting");
        self.link.disconnect().await.map_err(Error::Transport)
    }

    async fn open(&mut self) -> Result<(), Error<L::Error>> {
        let result = self.link.connect().await;
        self.checked(result)?;
        let qos = self.options.qos;
        for filter in topic::SUBSCRIPTIONS {
            let result = self.link.subscribe(filter, qos).await;
            self.checked(result)?;
            debug!("Subscribed to {}", filter);
        }
        self.state = ConnectionState::Connected;
        info!("Connected");
        Ok(())
    }

    /// Passes a link result through, dropping to Disconnected on failure.
    fn checked<T>(&mut self, result: Result<T, L::Error>) -> Result<T, Error<L::Error>> {
        result.map_err(|e| {
            error!("Link failure, session disconnected");
            self.state = ConnectionState::Disconnected;
            Error::Transport(e)
        })
    }

    fn ensure_connected(&self) -> Result<(), Error<L::Error>> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    // --- inbound ---

    /// Waits for one inbound message and dispatches it.
    ///
    /// A payload that cannot be decoded is returned as [`Error::Decode`]; the
    /// message is dropped and the session stays usable.
    pub async fn wait_msg(&mut self) -> Result<Routed, Error<L::Error>> {
        self.ensure_connected()?;
        let routed = match self.link.wait_message().await {
            Ok(message) => self.router.dispatch(message.topic, message.payload),
            Err(e) => {
                error!("Link failure, session disconnected");
                self.state = ConnectionState::Disconnected;
                return Err(Error::Transport(e));
            }
        };
        self.deliver(routed).await
    }

    /// Dispatches one inbound message if one is available, without waiting.
    pub async fn check_msg(&mut self) -> Result<Option<Routed>, Error<L::Error>> {
        self.ensure_connected()?;
        let routed = match self.link.check_message().await {
            Ok(Some(message)) => self.router.dispatch(message.topic, message.payload),
            Ok(None) => return Ok(None),
            Err(e) => {
                error!("Link failure, session disconnected");
                self.state = ConnectionState::Disconnected;
                return Err(Error::Transport(e));
            }
        };
        self.deliver(routed).await.map(Some)
    }

    /// Publishes the handler's reply to a server RPC, if it gave one.
    async fn deliver(&mut self, routed: Result<Routed, DecodeError>) -> Result<Routed, Error<L::Error>> {
        let routed = routed?;
        if let Routed::RpcRequest {
            reply: Some(reply), ..
        } = &routed
        {
            self.send_rpc_reply(&reply.request_id, &reply.body, self.options.qos)
                .await?;
        }
        Ok(routed)
    }

    // --- outbound ---

    /// Serializes `data` to JSON and publishes it on `topic`.
    pub async fn publish_data<T: Serialize + ?Sized>(
        &mut self,
        topic: &str,
        data: &T,
        qos: QoS,
    ) -> Result<(), Error<L::Error>> {
        validate_qos(qos)?;
        self.ensure_connected()?;
        let payload = codec::encode(data).map_err(|_| Error::Encode)?;
        trace!("Tx on {}: {} bytes", topic, payload.len());
        let result = self.link.publish(topic, &payload, qos).await;
        self.checked(result)
    }

    /// Publishes one telemetry reading, wrapped into a one-element array.
    pub async fn send_telemetry<T: Serialize>(&mut self, reading: &T, qos: QoS) -> Result<(), Error<L::Error>> {
        self.publish_data(topic::TELEMETRY_TOPIC, &[reading], qos).await
    }

    /// Publishes a sequence of telemetry readings in order.
    pub async fn send_telemetry_batch<T: Serialize>(
        &mut self,
        readings: &[T],
        qos: QoS,
    ) -> Result<(), Error<L::Error>> {
        self.publish_data(topic::TELEMETRY_TOPIC, readings, qos).await
    }

    pub async fn send_attributes<T: Serialize + ?Sized>(
        &mut self,
        attributes: &T,
        qos: QoS,
    ) -> Result<(), Error<L::Error>> {
        self.publish_data(topic::ATTRIBUTES_TOPIC, attributes, qos).await
    }

    /// Asks the platform to let a user claim this device with `secret_key`.
    pub async fn claim(&mut self, secret_key: &str, duration_ms: u32) -> Result<(), Error<L::Error>> {
        let request = ClaimRequest {
            secret_key,
            duration_ms,
        };
        self.publish_data(topic::CLAIM_TOPIC, &request, self.options.qos)
            .await
    }

    /// Requests client-scope and shared attribute values by key.
    ///
    /// Returns `Ok(None)` without publishing when no keys are given at all.
    /// Otherwise `callback` receives the response document once it arrives.
    pub async fn request_attributes<F>(
        &mut self,
        client_keys: &[&str],
        shared_keys: &[&str],
        callback: F,
    ) -> Result<Option<CorrelationId>, Error<L::Error>>
    where
        F: FnOnce(Attributes) + Send + 'static,
    {
        if client_keys.is_empty() && shared_keys.is_empty() {
            debug!("Attribute request without keys, nothing sent");
            return Ok(None);
        }
        self.ensure_connected()?;
        let payload = codec::encode(&AttributeRequest::new(client_keys, shared_keys))
            .map_err(|_| Error::Encode)?;

        let id = self.router.register_attribute_request(callback);
        let result = self.publish_request(topic::attribute_request(id), &payload).await;
        if result.is_err() {
            self.router.cancel_attribute_request(id);
        }
        result.map(|()| Some(id))
    }

    /// Calls `method` on the server. `callback` runs with the call's id and
    /// the response once it arrives.
    pub async fn send_rpc_call<P, F>(
        &mut self,
        method: &str,
        params: &P,
        callback: F,
    ) -> Result<CorrelationId, Error<L::Error>>
    where
        P: Serialize + ?Sized,
        F: FnOnce(CorrelationId, Value) + Send + 'static,
    {
        self.ensure_connected()?;
        let payload = codec::encode(&RpcCall { method, params }).map_err(|_| Error::Encode)?;

        let id = self.router.register_rpc_call(callback);
        let result = self.publish_request(topic::rpc_request(id), &payload).await;
        if result.is_err() {
            self.router.cancel_rpc_call(id);
        }
        result.map(|()| id)
    }

    async fn publish_request(
        &mut self,
        topic: Result<topic::TopicBuf, ConfigError>,
        payload: &[u8],
    ) -> Result<(), Error<L::Error>> {
        let topic = topic?;
        trace!("Tx on {}: {} bytes", topic.as_str(), payload.len());
        let result = self.link.publish(&topic, payload, self.options.qos).await;
        self.checked(result)
    }

    /// Answers the server RPC `request_id`.
    pub async fn send_rpc_reply<R: Serialize + ?Sized>(
        &mut self,
        request_id: &str,
        response: &R,
        qos: QoS,
    ) -> Result<(), Error<L::Error>> {
        let topic = topic::rpc_response(request_id)?;
        self.publish_data(&topic, response, qos).await
    }

    // --- registrations ---

    /// Runs `callback` for every attribute push containing `key`. The key
    /// `"*"` subscribes to all pushes.
    pub fn subscribe_to_attribute<F>(&self, key: &str, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Attributes) + Send + Sync + 'static,
    {
        self.router.subscribe(AttributeFilter::from(key), callback)
    }

    pub fn subscribe_to_all_attributes<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Attributes) + Send + Sync + 'static,
    {
        self.router.subscribe(AttributeFilter::All, callback)
    }

    /// Returns false if `handle` was not subscribed.
    pub fn unsubscribe_from_attribute(&self, handle: SubscriptionHandle) -> bool {
        self.router.unsubscribe(handle)
    }

    pub fn unsubscribe_from_all_attributes(&self) {
        self.router.unsubscribe_all();
    }

    /// Installs the handler for server RPCs, replacing the previous one.
    /// Returns true if a handler was replaced.
    pub fn set_server_side_rpc_request_handler<F>(&self, handler: F) -> bool
    where
        F: Fn(&str, &str, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.router.set_rpc_handler(handler)
    }

    pub fn clear_server_side_rpc_request_handler(&self) -> bool {
        self.router.clear_rpc_handler()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
