//! # MQTT Client
//!
//! A compact MQTT v3.1.1 broker session over any [`MqttTransport`]. It
//! connects, subscribes, publishes at QoS 0 and 1, keeps the connection alive
//! with `PINGREQ` and acknowledges inbound QoS 1 messages.
//!
//! Acknowledgements of outbound packets (`PUBACK`, `SUBACK`) are consumed on
//! the receive path rather than awaited, so a publish never blocks on the
//! broker round trip.
//!
//! Received bytes accumulate in a fixed `BUF_SIZE` buffer until a complete
//! packet is available. The buffer state is only updated after a read has
//! completed, so dropping a pending receive future loses nothing as long as
//! the transport's `recv` is itself cancel-safe (as the embassy-net socket
//! is).

use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Instant, Timer};

use crate::auth::AuthConfig;
use crate::error::{ConnectReasonCode, MqttError, ProtocolError};
use crate::link::{DeviceLink, Message};
use crate::packet::{
    self, Connect, DecodePacket, Disconnect, EncodePacket, MqttPacket, PingReq, PubAck, Publish,
    QoS, Subscribe,
};
use crate::transport::MqttTransport;
use crate::util;

/// Keep-alive interval used unless configured otherwise, in seconds.
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 60;

/// Session parameters sent in `CONNECT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MqttOptions<'a> {
    client_id: &'a str,
    user_name: Option<&'a str>,
    password: Option<&'a str>,
    keep_alive: u16,
    clean_session: bool,
}

impl<'a> MqttOptions<'a> {
    pub fn new(client_id: &'a str) -> Self {
        Self {
            client_id,
            user_name: None,
            password: None,
            keep_alive: DEFAULT_KEEP_ALIVE_SECS,
            clean_session: true,
        }
    }

    /// Options carrying the credentials of a validated [`AuthConfig`].
    pub fn from_auth(auth: &'a AuthConfig) -> Self {
        let credentials = auth.credentials();
        Self::new(credentials.client_id).with_credentials(credentials.user_name, credentials.password)
    }

    pub fn with_credentials(mut self, user_name: Option<&'a str>, password: Option<&'a str>) -> Self {
        self.user_name = user_name;
        self.password = password;
        self
    }

    /// Keep-alive interval in seconds; 0 disables keep-alive.
    pub fn with_keep_alive(mut self, secs: u16) -> Self {
        self.keep_alive = secs;
        self
    }

    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    pub fn client_id(&self) -> &'a str {
        self.client_id
    }

    pub fn keep_alive(&self) -> u16 {
        self.keep_alive
    }
}

/// An MQTT client with `BUF_SIZE` byte transmit and receive buffers.
///
/// The largest packet that can be sent or received is `BUF_SIZE` bytes,
/// header included.
pub struct MqttClient<'a, T: MqttTransport, const BUF_SIZE: usize> {
    transport: T,
    options: MqttOptions<'a>,
    tx_buf: [u8; BUF_SIZE],
    rx_buf: [u8; BUF_SIZE],
    /// Bytes currently held in `rx_buf`.
    rx_len: usize,
    /// Length of the packet handed out last; dropped before the next read.
    consumed: usize,
    last_packet_id: u16,
    connected: bool,
    last_tx: Instant,
    ping_sent: Option<Instant>,
}

impl<'a, T: MqttTransport, const BUF_SIZE: usize> MqttClient<'a, T, BUF_SIZE> {
    pub fn new(transport: T, options: MqttOptions<'a>) -> Self {
        Self {
            transport,
            options,
            tx_buf: [0; BUF_SIZE],
            rx_buf: [0; BUF_SIZE],
            rx_len: 0,
            consumed: 0,
            last_packet_id: 0,
            connected: false,
            last_tx: Instant::MIN,
            ping_sent: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn options(&self) -> &MqttOptions<'a> {
        &self.options
    }

    /// Access to the transport, e.g. to re-open a socket before reconnecting.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Sends `CONNECT` and waits for the broker's `CONNACK`.
    pub async fn connect(&mut self) -> Result<(), MqttError<T::Error>> {
        self.connected = false;
        self.rx_len = 0;
        self.consumed = 0;
        self.ping_sent = None;

        let connect = Connect::new(
            self.options.client_id,
            self.options.keep_alive,
            self.options.clean_session,
        )
        .with_credentials(self.options.user_name, self.options.password);
        self.send_packet(&connect).await?;

        let len = self.wait_frame().await?;
        match packet::decode(&self.rx_buf[..len]).map_err(MqttError::from_codec)? {
            Some(MqttPacket::ConnAck(ack)) => {
                let code = ConnectReasonCode::from(ack.reason_code);
                if code != ConnectReasonCode::Success {
                    warn!("Broker refused connection: {:?}", code);
                    return Err(MqttError::ConnectionRefused(code));
                }
            }
            _ => return Err(MqttError::Protocol(ProtocolError::InvalidResponse)),
        }

        self.connected = true;
        debug!("MQTT session established");
        Ok(())
    }

    /// Sends `DISCONNECT`. Does nothing when not connected.
    pub async fn disconnect(&mut self) -> Result<(), MqttError<T::Error>> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.send_packet(&Disconnect).await
    }

    pub async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
    ) -> Result<(), MqttError<T::Error>> {
        self.ensure_connected()?;
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => Some(self.next_packet_id()),
            QoS::ExactlyOnce => return Err(MqttError::Protocol(ProtocolError::UnsupportedQos)),
        };
        let publish = Publish {
            topic,
            qos,
            retain: false,
            payload,
            packet_id,
        };
        self.send_packet(&publish).await
    }

    pub async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), MqttError<T::Error>> {
        self.ensure_connected()?;
        if qos == QoS::ExactlyOnce {
            return Err(MqttError::Protocol(ProtocolError::UnsupportedQos));
        }
        let packet_id = self.next_packet_id();
        self.send_packet(&Subscribe::new(packet_id, topic, qos)).await
    }

    /// Waits for the next inbound `PUBLISH`, handling control packets and
    /// keep-alive along the way.
    pub async fn receive(&mut self) -> Result<Publish<'_>, MqttError<T::Error>> {
        self.ensure_connected()?;
        let len = loop {
            let len = self.wait_frame().await?;
            if self.acknowledge(len).await? {
                break len;
            }
        };
        self.publish_at(len)
    }

    /// Returns an inbound `PUBLISH` if one is available right now.
    pub async fn try_receive(&mut self) -> Result<Option<Publish<'_>>, MqttError<T::Error>> {
        self.ensure_connected()?;
        let len = loop {
            match self.try_frame().await? {
                None => return Ok(None),
                Some(len) => {
                    if self.acknowledge(len).await? {
                        break len;
                    }
                }
            }
        };
        self.publish_at(len).map(Some)
    }

    fn ensure_connected(&self) -> Result<(), MqttError<T::Error>> {
        if self.connected {
            Ok(())
        } else {
            Err(MqttError::NotConnected)
        }
    }

    fn next_packet_id(&mut self) -> u16 {
        self.last_packet_id = self.last_packet_id.wrapping_add(1).max(1);
        self.last_packet_id
    }

    async fn send_packet<P: EncodePacket>(&mut self, packet: &P) -> Result<(), MqttError<T::Error>> {
        let len = packet
            .encode(&mut self.tx_buf)
            .map_err(MqttError::from_codec)?;
        if let Err(e) = self.transport.send(&self.tx_buf[..len]).await {
            error!("MQTT send failed");
            self.connected = false;
            return Err(MqttError::Transport(e));
        }
        self.last_tx = Instant::now();
        Ok(())
    }

    fn publish_at(&self, len: usize) -> Result<Publish<'_>, MqttError<T::Error>> {
        Publish::decode(&self.rx_buf[..len]).map_err(MqttError::from_codec)
    }

    /// Handles a buffered packet. Returns true if it is a `PUBLISH` for the
    /// caller; control packets are consumed here.
    async fn acknowledge(&mut self, len: usize) -> Result<bool, MqttError<T::Error>> {
        let (is_publish, ack_id) = match packet::decode(&self.rx_buf[..len]).map_err(MqttError::from_codec)? {
            Some(MqttPacket::Publish(publish)) => {
                let ack_id = match publish.qos {
                    QoS::AtLeastOnce => publish.packet_id,
                    _ => None,
                };
                (true, ack_id)
            }
            Some(MqttPacket::PingResp) => {
                self.ping_sent = None;
                (false, None)
            }
            Some(MqttPacket::SubAck(ack)) => {
                if ack.has_failure() {
                    warn!("Broker refused subscription {}", ack.packet_id);
                }
                (false, None)
            }
            Some(MqttPacket::PubAck(ack)) => {
                trace!("PUBACK {}", ack.packet_id);
                (false, None)
            }
            Some(MqttPacket::ConnAck(_)) => {
                return Err(MqttError::Protocol(ProtocolError::InvalidResponse));
            }
            None => (false, None),
        };
        if let Some(packet_id) = ack_id {
            self.send_packet(&PubAck { packet_id }).await?;
        }
        Ok(is_publish)
    }

    fn discard_consumed(&mut self) {
        if self.consumed > 0 {
            self.rx_buf.copy_within(self.consumed..self.rx_len, 0);
            self.rx_len -= self.consumed;
            self.consumed = 0;
        }
    }

    /// Length of the first buffered packet, if it is complete.
    fn buffered_frame(&mut self) -> Result<Option<usize>, MqttError<T::Error>> {
        match util::frame_len(&self.rx_buf[..self.rx_len]).map_err(MqttError::from_codec)? {
            Some(len) if len > BUF_SIZE => Err(MqttError::BufferTooSmall),
            Some(len) if len <= self.rx_len => {
                self.consumed = len;
                Ok(Some(len))
            }
            _ => Ok(None),
        }
    }

    async fn wait_frame(&mut self) -> Result<usize, MqttError<T::Error>> {
        self.discard_consumed();
        loop {
            if let Some(len) = self.buffered_frame()? {
                return Ok(len);
            }
            self.fill().await?;
        }
    }

    async fn try_frame(&mut self) -> Result<Option<usize>, MqttError<T::Error>> {
        self.discard_consumed();
        if let Some(len) = self.buffered_frame()? {
            return Ok(Some(len));
        }
        if let Some(deadline) = self.keep_alive_deadline()
            && Instant::now() >= deadline
        {
            self.on_keep_alive_deadline().await?;
        }
        let read = self.transport.recv(&mut self.rx_buf[self.rx_len..]);
        match embassy_futures::poll_once(read) {
            core::task::Poll::Ready(result) => self.received(result)?,
            core::task::Poll::Pending => return Ok(None),
        }
        self.buffered_frame()
    }

    /// Reads once from the transport, sending a ping instead if keep-alive
    /// expires first.
    async fn fill(&mut self) -> Result<(), MqttError<T::Error>> {
        if self.rx_len == BUF_SIZE {
            return Err(MqttError::BufferTooSmall);
        }
        let deadline = self.keep_alive_deadline();
        let read = self.transport.recv(&mut self.rx_buf[self.rx_len..]);
        let result = match deadline {
            None => read.await,
            Some(deadline) => match select(read, Timer::at(deadline)).await {
                Either::First(result) => result,
                Either::Second(()) => return self.on_keep_alive_deadline().await,
            },
        };
        self.received(result)
    }

    fn received(&mut self, result: Result<usize, T::Error>) -> Result<(), MqttError<T::Error>> {
        match result {
            Ok(0) => {
                warn!("Broker closed the connection");
                self.connected = false;
                Err(MqttError::Protocol(ProtocolError::ConnectionClosed))
            }
            Ok(n) => {
                self.rx_len += n;
                Ok(())
            }
            Err(e) => {
                error!("MQTT receive failed");
                self.connected = false;
                Err(MqttError::Transport(e))
            }
        }
    }

    /// When the next ping is due, or when an outstanding ping times out.
    fn keep_alive_deadline(&self) -> Option<Instant> {
        if !self.connected || self.options.keep_alive == 0 {
            return None;
        }
        let interval = Duration::from_secs(u64::from(self.options.keep_alive));
        Some(self.ping_sent.unwrap_or(self.last_tx) + interval)
    }

    async fn on_keep_alive_deadline(&mut self) -> Result<(), MqttError<T::Error>> {
        if self.ping_sent.is_some() {
            warn!("No PINGRESP from broker");
            self.connected = false;
            return Err(MqttError::Timeout);
        }
        trace!("Sending PINGREQ");
        self.send_packet(&PingReq).await?;
        self.ping_sent = Some(self.last_tx);
        Ok(())
    }
}

impl<T: MqttTransport, const BUF_SIZE: usize> DeviceLink for MqttClient<'_, T, BUF_SIZE> {
    type Error = MqttError<T::Error>;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttClient::connect(self).await
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        MqttClient::disconnect(self).await
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), Self::Error> {
        MqttClient::publish(self, topic, payload, qos).await
    }

    async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), Self::Error> {
        MqttClient::subscribe(self, filter, qos).await
    }

    async fn wait_message(&mut self) -> Result<Message<'_>, Self::Error> {
        let publish = self.receive().await?;
        Ok(Message {
            topic: publish.topic,
            payload: publish.payload,
        })
    }

    async fn check_message(&mut self) -> Result<Option<Message<'_>>, Self::Error> {
        Ok(self.try_receive().await?.map(|publish| Message {
            topic: publish.topic,
            payload: publish.payload,
        }))
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
