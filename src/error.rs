//! # Error Types
//!
//! Errors are split by layer. [`MqttError`] covers the broker session run by
//! [`crate::client::MqttClient`]; [`Error`] is what the device session returns
//! and wraps whatever error its link produces. [`ConfigError`] and
//! [`DecodeError`] are shared by both the session and the routing core.

use core::convert::Infallible;

use crate::packet::QoS;

/// Error type produced by packet encoding and decoding, which never touches
/// a transport.
pub type CodecError = MqttError<Infallible>;

/// Errors of the broker session, generic over the error `T` of the byte
/// transport it runs on.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttError<T> {
    /// The transport failed; the session is dropped.
    Transport(T),
    /// The broker sent something a 3.1.1 client does not expect.
    Protocol(ProtocolError),
    /// CONNACK carried a non-zero return code.
    ConnectionRefused(ConnectReasonCode),
    /// No broker session is open.
    NotConnected,
    /// A packet does not fit into the client's `BUF_SIZE` buffers.
    BufferTooSmall,
    /// The broker did not answer a keep-alive ping in time.
    Timeout,
}

impl<T> MqttError<T> {
    /// Lifts a codec error into an error for a concrete transport.
    pub fn from_codec(err: CodecError) -> Self {
        match err {
            MqttError::Protocol(p) => MqttError::Protocol(p),
            MqttError::ConnectionRefused(c) => MqttError::ConnectionRefused(c),
            MqttError::NotConnected => MqttError::NotConnected,
            MqttError::BufferTooSmall => MqttError::BufferTooSmall,
            MqttError::Timeout => MqttError::Timeout,
            MqttError::Transport(never) => match never {},
        }
    }
}

/// Represents the return codes of a `CONNACK` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReasonCode {
    /// Return code 0.
    Success,
    /// The broker does not speak MQTT 3.1.1.
    UnacceptableProtocolVersion,
    /// The broker rejected the client id.
    IdentifierRejected,
    /// The MQTT service is up but cannot take connections.
    ServerUnavailable,
    /// The username or password is not valid. ThingsBoard answers with this
    /// for an unknown access token.
    BadUserNameOrPassword,
    /// Credentials were accepted but the device may not connect.
    NotAuthorized,
    /// A reserved return code.
    Other(u8),
}

impl From<u8> for ConnectReasonCode {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Success,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => Self::Other(val),
        }
    }
}

/// Ways a broker's byte stream can be wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// A packet type a client never receives.
    InvalidPacketType(u8),
    /// A packet arrived where another one was required.
    InvalidResponse,
    /// The stream reached its end.
    ConnectionClosed,
    /// Lengths or fields that do not add up.
    MalformedPacket,
    /// A payload longer than the remaining length can express.
    PayloadTooLarge,
    /// A topic or string field that is not UTF-8.
    InvalidUtf8String,
    /// The client only speaks QoS 0 and 1.
    UnsupportedQos,
}

/// Invalid settings, rejected before any I/O happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// A QoS level the protocol does not use (only 0 and 1 are accepted).
    UnsupportedQos(QoS),
    /// A raw QoS value outside of 0..=2.
    InvalidQos(u8),
    /// Both an access token and basic credentials were given.
    ConflictingAuth,
    /// Neither an access token nor basic credentials were given.
    MissingAuth,
    /// Basic credentials with neither a client id nor a user name.
    MissingIdentity,
    /// Basic credentials with a password but no user name.
    PasswordWithoutUser,
    /// An outbound topic does not fit into [`crate::topic::MAX_TOPIC_LEN`].
    TopicTooLong,
}

/// An inbound payload on a known topic did not have the expected structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// The payload is not UTF-8 text.
    InvalidUtf8,
    /// The payload is not a JSON document.
    InvalidJson,
    /// The document is valid JSON but not an object.
    UnexpectedShape,
    /// An RPC request without a string `method` member.
    MissingMethod,
}

/// Errors returned by [`crate::session::DeviceSession`].
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<T> {
    /// The call was rejected before any I/O; session state is unchanged.
    Config(ConfigError),
    /// An inbound message could not be decoded and was dropped. The session
    /// remains usable.
    Decode(DecodeError),
    /// An outbound value could not be serialized to JSON.
    Encode,
    /// The session is not connected.
    NotConnected,
    /// The link failed; the error is passed through unchanged.
    Transport(T),
}

impl<T> From<ConfigError> for Error<T> {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl<T> From<DecodeError> for Error<T> {
    fn from(err: DecodeError) -> Self {
        Error::Decode(err)
    }
}
