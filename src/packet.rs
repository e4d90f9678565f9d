//! # MQTT Packet Structures and Serialization
//!
//! This module defines the MQTT v3.1.1 control packets a device client exchanges
//! with its broker, and the traits for encoding them into and decoding them from
//! a byte buffer.

use heapless::Vec;

use crate::error::{CodecError, MqttError, ProtocolError};
use crate::util::{self, read_u16, read_utf8_string, write_bytes, write_u8, write_u16, write_utf8_string};

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = u8;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        match val {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(other),
        }
    }
}

/// Maximum number of topic filters carried by one `SUBSCRIBE`.
pub const MAX_SUBSCRIBE_TOPICS: usize = 4;

/// Offset where packet content is staged while encoding: one header byte plus
/// room for the longest (4 byte) remaining length.
const CONTENT_START: usize = 5;

/// A trait for packets that can be encoded into a byte buffer.
pub trait EncodePacket {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError>;
}

/// A trait for packets that can be decoded from a byte buffer.
pub trait DecodePacket<'a>: Sized {
    fn decode(buf: &'a [u8]) -> Result<Self, CodecError>;
}

/// The packets a broker sends to a client.
#[derive(Debug)]
pub enum MqttPacket<'a> {
    ConnAck(ConnAck),
    Publish(Publish<'a>),
    PubAck(PubAck),
    SubAck(SubAck),
    PingResp,
}

/// Decodes one complete packet received from the broker.
pub fn decode(buf: &[u8]) -> Result<Option<MqttPacket<'_>>, CodecError> {
    let Some(first) = buf.first() else {
        return Ok(None);
    };

    let packet_type = first >> 4;
    let packet = match packet_type {
        2 => MqttPacket::ConnAck(ConnAck::decode(buf)?),
        3 => MqttPacket::Publish(Publish::decode(buf)?),
        4 => MqttPacket::PubAck(PubAck::decode(buf)?),
        9 => MqttPacket::SubAck(SubAck::decode(buf)?),
        13 => MqttPacket::PingResp,
        _ => {
            return Err(MqttError::Protocol(ProtocolError::InvalidPacketType(
                packet_type,
            )));
        }
    };

    Ok(Some(packet))
}

/// Checks that `buf` has room for the header, returning the cursor where
/// content staging begins.
fn begin(buf: &[u8]) -> Result<usize, CodecError> {
    if buf.len() < CONTENT_START {
        return Err(MqttError::BufferTooSmall);
    }
    Ok(CONTENT_START)
}

/// Writes the fixed header in front of the content staged at
/// `buf[CONTENT_START..cursor]` and shifts the content down behind it.
fn seal(buf: &mut [u8], header: u8, cursor: usize) -> Result<usize, CodecError> {
    let remaining_len = cursor - CONTENT_START;
    buf[0] = header;
    let len_bytes = util::write_variable_byte_integer_len(&mut buf[1..CONTENT_START], remaining_len)?;
    let header_len = 1 + len_bytes;
    buf.copy_within(CONTENT_START..cursor, header_len);
    Ok(header_len + remaining_len)
}

/// Reads the remaining length of a received packet and returns
/// `(content_start, packet_end)`.
fn content_bounds(buf: &[u8]) -> Result<(usize, usize), CodecError> {
    let mut cursor = 1;
    let remaining_len = util::read_variable_byte_integer(&mut cursor, buf)?;
    let end = cursor + remaining_len;
    if end > buf.len() {
        return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
    }
    Ok((cursor, end))
}

// --- CONNECT Packet ---
#[derive(Debug)]
pub struct Connect<'a> {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: &'a str,
    pub user_name: Option<&'a str>,
    pub password: Option<&'a str>,
}

impl<'a> Connect<'a> {
    pub fn new(client_id: &'a str, keep_alive: u16, clean_session: bool) -> Self {
        Self {
            client_id,
            keep_alive,
            clean_session,
            user_name: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, user_name: Option<&'a str>, password: Option<&'a str>) -> Self {
        self.user_name = user_name;
        self.password = password;
        self
    }
}

impl EncodePacket for Connect<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut cursor = begin(buf)?;
        write_utf8_string(&mut cursor, buf, "MQTT")?;
        // Protocol level 4 is MQTT 3.1.1
        write_u8(&mut cursor, buf, 4)?;

        let mut flags = 0;
        if self.clean_session {
            flags |= 0x02;
        }
        if self.user_name.is_some() {
            flags |= 0x80;
            // A password is only legal together with a user name
            if self.password.is_some() {
                flags |= 0x40;
            }
        }
        write_u8(&mut cursor, buf, flags)?;
        write_u16(&mut cursor, buf, self.keep_alive)?;

        write_utf8_string(&mut cursor, buf, self.client_id)?;
        if let Some(user_name) = self.user_name {
            write_utf8_string(&mut cursor, buf, user_name)?;
            if let Some(password) = self.password {
                write_utf8_string(&mut cursor, buf, password)?;
            }
        }
        seal(buf, 0x10, cursor)
    }
}

// --- CONNACK Packet ---
#[derive(Debug)]
pub struct ConnAck {
    pub session_present: bool,
    pub reason_code: u8,
}

impl DecodePacket<'_> for ConnAck {
    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let (start, end) = content_bounds(buf)?;
        if end - start != 2 {
            return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
        }
        Ok(Self {
            session_present: (buf[start] & 0x01) != 0,
            reason_code: buf[start + 1],
        })
    }
}

// --- PUBLISH Packet ---
#[derive(Debug)]
pub struct Publish<'a> {
    pub topic: &'a str,
    pub qos: QoS,
    pub retain: bool,
    pub payload: &'a [u8],
    pub packet_id: Option<u16>,
}

impl<'a> DecodePacket<'a> for Publish<'a> {
    fn decode(buf: &'a [u8]) -> Result<Self, CodecError> {
        let flags = buf
            .first()
            .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?
            & 0x0F;
        let qos = match (flags >> 1) & 0x03 {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            _ => return Err(MqttError::Protocol(ProtocolError::MalformedPacket)),
        };

        let (mut cursor, end) = content_bounds(buf)?;
        let body = &buf[..end];

        let topic = read_utf8_string(&mut cursor, body)?;

        let packet_id = if qos != QoS::AtMostOnce {
            Some(read_u16(&mut cursor, body)?)
        } else {
            None
        };

        Ok(Publish {
            topic,
            qos,
            retain: (flags & 0x01) != 0,
            payload: &body[cursor..],
            packet_id,
        })
    }
}

impl EncodePacket for Publish<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut cursor = begin(buf)?;

        write_utf8_string(&mut cursor, buf, self.topic)?;

        // Packet ID (only for QoS > 0)
        if self.qos != QoS::AtMostOnce {
            let id = self
                .packet_id
                .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
            write_u16(&mut cursor, buf, id)?;
        }

        write_bytes(&mut cursor, buf, self.payload)?;

        let mut header = 0x30 | ((self.qos as u8) << 1);
        if self.retain {
            header |= 0x01;
        }
        seal(buf, header, cursor)
    }
}

// --- PUBACK Packet ---
#[derive(Debug)]
pub struct PubAck {
    pub packet_id: u16,
}

impl DecodePacket<'_> for PubAck {
    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let (mut cursor, end) = content_bounds(buf)?;
        let packet_id = read_u16(&mut cursor, &buf[..end])?;
        Ok(PubAck { packet_id })
    }
}

impl EncodePacket for PubAck {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut cursor = begin(buf)?;
        write_u16(&mut cursor, buf, self.packet_id)?;
        seal(buf, 0x40, cursor)
    }
}

// --- SUBSCRIBE Packet ---
#[derive(Debug)]
pub struct Subscribe<'a> {
    pub packet_id: u16,
    pub topics: Vec<(&'a str, QoS), MAX_SUBSCRIBE_TOPICS>,
}

impl<'a> Subscribe<'a> {
    /// Creates a new Subscribe packet with a single topic.
    pub fn new(packet_id: u16, topic: &'a str, qos: QoS) -> Self {
        let mut topics = Vec::new();
        let _ = topics.push((topic, qos));
        Self { packet_id, topics }
    }
}

impl EncodePacket for Subscribe<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut cursor = begin(buf)?;

        write_u16(&mut cursor, buf, self.packet_id)?;

        // Topic filters with QoS
        for (topic, qos) in &self.topics {
            write_utf8_string(&mut cursor, buf, topic)?;
            write_u8(&mut cursor, buf, *qos as u8)?;
        }

        // SUBSCRIBE carries the reserved flag bits 0b0010
        seal(buf, 0x82, cursor)
    }
}

// --- SUBACK Packet ---
#[derive(Debug)]
pub struct SubAck {
    pub packet_id: u16,
    pub reason_codes: Vec<u8, MAX_SUBSCRIBE_TOPICS>,
}

impl SubAck {
    /// `true` if any of the requested filters was refused (return code 0x80).
    pub fn has_failure(&self) -> bool {
        self.reason_codes.iter().any(|code| *code == 0x80)
    }
}

impl DecodePacket<'_> for SubAck {
    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let (mut cursor, end) = content_bounds(buf)?;
        let packet_id = read_u16(&mut cursor, &buf[..end])?;

        let mut reason_codes = Vec::new();
        for code in &buf[cursor..end] {
            reason_codes
                .push(*code)
                .map_err(|_| MqttError::Protocol(ProtocolError::MalformedPacket))?;
        }

        Ok(SubAck {
            packet_id,
            reason_codes,
        })
    }
}

// --- PINGREQ Packet ---
#[derive(Debug)]
pub struct PingReq;

impl EncodePacket for PingReq {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut cursor = 0;
        write_bytes(&mut cursor, buf, &[0xC0, 0x00])?;
        Ok(cursor)
    }
}

// --- DISCONNECT Packet ---
#[derive(Debug)]
pub struct Disconnect;

impl EncodePacket for Disconnect {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut cursor = 0;
        write_bytes(&mut cursor, buf, &[0xE0, 0x00])?;
        Ok(cursor)
    }
}
