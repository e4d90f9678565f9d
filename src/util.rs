//! # MQTT Serialization Utilities
//!
//! This module provides helper functions for reading and writing MQTT-specific data types
//! from and to byte buffers, such as variable-byte integers and length-prefixed strings.

use crate::error::{CodecError, MqttError, ProtocolError};

/// Reads a variable-byte integer from the buffer, advancing the cursor.
///
/// This is a common encoding scheme in MQTT for packet lengths.
pub fn read_variable_byte_integer(cursor: &mut usize, buf: &[u8]) -> Result<usize, CodecError> {
    let mut multiplier = 1;
    let mut value = 0;
    let mut i = 0;
    loop {
        let encoded_byte = buf
            .get(*cursor + i)
            .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
        value += (encoded_byte & 127) as usize * multiplier;
        if (encoded_byte & 128) == 0 {
            break;
        }
        multiplier *= 128;
        i += 1;
        if i >= 4 {
            return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
        }
    }
    *cursor += i + 1;
    Ok(value)
}

/// Writes a variable-byte integer at the start of `buf`, returning the byte count.
pub fn write_variable_byte_integer_len(buf: &mut [u8], mut val: usize) -> Result<usize, CodecError> {
    let mut i = 0;
    loop {
        let mut encoded_byte = (val % 128) as u8;
        val /= 128;
        if val > 0 {
            encoded_byte |= 128;
        }
        *buf.get_mut(i).ok_or(MqttError::BufferTooSmall)? = encoded_byte;
        i += 1;
        if val == 0 {
            break;
        }
    }
    Ok(i)
}

/// Returns the total length of the first packet in `buf` once its fixed
/// header is complete, or `None` while more bytes are needed.
///
/// The returned length may exceed `buf.len()`; callers keep reading until the
/// whole packet is buffered.
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>, CodecError> {
    let mut multiplier = 1;
    let mut value = 0;
    for i in 0..4 {
        let Some(encoded_byte) = buf.get(1 + i) else {
            return Ok(None);
        };
        value += (encoded_byte & 127) as usize * multiplier;
        if (encoded_byte & 128) == 0 {
            return Ok(Some(1 + i + 1 + value));
        }
        multiplier *= 128;
    }
    Err(MqttError::Protocol(ProtocolError::MalformedPacket))
}

/// Reads a big-endian `u16`, advancing the cursor.
pub fn read_u16(cursor: &mut usize, buf: &[u8]) -> Result<u16, CodecError> {
    let bytes = buf
        .get(*cursor..*cursor + 2)
        .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
    *cursor += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Reads a UTF-8 encoded string (prefixed with a 2-byte length) from the buffer.
pub fn read_utf8_string<'a>(cursor: &mut usize, buf: &'a [u8]) -> Result<&'a str, CodecError> {
    let len = read_u16(cursor, buf)? as usize;
    let s = core::str::from_utf8(
        buf.get(*cursor..*cursor + len)
            .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?,
    )
    .map_err(|_| MqttError::Protocol(ProtocolError::InvalidUtf8String))?;
    *cursor += len;
    Ok(s)
}

/// Writes a single byte, advancing the cursor.
pub fn write_u8(cursor: &mut usize, buf: &mut [u8], val: u8) -> Result<(), CodecError> {
    *buf.get_mut(*cursor).ok_or(MqttError::BufferTooSmall)? = val;
    *cursor += 1;
    Ok(())
}

/// Writes a big-endian `u16`, advancing the cursor.
pub fn write_u16(cursor: &mut usize, buf: &mut [u8], val: u16) -> Result<(), CodecError> {
    write_bytes(cursor, buf, &val.to_be_bytes())
}

/// Copies raw bytes, advancing the cursor.
pub fn write_bytes(cursor: &mut usize, buf: &mut [u8], bytes: &[u8]) -> Result<(), CodecError> {
    buf.get_mut(*cursor..*cursor + bytes.len())
        .ok_or(MqttError::BufferTooSmall)?
        .copy_from_slice(bytes);
    *cursor += bytes.len();
    Ok(())
}

/// Writes a UTF-8 encoded string (prefixed with a 2-byte length), advancing the cursor.
pub fn write_utf8_string(cursor: &mut usize, buf: &mut [u8], s: &str) -> Result<(), CodecError> {
    let len = u16::try_from(s.len())
        .map_err(|_| MqttError::Protocol(ProtocolError::PayloadTooLarge))?;
    write_u16(cursor, buf, len)?;
    write_bytes(cursor, buf, s.as_bytes())
}
