//! Protobuf-compatible field primitives used by the message payloads
//!
//! Every payload field is written as a key varint `(field << 3) | wire_type`
//! followed by its value. Zero values are never written, so a field that is
//! missing on the wire decodes back to zero. Integers and booleans use varints,
//! floating point values use little-endian fixed64.

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Reasons a payload can fail to decode
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame is empty")]
    Empty,
    #[error("payload ended unexpectedly")]
    Truncated,
    #[error("varint is longer than 10 bytes")]
    VarintOverflow,
    #[error("field {field} has unexpected wire type {wire_type}")]
    WireType { field: u32, wire_type: u8 },
    #[error("illegal field key {0}")]
    IllegalField(u64),
    #[error("client slot {0} is out of range")]
    SlotOutOfRange(i32),
}

/// Protobuf wire types the codec understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    Fixed32 = 5,
}

impl WireType {
    fn from_key(key: u64) -> Option<Self> {
        match key & 0x7 {
            0 => Some(WireType::Varint),
            1 => Some(WireType::Fixed64),
            2 => Some(WireType::LengthDelimited),
            5 => Some(WireType::Fixed32),
            _ => None,
        }
    }
}

pub fn put_varint(buf: &mut impl BufMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

pub fn get_varint(buf: &mut &[u8]) -> Result<u64, DecodeError> {
    let mut value = 0u64;
    for shift in (0..70).step_by(7) {
        if !buf.has_remaining() {
            return Err(DecodeError::Truncated);
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7f) << shift;
        if byte < 0x80 {
            return Ok(value);
        }
    }
    Err(DecodeError::VarintOverflow)
}

fn put_key(buf: &mut impl BufMut, field: u32, wire_type: WireType) {
    put_varint(buf, (u64::from(field) << 3) | wire_type as u64);
}

/// Writes an int32 field; negative values are sign extended to 64 bits.
pub fn put_int32(buf: &mut impl BufMut, field: u32, value: i32) {
    if value != 0 {
        put_key(buf, field, WireType::Varint);
        put_varint(buf, i64::from(value) as u64);
    }
}

pub fn put_double(buf: &mut impl BufMut, field: u32, value: f64) {
    if value != 0.0 {
        put_key(buf, field, WireType::Fixed64);
        buf.put_f64_le(value);
    }
}

pub fn put_bool(buf: &mut impl BufMut, field: u32, value: bool) {
    if value {
        put_key(buf, field, WireType::Varint);
        buf.put_u8(1);
    }
}

/// Walks the fields of a single payload
pub struct FieldReader<'a> {
    buf: &'a [u8],
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns the next field number and wire type, or `None` at the end of the payload.
    pub fn next_field(&mut self) -> Result<Option<(u32, WireType)>, DecodeError> {
        if !self.buf.has_remaining() {
            return Ok(None);
        }
        let key = get_varint(&mut self.buf)?;
        let field = key >> 3;
        if field == 0 || field > u64::from(u32::MAX >> 3) {
            return Err(DecodeError::IllegalField(key));
        }
        let wire_type = WireType::from_key(key).ok_or(DecodeError::WireType {
            field: field as u32,
            wire_type: (key & 0x7) as u8,
        })?;
        Ok(Some((field as u32, wire_type)))
    }

    pub fn read_int32(&mut self, field: u32, wire_type: WireType) -> Result<i32, DecodeError> {
        check_wire_type(field, wire_type, WireType::Varint)?;
        // int32 keeps the low 32 bits of the varint
        Ok(get_varint(&mut self.buf)? as i32)
    }

    pub fn read_bool(&mut self, field: u32, wire_type: WireType) -> Result<bool, DecodeError> {
        check_wire_type(field, wire_type, WireType::Varint)?;
        Ok(get_varint(&mut self.buf)? != 0)
    }

    pub fn read_double(&mut self, field: u32, wire_type: WireType) -> Result<f64, DecodeError> {
        check_wire_type(field, wire_type, WireType::Fixed64)?;
        if self.buf.remaining() < 8 {
            return Err(DecodeError::Truncated);
        }
        Ok(self.buf.get_f64_le())
    }

    /// Skips a field this payload does not know about.
    pub fn skip(&mut self, wire_type: WireType) -> Result<(), DecodeError> {
        let len = match wire_type {
            WireType::Varint => {
                get_varint(&mut self.buf)?;
                return Ok(());
            }
            WireType::Fixed64 => 8,
            WireType::Fixed32 => 4,
            WireType::LengthDelimited => get_varint(&mut self.buf)? as usize,
        };
        if self.buf.remaining() < len {
            return Err(DecodeError::Truncated);
        }
        self.buf.advance(len);
        Ok(())
    }
}

fn check_wire_type(field: u32, actual: WireType, expected: WireType) -> Result<(), DecodeError> {
    if actual == expected {
        Ok(())
    } else {
        Err(DecodeError::WireType {
            field,
            wire_type: actual as u8,
        })
    }
}
