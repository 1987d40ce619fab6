//! Tagged wire messages exchanged between client and server
//!
//! A frame is one tag byte followed by the payload of the message kind the tag
//! names. The tag alone decides how the rest of the frame is decoded; a tag
//! this build does not know is reported as [`Frame::Unknown`] so callers can
//! log and drop it without treating the peer as broken.

use crate::wire::{self, FieldReader};
use crate::ClientSlot;
use bytes::BufMut;
use std::fmt;

pub use crate::wire::DecodeError;

/// Leading tag byte of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    ConnectResponse = 1,
    UpdatePlayer = 2,
    DisconnectPlayer = 3,
}

impl Kind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Kind::ConnectResponse),
            2 => Some(Kind::UpdatePlayer),
            3 => Some(Kind::DisconnectPlayer),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Name used in log lines.
    pub fn name(self) -> &'static str {
        match self {
            Kind::ConnectResponse => "MsgConnectResponse",
            Kind::UpdatePlayer => "MsgUpdatePlayer",
            Kind::DisconnectPlayer => "MsgDisconnectPlayer",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encode/decode capability for one message body
pub trait Payload: Sized {
    const KIND: Kind;

    fn encode_payload(&self, buf: &mut impl BufMut);

    fn decode_payload(buf: &[u8]) -> Result<Self, DecodeError>;

    /// Encodes the tag byte followed by the payload.
    fn to_frame(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(32);
        frame.put_u8(Self::KIND.tag());
        self.encode_payload(&mut frame);
        frame
    }
}

const FIELD_SLOT: u32 = 1;
const FIELD_X: u32 = 2;
const FIELD_Y: u32 = 3;
const FIELD_LEFT: u32 = 4;
const FIELD_RIGHT: u32 = 5;

/// Sent once to a freshly admitted client with its slot and spawn position
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConnectResponse {
    pub slot: i32,
    pub x: f64,
    pub y: f64,
}

/// Position and input state of one player
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UpdatePlayer {
    pub slot: i32,
    pub x: f64,
    pub y: f64,
    pub left_pressed: bool,
    pub right_pressed: bool,
}

/// Tells remaining clients a player left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisconnectPlayer {
    pub slot: i32,
}

impl Payload for ConnectResponse {
    const KIND: Kind = Kind::ConnectResponse;

    fn encode_payload(&self, buf: &mut impl BufMut) {
        wire::put_int32(buf, FIELD_SLOT, self.slot);
        wire::put_double(buf, FIELD_X, self.x);
        wire::put_double(buf, FIELD_Y, self.y);
    }

    fn decode_payload(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = ConnectResponse::default();
        let mut reader = FieldReader::new(buf);
        while let Some((field, wire_type)) = reader.next_field()? {
            match field {
                FIELD_SLOT => msg.slot = reader.read_int32(field, wire_type)?,
                FIELD_X => msg.x = reader.read_double(field, wire_type)?,
                FIELD_Y => msg.y = reader.read_double(field, wire_type)?,
                _ => reader.skip(wire_type)?,
            }
        }
        Ok(msg)
    }
}

impl Payload for UpdatePlayer {
    const KIND: Kind = Kind::UpdatePlayer;

    fn encode_payload(&self, buf: &mut impl BufMut) {
        wire::put_int32(buf, FIELD_SLOT, self.slot);
        wire::put_double(buf, FIELD_X, self.x);
        wire::put_double(buf, FIELD_Y, self.y);
        wire::put_bool(buf, FIELD_LEFT, self.left_pressed);
        wire::put_bool(buf, FIELD_RIGHT, self.right_pressed);
    }

    fn decode_payload(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = UpdatePlayer::default();
        let mut reader = FieldReader::new(buf);
        while let Some((field, wire_type)) = reader.next_field()? {
            match field {
                FIELD_SLOT => msg.slot = reader.read_int32(field, wire_type)?,
                FIELD_X => msg.x = reader.read_double(field, wire_type)?,
                FIELD_Y => msg.y = reader.read_double(field, wire_type)?,
                FIELD_LEFT => msg.left_pressed = reader.read_bool(field, wire_type)?,
                FIELD_RIGHT => msg.right_pressed = reader.read_bool(field, wire_type)?,
                _ => reader.skip(wire_type)?,
            }
        }
        Ok(msg)
    }
}

impl Payload for DisconnectPlayer {
    const KIND: Kind = Kind::DisconnectPlayer;

    fn encode_payload(&self, buf: &mut impl BufMut) {
        wire::put_int32(buf, FIELD_SLOT, self.slot);
    }

    fn decode_payload(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut msg = DisconnectPlayer::default();
        let mut reader = FieldReader::new(buf);
        while let Some((field, wire_type)) = reader.next_field()? {
            match field {
                FIELD_SLOT => msg.slot = reader.read_int32(field, wire_type)?,
                _ => reader.skip(wire_type)?,
            }
        }
        Ok(msg)
    }
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    ConnectResponse(ConnectResponse),
    UpdatePlayer(UpdatePlayer),
    DisconnectPlayer(DisconnectPlayer),
    /// Tag not known to this build; the untouched payload is kept for logging.
    Unknown { tag: u8, payload: Vec<u8> },
}

impl Frame {
    /// Splits off the tag byte and decodes the remainder.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let (&tag, payload) = data.split_first().ok_or(DecodeError::Empty)?;
        let frame = match Kind::from_tag(tag) {
            Some(Kind::ConnectResponse) => {
                Frame::ConnectResponse(ConnectResponse::decode_payload(payload)?)
            }
            Some(Kind::UpdatePlayer) => Frame::UpdatePlayer(UpdatePlayer::decode_payload(payload)?),
            Some(Kind::DisconnectPlayer) => {
                Frame::DisconnectPlayer(DisconnectPlayer::decode_payload(payload)?)
            }
            None => Frame::Unknown {
                tag,
                payload: payload.to_vec(),
            },
        };
        Ok(frame)
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::ConnectResponse(msg) => msg.to_frame(),
            Frame::UpdatePlayer(msg) => msg.to_frame(),
            Frame::DisconnectPlayer(msg) => msg.to_frame(),
            Frame::Unknown { tag, payload } => {
                let mut frame = Vec::with_capacity(payload.len() + 1);
                frame.push(*tag);
                frame.extend_from_slice(payload);
                frame
            }
        }
    }

    pub fn kind(&self) -> Option<Kind> {
        match self {
            Frame::ConnectResponse(_) => Some(Kind::ConnectResponse),
            Frame::UpdatePlayer(_) => Some(Kind::UpdatePlayer),
            Frame::DisconnectPlayer(_) => Some(Kind::DisconnectPlayer),
            Frame::Unknown { .. } => None,
        }
    }

    /// Log label, `MsgUnknown` for unrecognized tags.
    pub fn kind_name(&self) -> &'static str {
        self.kind().map_or("MsgUnknown", Kind::name)
    }
}

/// Converts a wire slot into a [`ClientSlot`], rejecting anything outside [0, 256).
pub fn slot_from_wire(slot: i32) -> Result<ClientSlot, DecodeError> {
    u8::try_from(slot)
        .map(ClientSlot)
        .map_err(|_| DecodeError::SlotOutOfRange(slot))
}
