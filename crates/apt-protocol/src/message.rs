//! Message encoding and decoding.
//!
//! The codec performs no I/O. Encoders are total; decoders take exactly the
//! documented number of bytes and the caller reads any payload separately.
//!
//! Header layout (little-endian):
//! - ID (2 bytes): message id
//! - PARAM1/PARAM2 (1 byte each): short-message parameters, or a u16 payload
//!   length for long messages
//! - DEST (1 byte): destination address, top bit set when a payload follows
//! - SOURCE (1 byte): sender address

use apt_core::error::{AptError, AptResult};
use bytes::{Buf, BufMut};

/// Size of every message header in bytes.
pub const HEADER_LEN: usize = 6;

/// Address of the host PC on the APT bus.
pub const HOST_ADDRESS: u8 = 0x01;

/// Destination bit flagging a long (data-carrying) message.
pub const LONG_FLAG: u8 = 0x80;

/// Encode a 6-byte short message with no payload.
pub fn encode_short(
    message_id: u16,
    param1: u8,
    param2: u8,
    destination: u8,
    source: u8,
) -> [u8; HEADER_LEN] {
    let mut out = [0u8; HEADER_LEN];
    let mut buf = &mut out[..];
    buf.put_u16_le(message_id);
    buf.put_u8(param1);
    buf.put_u8(param2);
    buf.put_u8(destination);
    buf.put_u8(source);
    out
}

/// Encode a long message: header with payload length, flagged destination, payload.
///
/// `payload` must be shorter than 64 KiB; every APT payload is well below that.
pub fn encode_long(message_id: u16, destination: u8, source: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= usize::from(u16::MAX));

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.put_u16_le(message_id);
    out.put_u16_le(payload.len() as u16);
    out.put_u8(destination | LONG_FLAG);
    out.put_u8(source);
    out.put_slice(payload);
    out
}

/// Decode a 6-byte header.
///
/// For a long reply, [`Header::payload_len`] tells the caller how many more
/// bytes to read.
pub fn decode_header(bytes: &[u8; HEADER_LEN]) -> Header {
    let mut buf = &bytes[..];
    Header {
        message_id: buf.get_u16_le(),
        param1: buf.get_u8(),
        param2: buf.get_u8(),
        destination: buf.get_u8(),
        source: buf.get_u8(),
    }
}

/// Payload of MGMSG_MOT_MOVE_ABSOLUTE: channel ident (u16) and target (i32).
pub fn move_absolute_payload(channel: u16, position: i32) -> [u8; 6] {
    let mut out = [0u8; 6];
    let mut buf = &mut out[..];
    buf.put_u16_le(channel);
    buf.put_i32_le(position);
    out
}

// =============================================================================
// Header
// =============================================================================

/// A decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message id
    pub message_id: u16,
    /// First parameter byte (low byte of the payload length for long messages)
    pub param1: u8,
    /// Second parameter byte (high byte of the payload length for long messages)
    pub param2: u8,
    /// Raw destination byte, including the long-message flag
    pub destination: u8,
    /// Source address
    pub source: u8,
}

impl Header {
    /// Decode a header from the front of `bytes`, checking its length.
    pub fn parse(bytes: &[u8]) -> AptResult<Self> {
        let header: &[u8; HEADER_LEN] = bytes
            .get(..HEADER_LEN)
            .and_then(|slice| slice.try_into().ok())
            .ok_or(AptError::Decode {
                expected: HEADER_LEN,
                received: bytes.len(),
            })?;
        Ok(decode_header(header))
    }

    /// Whether a payload follows this header.
    pub fn is_long(&self) -> bool {
        self.destination & LONG_FLAG != 0
    }

    /// The two parameter bytes read as a little-endian length.
    pub fn data_len(&self) -> usize {
        usize::from(u16::from_le_bytes([self.param1, self.param2]))
    }

    /// Number of payload bytes following the header (zero for short messages).
    pub fn payload_len(&self) -> usize {
        if self.is_long() {
            self.data_len()
        } else {
            0
        }
    }

    /// Destination address with the long-message flag stripped.
    pub fn address(&self) -> u8 {
        self.destination & !LONG_FLAG
    }

    /// Fail unless this header carries `expected`.
    pub fn expect_id(&self, expected: u16) -> AptResult<()> {
        if self.message_id == expected {
            Ok(())
        } else {
            Err(AptError::UnexpectedReply {
                expected,
                actual: self.message_id,
            })
        }
    }
}

// =============================================================================
// Message
// =============================================================================

/// A complete APT message, short or long.
///
/// `destination` is stored without the long-message flag; [`Message::encode`]
/// sets it when a payload is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message id
    pub message_id: u16,
    /// First parameter byte (short messages only)
    pub param1: u8,
    /// Second parameter byte (short messages only)
    pub param2: u8,
    /// Destination address
    pub destination: u8,
    /// Source address
    pub source: u8,
    /// Payload, present only for long messages
    pub payload: Option<Vec<u8>>,
}

impl Message {
    /// Build a short message.
    pub fn short(message_id: u16, param1: u8, param2: u8, destination: u8, source: u8) -> Self {
        Self {
            message_id,
            param1,
            param2,
            destination: destination & !LONG_FLAG,
            source,
            payload: None,
        }
    }

    /// Build a long message carrying `payload`.
    pub fn long(message_id: u16, destination: u8, source: u8, payload: Vec<u8>) -> Self {
        let [param1, param2] = (payload.len() as u16).to_le_bytes();
        Self {
            message_id,
            param1,
            param2,
            destination: destination & !LONG_FLAG,
            source,
            payload: Some(payload),
        }
    }

    /// Whether this message carries a payload.
    pub fn is_long(&self) -> bool {
        self.payload.is_some()
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        match &self.payload {
            Some(payload) => encode_long(self.message_id, self.destination, self.source, payload),
            None => encode_short(
                self.message_id,
                self.param1,
                self.param2,
                self.destination,
                self.source,
            )
            .to_vec(),
        }
    }

    /// Split one complete message off the front of `buf`.
    ///
    /// Returns the message and the number of bytes it occupied, or `None` if
    /// `buf` does not yet hold a whole message.
    pub fn try_parse(buf: &[u8]) -> Option<(Self, usize)> {
        let header = Header::parse(buf).ok()?;
        let total = HEADER_LEN + header.payload_len();
        if buf.len() < total {
            return None;
        }

        let payload = header
            .is_long()
            .then(|| buf[HEADER_LEN..total].to_vec());

        Some((
            Self {
                message_id: header.message_id,
                param1: header.param1,
                param2: header.param2,
                destination: header.address(),
                source: header.source,
                payload,
            },
            total,
        ))
    }
}
