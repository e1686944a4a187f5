//! Fixed-layout replies to status requests.
//!
//! Each parser takes the whole reply (header included), checks the header id
//! against the request that was sent, and refuses buffers shorter than the
//! layout. Stray bytes are never read as a valid reply.

use crate::ids;
use crate::message::{Header, HEADER_LEN};
use apt_core::error::{AptError, AptResult};
use bytes::Buf;

/// Reply carrying a channel ident and a 32-bit counter.
///
/// Layout: header (6) + channel (u16) + count (i32) = 12 bytes. Used by both
/// the position counter (0x0412) and the encoder counter (0x040B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterReply {
    /// Channel ident echoed by the controller
    pub channel: u16,
    /// Counter value in device units
    pub count: i32,
}

impl CounterReply {
    /// Total reply size in bytes.
    pub const LEN: usize = 12;

    /// Parse a reply, requiring header id `expected_id`.
    pub fn parse(bytes: &[u8], expected_id: u16) -> AptResult<Self> {
        let mut body = checked_body(bytes, Self::LEN, expected_id)?;
        Ok(Self {
            channel: body.get_u16_le(),
            count: body.get_i32_le(),
        })
    }

    /// Parse a position counter reply (0x0412).
    pub fn parse_position(bytes: &[u8]) -> AptResult<Self> {
        Self::parse(bytes, ids::MOT_GET_POSCOUNTER)
    }

    /// Parse an encoder counter reply (0x040B).
    pub fn parse_encoder(bytes: &[u8]) -> AptResult<Self> {
        Self::parse(bytes, ids::MOT_GET_ENCCOUNTER)
    }
}

/// DC status update (0x0491).
///
/// Layout: header (6) + channel (u16) + position (i32) + velocity (u16)
/// + reserved (u16) + status bits (u32) = 20 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReply {
    /// Channel ident echoed by the controller
    pub channel: u16,
    /// Position in device units
    pub position: i32,
    /// Raw velocity field, scaled by the fixed status divisor
    pub velocity: u16,
    /// Status bit field; not interpreted yet
    pub status_bits: u32,
}

impl StatusReply {
    /// Total reply size in bytes.
    pub const LEN: usize = 20;

    /// Parse a DC status update reply.
    pub fn parse(bytes: &[u8]) -> AptResult<Self> {
        let mut body = checked_body(bytes, Self::LEN, ids::MOT_GET_DCSTATUSUPDATE)?;
        let channel = body.get_u16_le();
        let position = body.get_i32_le();
        let velocity = body.get_u16_le();
        let _reserved = body.get_u16_le();
        let status_bits = body.get_u32_le();
        Ok(Self {
            channel,
            position,
            velocity,
            status_bits,
        })
    }
}

fn checked_body(bytes: &[u8], len: usize, expected_id: u16) -> AptResult<&[u8]> {
    if bytes.len() < len {
        return Err(AptError::Decode {
            expected: len,
            received: bytes.len(),
        });
    }
    Header::parse(bytes)?.expect_id(expected_id)?;
    Ok(&bytes[HEADER_LEN..len])
}
