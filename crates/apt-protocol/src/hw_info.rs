//! Hardware identity reply (MGMSG_HW_GET_INFO).
//!
//! Payload layout (84 bytes, little-endian):
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 4 | serial number (u32) |
//! | 4 | 8 | model string |
//! | 12 | 2 | hardware type (u16) |
//! | 14 | 4 | firmware version (u32) |
//! | 18 | 48 | notes string |
//! | 66 | 12 | reserved |
//! | 78 | 2 | hardware version (u16) |
//! | 80 | 2 | modification state (u16) |
//! | 82 | 2 | channel count (u16) |

use apt_core::error::{AptError, AptResult};
use bytes::{Buf, BufMut};
use serde::Serialize;

/// Width of the model string field.
pub const MODEL_LEN: usize = 8;
/// Width of the notes string field.
pub const NOTES_LEN: usize = 48;
/// Reserved bytes between the notes and the hardware version.
const RESERVED_LEN: usize = 12;

/// Identity of a discovered controller. Immutable once read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Unit serial number
    pub serial_number: u32,
    /// Model name, NUL padding stripped (e.g. "KDC101")
    pub model: String,
    /// Hardware type code
    pub hardware_type: u16,
    /// Packed firmware version (minor, interim, major, unused)
    pub firmware_version: u32,
    /// Free-form notes, NUL padding stripped
    pub notes: String,
    /// Hardware revision
    pub hardware_version: u16,
    /// Modification state
    pub mod_state: u16,
    /// Number of channels
    pub channel_count: u16,
}

impl DeviceInfo {
    /// Payload size in bytes.
    pub const PAYLOAD_LEN: usize = 84;

    /// Parse the payload that follows a HW_GET_INFO header.
    pub fn parse(payload: &[u8]) -> AptResult<Self> {
        if payload.len() < Self::PAYLOAD_LEN {
            return Err(AptError::Decode {
                expected: Self::PAYLOAD_LEN,
                received: payload.len(),
            });
        }

        let mut buf = &payload[..Self::PAYLOAD_LEN];
        let serial_number = buf.get_u32_le();
        let model = fixed_string(&buf[..MODEL_LEN]);
        buf.advance(MODEL_LEN);
        let hardware_type = buf.get_u16_le();
        let firmware_version = buf.get_u32_le();
        let notes = fixed_string(&buf[..NOTES_LEN]);
        buf.advance(NOTES_LEN + RESERVED_LEN);
        let hardware_version = buf.get_u16_le();
        let mod_state = buf.get_u16_le();
        let channel_count = buf.get_u16_le();

        Ok(Self {
            serial_number,
            model,
            hardware_type,
            firmware_version,
            notes,
            hardware_version,
            mod_state,
            channel_count,
        })
    }

    /// Serialize back to the 84-byte payload. Strings are NUL padded or truncated.
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::PAYLOAD_LEN);
        out.put_u32_le(self.serial_number);
        put_fixed_string(&mut out, &self.model, MODEL_LEN);
        out.put_u16_le(self.hardware_type);
        out.put_u32_le(self.firmware_version);
        put_fixed_string(&mut out, &self.notes, NOTES_LEN);
        out.put_bytes(0, RESERVED_LEN);
        out.put_u16_le(self.hardware_version);
        out.put_u16_le(self.mod_state);
        out.put_u16_le(self.channel_count);
        out
    }

    /// Firmware version as `major.interim.minor`.
    pub fn firmware_version_string(&self) -> String {
        let [minor, interim, major, _] = self.firmware_version.to_le_bytes();
        format!("{}.{}.{}", major, interim, minor)
    }
}

fn fixed_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

fn put_fixed_string(out: &mut Vec<u8>, value: &str, width: usize) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(width);
    out.put_slice(&bytes[..len]);
    out.put_bytes(0, width - len);
}
