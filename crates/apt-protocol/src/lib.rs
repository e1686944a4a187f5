//! Thorlabs APT host-controller protocol.
//!
//! Pure, I/O-free pieces of the protocol:
//!
//! - [`message`]: 6-byte headers, short and long message encoding, frame splitting
//! - [`ids`]: the message catalog (request, response and confirmation ids)
//! - [`replies`]: fixed-layout replies (position counter, encoder counter, DC status)
//! - [`hw_info`]: the hardware identity record returned for an info request
//! - [`address`]: controller topology and destination byte resolution
//!
//! # Wire Layout
//!
//! Every message starts with a little-endian 6-byte header:
//!
//! ```text
//! short: | id (u16) | param1 | param2 | dest        | source |
//! long:  | id (u16) | len (u16)       | dest | 0x80 | source | payload[len]
//! ```

pub mod address;
pub mod hw_info;
pub mod ids;
pub mod message;
pub mod replies;

pub use address::{destination_for, identify_target, ControllerTopology};
pub use hw_info::DeviceInfo;
pub use message::{decode_header, encode_long, encode_short, Header, Message, HEADER_LEN};
pub use replies::{CounterReply, StatusReply};
