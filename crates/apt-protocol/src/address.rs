//! Controller topology and destination byte resolution.
//!
//! Compact (cube) controllers answer on one fixed address for every channel.
//! Rack (benchtop) controllers expose one address per bay, starting at
//! [`RACK_BASE`] + 1 for the first channel.

use apt_core::error::{AptError, AptResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Destination of every compact controller (generic USB unit).
pub const COMPACT_ADDRESS: u8 = 0x50;

/// Base address of rack bays; bay `n` answers on `RACK_BASE + n`.
pub const RACK_BASE: u8 = 0x20;

/// Rack motherboard address, used for identify and as the discovery
/// "no reply" sentinel.
pub const RACK_DEFAULT_ADDRESS: u8 = 0x11;

/// Channel ident carried by home, move and status requests.
///
/// Compact units have a single channel and each rack bay is its own
/// single-channel unit, so the ident is 0x01 for both topologies; the
/// channel only selects the destination byte.
pub const CHANNEL_1: u8 = 0x01;

/// How a controller maps channels onto destination bytes.
///
/// Fixed at session creation. Parses from `"compact"`/`"cube"` and
/// `"rack"`/`"benchtop"`, case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ControllerTopology {
    /// Single-address controller (KDC101, KBD101, T-Cubes)
    Compact,
    /// Multi-bay controller with per-channel addresses (BSC20x)
    Rack,
}

impl ControllerTopology {
    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Rack => "rack",
        }
    }
}

impl FromStr for ControllerTopology {
    type Err = AptError;

    fn from_str(s: &str) -> AptResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" | "cube" => Ok(Self::Compact),
            "rack" | "benchtop" => Ok(Self::Rack),
            other => Err(AptError::configuration(format!(
                "Invalid controller topology '{}': expected compact/cube or rack/benchtop",
                other
            ))),
        }
    }
}

impl TryFrom<String> for ControllerTopology {
    type Error = AptError;

    fn try_from(value: String) -> AptResult<Self> {
        value.parse()
    }
}

impl From<ControllerTopology> for String {
    fn from(value: ControllerTopology) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ControllerTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination byte for a command aimed at `channel`.
pub fn destination_for(topology: ControllerTopology, channel: u8) -> u8 {
    match topology {
        ControllerTopology::Compact => COMPACT_ADDRESS,
        ControllerTopology::Rack => RACK_BASE.wrapping_add(channel),
    }
}

/// `(param1, destination)` for an identify request.
///
/// Rack controllers blink the bay named in param1 through the motherboard.
pub fn identify_target(topology: ControllerTopology, channel: u8) -> (u8, u8) {
    match topology {
        ControllerTopology::Compact => (CHANNEL_1, COMPACT_ADDRESS),
        ControllerTopology::Rack => (channel, RACK_DEFAULT_ADDRESS),
    }
}
