//! Error types for the APT motion-control engine.
//!
//! `AptError` consolidates the failure modes of the wire codec, device discovery
//! and controller sessions. Using `thiserror`, each variant carries enough context
//! to be logged directly, and `#[from]` lets serial I/O failures propagate with `?`.
//!
//! ## Error Categories
//!
//! 1. **Configuration** - `Configuration`, `OutOfRange`
//!    - Raised before any byte is written (unknown topology, bad scale factors)
//!    - Permanent: fix the configuration or the requested value
//!
//! 2. **Transport** - `Io`, `PortOpen`, `PortInUse`
//!    - The serial port is missing, busy or failed mid-transfer
//!    - Recoverable: try another port or reconnect
//!
//! 3. **Protocol** - `Decode`, `UnexpectedReply`, `NoConfirmation`, `Cancelled`
//!    - The device answered with too few bytes, the wrong message,
//!      or never confirmed a motion request
//!    - Recoverable: flush buffers, send a keep-alive and retry

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using [`AptError`].
pub type AptResult<T> = std::result::Result<T, AptError>;

/// Primary error type for APT protocol operations.
#[derive(Error, Debug)]
pub enum AptError {
    /// Serial read/write failure on an already open port.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial port could not be opened (missing, busy, permission denied).
    #[error("Failed to open serial port '{port}': {source}")]
    PortOpen {
        /// Port path or name as given by the caller.
        port: String,
        /// Underlying open failure.
        #[source]
        source: std::io::Error,
    },

    /// Another session or discovery probe already holds the port.
    #[error("Serial port '{port}' is already in use by another session")]
    PortInUse {
        /// Port path or name as given by the caller.
        port: String,
    },

    /// Semantic configuration error, e.g. an unknown controller topology.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Fewer bytes arrived than the fixed message layout requires.
    #[error("Decode error: expected {expected} bytes, received {received}")]
    Decode {
        /// Byte count the layout requires.
        expected: usize,
        /// Byte count actually available.
        received: usize,
    },

    /// A reply header carried a different message id than the request implies.
    #[error("Unexpected reply: expected message 0x{expected:04X}, got 0x{actual:04X}")]
    UnexpectedReply {
        /// Message id the caller was waiting for.
        expected: u16,
        /// Message id found in the header.
        actual: u16,
    },

    /// A motion confirmation did not arrive within the configured wait.
    #[error("No confirmation 0x{message_id:04X} received within {waited:?}")]
    NoConfirmation {
        /// Confirmation message id that was awaited.
        message_id: u16,
        /// How long the session waited before giving up.
        waited: Duration,
    },

    /// The wait for a motion confirmation was aborted through a cancel handle.
    #[error("Wait for confirmation 0x{message_id:04X} was cancelled")]
    Cancelled {
        /// Confirmation message id that was awaited.
        message_id: u16,
    },

    /// A physical value does not fit in signed 32-bit device units.
    #[error("{field} value {value} is not representable in device units")]
    OutOfRange {
        /// Which quantity was converted (position, velocity, acceleration).
        field: &'static str,
        /// The physical value supplied.
        value: f64,
    },
}

impl AptError {
    /// Build a configuration error from any message.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether the caller can reasonably retry (another port, another attempt).
    ///
    /// Configuration and range errors are permanent; everything on the wire is not.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Configuration(_) | Self::OutOfRange { .. })
    }
}
