//! Protocol timing constants.
//!
//! Centralizes the numbers the APT host-controller protocol depends on, so the
//! session, the discovery probe and the simulator agree on them.

use std::time::Duration;

// =============================================================================
// Liveness
// =============================================================================

/// Maximum number of commands a controller accepts between keep-alives.
///
/// Once this many commands arrive without an acknowledgment, the controller
/// stops emitting unsolicited confirmations (homed, move completed).
pub const KEEP_ALIVE_INTERVAL: u32 = 50;

// =============================================================================
// Timeouts
// =============================================================================

/// Per-read timeout on the serial link (100 ms).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Shortest per-read timeout a session accepts (1 ms).
///
/// A zero window would make confirmation polling spin without yielding to
/// the serial driver.
pub const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Upper bound on a homing or move-completed wait (120 seconds).
///
/// Long-travel stages can take a minute to home at default velocity.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Pause after a channel enable/disable request before flushing (100 ms).
pub const DEFAULT_ENABLE_SETTLE: Duration = Duration::from_millis(100);
