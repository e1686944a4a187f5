//! Simulated APT Controllers
//!
//! This crate provides in-memory controllers that speak the APT wire protocol,
//! so sessions and discovery can be exercised without hardware. Simulated
//! controllers implement [`SerialLink`](apt_core::SerialLink) and parse every
//! host frame with the real codec.
//!
//! # Available Simulators
//!
//! - [`SimulatedController`] - Compact or rack controller with per-destination channel state
//!
//! # Modes
//!
//! - [`SimMode::Instant`]: confirmations are queued immediately
//! - [`SimMode::Realistic`]: travel time scales with distance, status polling shows motion
//!
//! # Example
//!
//! ```rust,ignore
//! use apt_driver_mock::{SimConfig, SimulatedController};
//!
//! let sim = SimulatedController::new(SimConfig::kdc101(27_000_001).enabled());
//! let probe = sim.clone();
//! // hand `sim` to a session, inspect `probe` afterwards
//! assert_eq!(probe.count_of(apt_protocol::ids::MOT_MOVE_HOME), 0);
//! ```

mod mode;
mod simulator;

pub use mode::SimMode;
pub use simulator::{status_bits, SimConfig, SimulatedController};
