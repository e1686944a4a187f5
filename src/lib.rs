//! # APT Motion
//!
//! Host-side engine for Thorlabs APT motion controllers. The protocol pieces
//! live in the member crates; this crate ties them to configuration, logging
//! and the command-line tools.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-loaded [`AptConfig`](config::AptConfig) with
//!   application, discovery and controller sections.
//! - **`logging`**: `tracing-subscriber` setup (pretty, compact, JSON).
//! - **`connect`**: resolves a controller definition to an open session,
//!   by port or by serial-number discovery, or against the simulator.
//! - **`monitor`**: periodic status polling.
//!
//! The member crates are re-exported for convenience:
//!
//! - [`apt_core`]: errors, serial links, scale factors
//! - [`apt_protocol`]: wire codec and addressing
//! - [`apt_driver_thorlabs`]: sessions, discovery, factory
//! - [`apt_driver_mock`]: simulated controller

pub mod config;
pub mod connect;
pub mod logging;
pub mod monitor;

pub use apt_core;
pub use apt_driver_mock;
pub use apt_driver_thorlabs;
pub use apt_protocol;
