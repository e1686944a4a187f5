//! Thorlabs APT controller driver.
//!
//! This crate drives T-Cube, K-Cube and benchtop controllers over the APT
//! host-controller protocol, without the vendor motion-control library:
//!
//! - [`session`]: [`ControllerSession`], one per physical controller
//! - [`discovery`]: port enumeration, probing and hardware identity
//! - [`factory`]: building sessions from TOML config tables
//! - [`port_claims`]: exclusive ownership of a port between probe and session
//!
//! # Usage
//!
//! ```rust,ignore
//! use apt_driver_thorlabs::{ControllerSession, SessionOptions};
//! use apt_protocol::ControllerTopology;
//! use apt_core::ScaleFactors;
//!
//! let mut stage = ControllerSession::open(
//!     "/dev/ttyUSB0",
//!     ControllerTopology::Compact,
//!     ScaleFactors::DDSM100,
//!     SessionOptions::default(),
//! )
//! .await?;
//! stage.initialize(1).await?;
//! stage.enable(1).await?;
//! stage.home(1, true).await?;
//! stage.move_absolute(25.0, 1, true).await?;
//! let position = stage.get_position(1).await?;
//! stage.close().await?;
//! ```

pub mod discovery;
pub mod factory;
pub mod port_claims;
pub mod session;

pub use discovery::{
    discover_on, discover_port, enumerate_candidate_ports, filter_candidates, find_by_serial,
    find_controllers, probe, probe_link, read_hardware_info, read_hardware_info_from,
    DiscoveredController, PortDescriptor, PortOpener, ProbeOutcome, SystemPorts,
    DEFAULT_PORT_MARKER,
};
pub use factory::{ControllerFactory, SessionConfig};
pub use port_claims::{claim_port, PortClaim};
pub use session::{CancelHandle, ControllerSession, SessionOptions, StatusReport};
