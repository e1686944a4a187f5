//! `apt-core`
//!
//! Shared building blocks for the APT motion-control engine.
//!
//! - [`error`]: the [`AptError`](error::AptError) enum used by every crate in the workspace
//! - [`serial`]: the [`SerialLink`](serial::SerialLink) abstraction and bounded read helpers
//! - [`units`]: linear conversion between device units and physical units
//! - [`limits`]: protocol timing constants

pub mod error;
pub mod limits;
pub mod serial;
pub mod units;

pub use error::{AptError, AptResult};
pub use serial::{DynLink, SerialLink, SerialSettings};
pub use units::ScaleFactors;
