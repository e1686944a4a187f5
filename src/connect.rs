//! Turning a controller definition into an open session.
//!
//! A definition names its port directly, or only a serial number; in the
//! second case every candidate port is probed and the one whose hardware
//! info carries that serial number is used. The resulting session is
//! type-erased so the CLI drives real ports and the simulator the same way.

use crate::config::{ControllerDefinition, DiscoveryConfig};
use anyhow::{bail, Context, Result};
use apt_core::serial::DynLink;
use apt_driver_mock::{SimConfig, SimMode, SimulatedController};
use apt_driver_thorlabs::{find_by_serial, ControllerSession};
use apt_protocol::ControllerTopology;

/// Serial number reported by the simulated controller in `--mock` mode.
pub const MOCK_SERIAL_NUMBER: u32 = 27_000_001;

/// Find the port for `definition`, probing by serial number if needed.
pub async fn resolve_port(
    definition: &ControllerDefinition,
    discovery: &DiscoveryConfig,
) -> Result<String> {
    if let Some(port) = &definition.session.port {
        return Ok(port.clone());
    }

    let Some(serial_number) = definition.serial_number else {
        bail!("Controller '{}' has neither a port nor a serial number", definition.id);
    };

    tracing::info!(
        controller = %definition.id,
        serial_number,
        marker = %discovery.port_marker,
        "Searching ports for controller"
    );
    let found = find_by_serial(
        serial_number,
        &discovery.port_marker,
        &discovery.serial_settings(),
    )
    .await
    .context("Port discovery failed")?;

    match found {
        Some(controller) => Ok(controller.port.name),
        None => bail!(
            "No APT controller with serial number {} found (controller '{}')",
            serial_number,
            definition.id
        ),
    }
}

/// Open a session on the real port for `definition`.
pub async fn open_session(
    definition: &ControllerDefinition,
    discovery: &DiscoveryConfig,
) -> Result<ControllerSession<DynLink>> {
    definition.validate()?;
    let port = resolve_port(definition, discovery).await?;
    let session = ControllerSession::open(
        &port,
        definition.session.topology,
        definition.session.scale()?,
        definition.session.options(),
    )
    .await
    .with_context(|| format!("Failed to open controller '{}' on {}", definition.id, port))?;
    Ok(session.boxed())
}

/// A simulated controller matching `definition`'s topology.
///
/// The simulator starts enabled and moves at a realistic speed, since each
/// CLI invocation starts from a fresh simulator.
pub fn mock_controller(definition: &ControllerDefinition) -> SimulatedController {
    let config = match definition.session.topology {
        ControllerTopology::Compact => SimConfig::kdc101(MOCK_SERIAL_NUMBER),
        ControllerTopology::Rack => SimConfig::bsc202(MOCK_SERIAL_NUMBER),
    };
    SimulatedController::new(config.enabled().with_mode(SimMode::realistic()))
}

/// A session on `sim` configured like `definition`.
pub fn mock_session(
    definition: &ControllerDefinition,
    sim: &SimulatedController,
) -> Result<ControllerSession<DynLink>> {
    let session = ControllerSession::new(
        sim.clone(),
        definition.session.topology,
        definition.session.scale()?,
        definition.session.options(),
    )
    .with_label(format!("mock:{}", definition.id));
    Ok(session.boxed())
}
