//! Serial port discovery for APT controllers.
//!
//! Discovery lists the serial ports whose USB description carries the APT
//! marker, opens each one in turn, sends an info request to the compact
//! controller address and, when something answers, reads the 84-byte
//! hardware identity. Every port is opened under a [`PortClaim`] and closed
//! again before the next one is tried, so a session can be opened on it
//! right afterwards.
//!
//! Ports that fail to open or answer garbage are logged and skipped; a silent
//! port is reported as [`ProbeOutcome::NoReply`], not as an error.
//!
//! [`PortClaim`]: crate::port_claims::PortClaim

use crate::port_claims::claim_port;
use apt_core::error::{AptError, AptResult};
use apt_core::serial::{
    open_serial_async, read_available, read_exact_timeout, SerialLink, SerialSettings,
};
use apt_protocol::address::{COMPACT_ADDRESS, RACK_DEFAULT_ADDRESS};
use apt_protocol::message::{encode_short, Header, HEADER_LEN, HOST_ADDRESS};
use apt_protocol::{ids, DeviceInfo};
use futures::future::BoxFuture;
use serde::Serialize;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Substring that marks a port description as an APT controller.
pub const DEFAULT_PORT_MARKER: &str = "APT";

/// How many bytes a probe reads back (one full info reply fits).
pub const PROBE_READ_LEN: usize = 90;

// =============================================================================
// Port Enumeration
// =============================================================================

/// A serial port and its human-readable description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortDescriptor {
    /// OS port path (`/dev/ttyUSB0`, `COM14`)
    pub name: String,
    /// USB product and manufacturer strings, or empty
    pub description: String,
}

impl PortDescriptor {
    /// Build a descriptor from its parts.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

impl From<serialport::SerialPortInfo> for PortDescriptor {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let description = match info.port_type {
            serialport::SerialPortType::UsbPort(usb) => [usb.product, usb.manufacturer]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" "),
            _ => String::new(),
        };
        Self {
            name: info.port_name,
            description,
        }
    }
}

/// Keep only ports whose description contains `marker`.
pub fn filter_candidates(
    ports: impl IntoIterator<Item = PortDescriptor>,
    marker: &str,
) -> Vec<PortDescriptor> {
    ports
        .into_iter()
        .filter(|port| port.description.contains(marker))
        .collect()
}

/// List system serial ports whose description contains `marker`.
///
/// # Errors
///
/// Returns [`AptError::Io`] if the OS port listing fails.
pub fn enumerate_candidate_ports(marker: &str) -> AptResult<Vec<PortDescriptor>> {
    let ports = serialport::available_ports().map_err(|e| AptError::Io(e.into()))?;
    let total = ports.len();
    let candidates = filter_candidates(ports.into_iter().map(PortDescriptor::from), marker);
    tracing::debug!(total, candidates = candidates.len(), marker, "Enumerated serial ports");
    Ok(candidates)
}

// =============================================================================
// Probing
// =============================================================================

/// Result of probing one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProbeOutcome {
    /// Bytes came back from the compact controller address
    Responded {
        /// Address that answered
        destination: u8,
    },
    /// Nothing arrived within the read timeout
    NoReply,
}

impl ProbeOutcome {
    /// Destination byte for this outcome.
    ///
    /// `NoReply` maps to the rack motherboard address. That value only
    /// distinguishes the two outcomes; no rack address is ever probed.
    pub fn destination(&self) -> u8 {
        match self {
            Self::Responded { destination } => *destination,
            Self::NoReply => RACK_DEFAULT_ADDRESS,
        }
    }

    /// Whether a device answered.
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Responded { .. })
    }
}

/// Probe an open link with an info request to the compact address.
///
/// Any reply bytes count as presence. Buffers are cleared afterwards.
pub async fn probe_link<L: SerialLink>(link: &mut L, read_timeout: Duration) -> AptResult<ProbeOutcome> {
    link.clear_buffers()?;
    let request = encode_short(ids::HW_REQ_INFO, 0, 0, COMPACT_ADDRESS, HOST_ADDRESS);
    link.write_all(&request).await?;
    link.flush().await?;

    let reply = read_available(link, PROBE_READ_LEN, read_timeout).await?;
    link.clear_buffers()?;

    if reply.is_empty() {
        Ok(ProbeOutcome::NoReply)
    } else {
        Ok(ProbeOutcome::Responded {
            destination: COMPACT_ADDRESS,
        })
    }
}

/// Read the hardware identity of the controller at `destination`.
///
/// # Errors
///
/// [`AptError::Decode`] on a short header or payload,
/// [`AptError::UnexpectedReply`] if the header is not HW_GET_INFO.
pub async fn read_hardware_info_from<L: SerialLink>(
    link: &mut L,
    destination: u8,
    read_timeout: Duration,
) -> AptResult<DeviceInfo> {
    let request = encode_short(ids::HW_REQ_INFO, 0, 0, destination, HOST_ADDRESS);
    link.write_all(&request).await?;
    link.flush().await?;

    let header_bytes = read_exact_timeout(link, HEADER_LEN, read_timeout).await?;
    let header = Header::parse(&header_bytes)?;
    header.expect_id(ids::HW_GET_INFO)?;

    let payload = read_exact_timeout(link, header.payload_len(), read_timeout).await?;
    link.clear_buffers()?;
    DeviceInfo::parse(&payload)
}

/// Open `port`, probe it and close it again.
pub async fn probe(port: &str, settings: &SerialSettings) -> AptResult<ProbeOutcome> {
    let _claim = claim_port(port)?;
    let mut link = open_serial_async(port, settings).await?;
    probe_link(&mut link, settings.read_timeout).await
}

/// Open `port`, read the identity at `destination` and close it again.
pub async fn read_hardware_info(
    port: &str,
    destination: u8,
    settings: &SerialSettings,
) -> AptResult<DeviceInfo> {
    let _claim = claim_port(port)?;
    let mut link = open_serial_async(port, settings).await?;
    read_hardware_info_from(&mut link, destination, settings.read_timeout).await
}

// =============================================================================
// Discovery
// =============================================================================

/// A controller found on a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredController {
    /// Where it was found
    pub port: PortDescriptor,
    /// Address that answered the probe
    pub destination: u8,
    /// Hardware identity
    pub info: DeviceInfo,
}

/// Opens links for discovery. The system implementation opens real ports;
/// tests substitute simulated controllers.
pub trait PortOpener: Send + Sync {
    /// Link type produced.
    type Link: SerialLink;

    /// Open the port described by `port`.
    fn open<'a>(&'a self, port: &'a PortDescriptor) -> BoxFuture<'a, AptResult<Self::Link>>;

    /// Per-read timeout used while probing.
    fn read_timeout(&self) -> Duration;
}

/// Opens real serial ports with the APT line settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts {
    settings: SerialSettings,
}

impl SystemPorts {
    /// Open ports with `settings`.
    pub fn new(settings: SerialSettings) -> Self {
        Self { settings }
    }
}

impl PortOpener for SystemPorts {
    type Link = tokio_serial::SerialStream;

    fn open<'a>(&'a self, port: &'a PortDescriptor) -> BoxFuture<'a, AptResult<Self::Link>> {
        Box::pin(open_serial_async(&port.name, &self.settings))
    }

    fn read_timeout(&self) -> Duration {
        self.settings.read_timeout
    }
}

/// Probe one port and read its identity if something answers.
///
/// Returns `Ok(None)` for a silent port.
pub async fn discover_port<O: PortOpener>(
    opener: &O,
    port: &PortDescriptor,
) -> AptResult<Option<DiscoveredController>> {
    let _claim = claim_port(&port.name)?;
    let mut link = opener.open(port).await?;
    let read_timeout = opener.read_timeout();

    let outcome = probe_link(&mut link, read_timeout).await?;
    let ProbeOutcome::Responded { destination } = outcome else {
        tracing::debug!(port = %port.name, "No APT device answered");
        return Ok(None);
    };

    let info = read_hardware_info_from(&mut link, destination, read_timeout).await?;
    tracing::info!(
        port = %port.name,
        serial_number = info.serial_number,
        model = %info.model,
        channels = info.channel_count,
        "Discovered APT controller"
    );
    Ok(Some(DiscoveredController {
        port: port.clone(),
        destination,
        info,
    }))
}

/// Discover controllers on `ports`, skipping ports that fail.
pub async fn discover_on<O: PortOpener>(
    opener: &O,
    ports: &[PortDescriptor],
) -> Vec<DiscoveredController> {
    let mut found = Vec::new();
    for port in ports {
        match discover_port(opener, port).await {
            Ok(Some(controller)) => found.push(controller),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(port = %port.name, error = %e, "Skipping port during discovery");
            }
        }
    }
    found
}

/// Enumerate candidate ports and discover every controller on them.
pub async fn find_controllers(
    marker: &str,
    settings: &SerialSettings,
) -> AptResult<Vec<DiscoveredController>> {
    let ports = enumerate_candidate_ports(marker)?;
    if ports.is_empty() {
        tracing::warn!(marker, "No candidate APT ports found");
    }
    Ok(discover_on(&SystemPorts::new(*settings), &ports).await)
}

/// Find the controller with `serial_number` among discovered controllers.
pub fn select_by_serial(
    controllers: Vec<DiscoveredController>,
    serial_number: u32,
) -> Option<DiscoveredController> {
    controllers
        .into_iter()
        .find(|c| c.info.serial_number == serial_number)
}

/// Discover controllers and return the one with `serial_number`.
pub async fn find_by_serial(
    serial_number: u32,
    marker: &str,
    settings: &SerialSettings,
) -> AptResult<Option<DiscoveredController>> {
    let controllers = find_controllers(marker, settings).await?;
    Ok(select_by_serial(controllers, serial_number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use apt_driver_mock::{SimConfig, SimulatedController};
    use tracing_test::traced_test;

    struct OneSimPort(SimulatedController);

    impl PortOpener for OneSimPort {
        type Link = SimulatedController;

        fn open<'a>(&'a self, port: &'a PortDescriptor) -> BoxFuture<'a, AptResult<Self::Link>> {
            Box::pin(async move {
                if port.name == "/dev/sim-unit-ok" {
                    Ok(self.0.clone())
                } else {
                    Err(AptError::PortOpen {
                        port: port.name.clone(),
                        source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
                    })
                }
            })
        }

        fn read_timeout(&self) -> Duration {
            Duration::from_millis(20)
        }
    }

    #[test]
    fn test_filter_candidates_by_marker() {
        let ports = vec![
            PortDescriptor::new("/dev/ttyUSB0", "APT DC Motor Controller Thorlabs"),
            PortDescriptor::new("/dev/ttyUSB1", "FT232R USB UART FTDI"),
            PortDescriptor::new("/dev/ttyS0", ""),
            PortDescriptor::new("/dev/ttyUSB2", "Brushless Motor Controller APT"),
        ];

        let names: Vec<_> = filter_candidates(ports, DEFAULT_PORT_MARKER)
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["/dev/ttyUSB0", "/dev/ttyUSB2"]);
    }

    #[test]
    fn test_marker_is_case_sensitive() {
        let ports = vec![PortDescriptor::new("COM3", "apt lookalike")];
        assert!(filter_candidates(ports, DEFAULT_PORT_MARKER).is_empty());
    }

    #[test]
    fn test_probe_outcome_destination() {
        let found = ProbeOutcome::Responded { destination: 0x50 };
        assert!(found.is_present());
        assert_eq!(found.destination(), 0x50);
        assert!(!ProbeOutcome::NoReply.is_present());
        assert_eq!(ProbeOutcome::NoReply.destination(), 0x11);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_unopenable_port_is_logged_and_skipped() {
        let opener = OneSimPort(SimulatedController::new(SimConfig::kdc101(27_123_456)));
        let ports = vec![
            PortDescriptor::new("/dev/sim-unit-gone", "APT DC Motor Controller"),
            PortDescriptor::new("/dev/sim-unit-ok", "APT DC Motor Controller"),
        ];

        let found = discover_on(&opener, &ports).await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].info.serial_number, 27_123_456);
        assert!(logs_contain("Skipping port during discovery"));
        assert!(logs_contain("Discovered APT controller"));
    }
}
