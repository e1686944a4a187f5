//! Serial Link Abstractions for Driver Crates
//!
//! This module provides the byte-stream abstraction every APT session and
//! discovery probe is written against, plus helpers for bounded reads.
//!
//! # Feature Flag
//!
//! Opening real hardware requires the `serial` feature (enabled by default):
//!
//! ```toml
//! [dependencies]
//! apt-core = { path = "../apt-core", features = ["serial"] }
//! ```
//!
//! # Types
//!
//! - [`SerialLink`]: AsyncRead + AsyncWrite plus buffer clearing
//! - [`DynLink`]: Type-erased boxed link
//! - [`SerialSettings`]: Line parameters for the APT protocol (115200 8N1)
//!
//! # Utilities
//!
//! - [`open_serial_async`]: Open a serial port with spawn_blocking
//! - [`read_exact_timeout`]: Read a fixed-size reply within a deadline
//! - [`read_available`]: Collect whatever arrives within a deadline
//!
//! # Example
//!
//! ```rust,ignore
//! use apt_core::serial::{open_serial_async, read_exact_timeout, SerialSettings};
//!
//! let settings = SerialSettings::default();
//! let mut port = open_serial_async("/dev/ttyUSB0", &settings).await?;
//! let header = read_exact_timeout(&mut port, 6, settings.read_timeout).await?;
//! ```

use crate::error::{AptError, AptResult};
use crate::limits::DEFAULT_READ_TIMEOUT;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

// =============================================================================
// Serial Link Trait
// =============================================================================

/// Byte stream to an APT controller.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` that can also
/// discard its pending input/output can carry the protocol. This includes:
/// - `tokio_serial::SerialStream` (real hardware)
/// - the simulated controller in `apt-driver-mock` (testing)
pub trait SerialLink: AsyncRead + AsyncWrite + Unpin + Send {
    /// Discard everything buffered in both directions.
    fn clear_buffers(&mut self) -> std::io::Result<()>;
}

/// Type-erased boxed serial link.
///
/// Use this when the same code path must drive real hardware or a simulator.
pub type DynLink = Box<dyn SerialLink>;

impl SerialLink for DynLink {
    fn clear_buffers(&mut self) -> std::io::Result<()> {
        (**self).clear_buffers()
    }
}

#[cfg(feature = "serial")]
impl SerialLink for tokio_serial::SerialStream {
    fn clear_buffers(&mut self) -> std::io::Result<()> {
        use tokio_serial::SerialPort;

        self.clear(tokio_serial::ClearBuffer::All)
            .map_err(std::io::Error::from)
    }
}

// =============================================================================
// Line Settings
// =============================================================================

/// Fixed APT line parameters: 115200 baud, 8 data bits, no parity, 1 stop bit.
pub const APT_BAUD_RATE: u32 = 115_200;

/// Serial line settings used when opening a controller port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    /// Baud rate (115200 for every APT controller)
    pub baud_rate: u32,
    /// Timeout applied to each individual read
    pub read_timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: APT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl SerialSettings {
    /// Override the per-read timeout.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

// =============================================================================
// Serial Port Utilities
// =============================================================================

/// Open a serial port asynchronously using spawn_blocking.
///
/// The open call is wrapped in `spawn_blocking` so port initialization does not
/// stall the runtime. Settings: 8N1, no flow control, per-read timeout from
/// `settings`.
///
/// # Errors
///
/// Returns [`AptError::PortOpen`] if the port is missing or busy. This is a
/// recoverable error: discovery moves on to the next port.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    settings: &SerialSettings,
) -> AptResult<tokio_serial::SerialStream> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let settings = *settings;

    let opened = spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, settings.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(settings.read_timeout)
            .open_native_async()
    })
    .await
    .map_err(|e| AptError::PortOpen {
        port: port_path.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::Other, e),
    })?;

    let port = opened.map_err(|e| AptError::PortOpen {
        port: port_path.to_string(),
        source: std::io::Error::from(e),
    })?;

    tracing::debug!(
        port = port_path,
        baud = settings.baud_rate,
        timeout_ms = ?settings.read_timeout.as_millis(),
        "Opened APT serial port"
    );
    Ok(port)
}

/// Read exactly `len` bytes, giving up once `timeout` has elapsed.
///
/// # Errors
///
/// Returns [`AptError::Decode`] when fewer than `len` bytes arrived in time, so
/// a partial reply is never mistaken for a complete message.
pub async fn read_exact_timeout<R: AsyncRead + Unpin>(
    port: &mut R,
    len: usize,
    timeout: Duration,
) -> AptResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let filled = fill_until(port, &mut buf, timeout).await?;

    if filled < len {
        return Err(AptError::Decode {
            expected: len,
            received: filled,
        });
    }
    Ok(buf)
}

/// Read up to `max` bytes, returning whatever arrived before `timeout`.
///
/// Mirrors a blocking serial read with a timeout: an empty result means the
/// device stayed silent.
pub async fn read_available<R: AsyncRead + Unpin>(
    port: &mut R,
    max: usize,
    timeout: Duration,
) -> AptResult<Vec<u8>> {
    let mut buf = vec![0u8; max];
    let filled = fill_until(port, &mut buf, timeout).await?;
    buf.truncate(filled);
    Ok(buf)
}

async fn fill_until<R: AsyncRead + Unpin>(
    port: &mut R,
    buf: &mut [u8],
    timeout: Duration,
) -> AptResult<usize> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut filled = 0usize;

    while filled < buf.len() {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, port.read(&mut buf[filled..])).await {
            Ok(Ok(0)) => break, // EOF
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => break,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => break, // Deadline reached
        }
    }

    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_read_exact_timeout_with_duplex() {
        let (mut host, mut device) = tokio::io::duplex(64);
        device.write_all(&[0x12, 0x04, 0x06, 0x00]).await.unwrap();

        let bytes = read_exact_timeout(&mut host, 4, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(bytes, vec![0x12, 0x04, 0x06, 0x00]);
    }

    #[tokio::test]
    async fn test_read_exact_timeout_reports_short_read() {
        let (mut host, mut device) = tokio::io::duplex(64);
        device.write_all(&[0x91, 0x04, 0x0E]).await.unwrap();

        let err = read_exact_timeout(&mut host, 20, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AptError::Decode {
                expected: 20,
                received: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_read_available_silent_port() {
        // Keep the device half alive so the read times out instead of hitting EOF
        let (mut host, _device) = tokio::io::duplex(64);

        let bytes = read_available(&mut host, 90, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_default_settings_match_protocol() {
        let settings = SerialSettings::default();
        assert_eq!(settings.baud_rate, 115_200);
        assert_eq!(settings.read_timeout, Duration::from_millis(100));
    }
}
