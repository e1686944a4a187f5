//! Config-driven session construction.
//!
//! # Usage
//!
//! ```rust,ignore
//! use apt_driver_thorlabs::ControllerFactory;
//!
//! let config = toml::toml! {
//!     port = "/dev/ttyUSB0"
//!     topology = "cube"
//!     stage = "DDSM100"
//! };
//! let mut session = ControllerFactory.build(config.into()).await?;
//! session.enable(1).await?;
//! ```

use crate::session::{ControllerSession, SessionOptions};
use apt_core::error::{AptError, AptResult};
use apt_core::units::ScaleFactors;
use apt_protocol::address::ControllerTopology;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// SessionConfig
// =============================================================================

/// Connection settings for one controller.
///
/// Scale factors come either from a named `stage` preset or from an explicit
/// `scale_factors = [position, velocity, acceleration]` array, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Serial port path; when absent the controller is located by serial number
    #[serde(default)]
    pub port: Option<String>,
    /// `compact`/`cube` or `rack`/`benchtop`
    pub topology: ControllerTopology,
    /// Stage preset name (DDSM100, NRT150, PRMTZ8)
    #[serde(default)]
    pub stage: Option<String>,
    /// Explicit scale factors
    #[serde(default)]
    pub scale_factors: Option<ScaleFactors>,
    /// Per-reply read timeout in milliseconds (default: 100)
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
    /// Confirmation wait bound in milliseconds; 0 waits until cancelled (default: 120000)
    #[serde(default)]
    pub confirmation_timeout_ms: Option<u64>,
    /// Enable/disable settle pause in milliseconds (default: 100)
    #[serde(default)]
    pub enable_settle_ms: Option<u64>,
}

impl SessionConfig {
    /// Config for `port` with a named stage preset.
    pub fn for_stage(port: impl Into<String>, topology: ControllerTopology, stage: &str) -> Self {
        Self {
            port: Some(port.into()),
            topology,
            stage: Some(stage.to_string()),
            scale_factors: None,
            read_timeout_ms: None,
            confirmation_timeout_ms: None,
            enable_settle_ms: None,
        }
    }

    /// Resolve the scale factors.
    ///
    /// # Errors
    ///
    /// [`AptError::Configuration`] when neither or both sources are given, or
    /// the preset name is unknown.
    pub fn scale(&self) -> AptResult<ScaleFactors> {
        match (&self.stage, &self.scale_factors) {
            (Some(_), Some(_)) => Err(AptError::configuration(
                "Specify either 'stage' or 'scale_factors', not both",
            )),
            (None, None) => Err(AptError::configuration(
                "Missing scale factors: set 'stage' or 'scale_factors'",
            )),
            (None, Some(factors)) => Ok(*factors),
            (Some(stage), None) => ScaleFactors::preset(stage).ok_or_else(|| {
                AptError::configuration(format!(
                    "Unknown stage '{}': expected DDSM100, NRT150 or PRMTZ8",
                    stage
                ))
            }),
        }
    }

    /// Session options with defaults filled in.
    pub fn options(&self) -> SessionOptions {
        let mut options = SessionOptions::default();
        if let Some(ms) = self.read_timeout_ms {
            options.read_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.confirmation_timeout_ms {
            options.confirmation_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(ms) = self.enable_settle_ms {
            options.enable_settle = Duration::from_millis(ms);
        }
        options
    }

    /// Check everything that can be checked without opening the port.
    pub fn validate(&self) -> AptResult<()> {
        self.scale()?;
        if self.read_timeout_ms == Some(0) {
            return Err(AptError::configuration("read_timeout_ms must be positive"));
        }
        if let Some(port) = &self.port {
            if port.trim().is_empty() {
                return Err(AptError::configuration("port must not be empty"));
            }
        }
        Ok(())
    }
}

// =============================================================================
// ControllerFactory
// =============================================================================

/// Builds sessions on real serial ports from TOML tables.
pub struct ControllerFactory;

impl ControllerFactory {
    /// Driver type key.
    pub fn driver_type(&self) -> &'static str {
        "thorlabs_apt"
    }

    /// Human-readable driver name.
    pub fn name(&self) -> &'static str {
        "Thorlabs APT Motion Controller"
    }

    /// Deserialize and validate a config table.
    pub fn validate(&self, config: &toml::Value) -> AptResult<SessionConfig> {
        let cfg: SessionConfig = config
            .clone()
            .try_into()
            .map_err(|e| AptError::configuration(format!("Invalid APT controller config: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Open the configured port and return a session on it.
    ///
    /// The config must name a `port`; serial-number lookup is done by the caller.
    pub fn build(
        &self,
        config: toml::Value,
    ) -> BoxFuture<'static, AptResult<ControllerSession<tokio_serial::SerialStream>>> {
        let validated = self.validate(&config);
        Box::pin(async move {
            let cfg = validated?;
            let port = cfg.port.clone().ok_or_else(|| {
                AptError::configuration("Controller config has no 'port' to open")
            })?;
            ControllerSession::open(&port, cfg.topology, cfg.scale()?, cfg.options()).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(value: toml::Table) -> toml::Value {
        toml::Value::Table(value)
    }

    #[test]
    fn test_factory_identity() {
        let factory = ControllerFactory;
        assert_eq!(factory.driver_type(), "thorlabs_apt");
        assert_eq!(factory.name(), "Thorlabs APT Motion Controller");
    }

    #[test]
    fn test_validate_stage_preset() {
        let cfg = ControllerFactory
            .validate(&table(toml::toml! {
                port = "/dev/ttyUSB0"
                topology = "cube"
                stage = "DDSM100"
            }))
            .unwrap();
        assert_eq!(cfg.topology, ControllerTopology::Compact);
        assert_eq!(cfg.scale().unwrap(), ScaleFactors::DDSM100);
        assert_eq!(cfg.options(), SessionOptions::default());
    }

    #[test]
    fn test_validate_explicit_factors_and_timeouts() {
        let cfg = ControllerFactory
            .validate(&table(toml::toml! {
                port = "COM14"
                topology = "benchtop"
                scale_factors = [409600.0, 21987328.0, 4506.0]
                confirmation_timeout_ms = 0
                read_timeout_ms = 250
            }))
            .unwrap();
        assert_eq!(cfg.topology, ControllerTopology::Rack);
        assert_eq!(cfg.scale().unwrap(), ScaleFactors::NRT150);
        let options = cfg.options();
        assert_eq!(options.confirmation_timeout, None);
        assert_eq!(options.read_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_rejects_unknown_topology() {
        let err = ControllerFactory
            .validate(&table(toml::toml! {
                port = "/dev/ttyUSB0"
                topology = "tower"
                stage = "DDSM100"
            }))
            .unwrap_err();
        assert!(matches!(err, AptError::Configuration(_)));
        assert!(err.to_string().contains("tower"));
    }

    #[test]
    fn test_rejects_ambiguous_or_missing_scale() {
        let both = table(toml::toml! {
            topology = "cube"
            stage = "DDSM100"
            scale_factors = [2000.0, 13421.77, 1.374]
        });
        assert!(ControllerFactory.validate(&both).is_err());

        let neither = table(toml::toml! {
            topology = "cube"
        });
        assert!(ControllerFactory.validate(&neither).is_err());

        let negative = table(toml::toml! {
            topology = "cube"
            scale_factors = [-1.0, 1.0, 1.0]
        });
        assert!(ControllerFactory.validate(&negative).is_err());
    }

    #[tokio::test]
    async fn test_build_without_port_fails_before_opening() {
        let config = table(toml::toml! {
            topology = "rack"
            stage = "NRT150"
        });
        let err = ControllerFactory.build(config).await.unwrap_err();
        assert!(matches!(err, AptError::Configuration(_)));
    }
}
