//! Configuration loading with Figment
//!
//! Configuration is merged from:
//! 1. `config/apt.toml` (or a path given by the caller)
//! 2. Environment variables prefixed with `APT_MOTION_`, nested keys split on `__`
//!
//! Every section has defaults, so a missing file still yields a usable config
//! for one-off commands that name the port on the command line.
//!
//! # Example
//! ```toml
//! [application]
//! name = "Solar tracker"
//! log_level = "info"
//! log_format = "compact"
//!
//! [discovery]
//! port_marker = "APT"
//!
//! [[controllers]]
//! id = "azimuth"
//! serial_number = 27000001
//! topology = "cube"
//! stage = "PRMTZ8"
//! ```

use crate::logging::OutputFormat;
use apt_core::error::{AptError, AptResult};
use apt_core::serial::SerialSettings;
use apt_driver_thorlabs::{SessionConfig, DEFAULT_PORT_MARKER};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/apt.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "APT_MOTION_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AptConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Port discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Controller definitions
    #[serde(default)]
    pub controllers: Vec<ControllerDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

/// How serial ports are searched for controllers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Substring a port description must contain
    #[serde(default = "default_port_marker")]
    pub port_marker: String,
    /// Read timeout while probing, in milliseconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port_marker: default_port_marker(),
            probe_timeout_ms: default_probe_timeout(),
        }
    }
}

impl DiscoveryConfig {
    /// Line settings used while probing.
    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings::default().with_read_timeout(Duration::from_millis(self.probe_timeout_ms))
    }
}

/// One controller in the config file.
///
/// Either `port` or `serial_number` locates the device; when only the
/// serial number is given the port is found by discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerDefinition {
    /// Unique controller identifier
    pub id: String,
    /// Serial number used to find the port when `port` is absent
    #[serde(default)]
    pub serial_number: Option<u32>,
    /// Connection settings
    #[serde(flatten)]
    pub session: SessionConfig,
}

impl ControllerDefinition {
    /// Check this definition without touching hardware.
    pub fn validate(&self) -> AptResult<()> {
        if self.id.trim().is_empty() {
            return Err(AptError::configuration("Controller id must not be empty"));
        }
        if self.session.port.is_none() && self.serial_number.is_none() {
            return Err(AptError::configuration(format!(
                "Controller '{}' needs a 'port' or a 'serial_number'",
                self.id
            )));
        }
        self.session.validate().map_err(|e| match e {
            AptError::Configuration(msg) => {
                AptError::configuration(format!("Controller '{}': {}", self.id, msg))
            }
            other => other,
        })
    }
}

fn default_name() -> String {
    "APT Motion".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port_marker() -> String {
    DEFAULT_PORT_MARKER.to_string()
}

fn default_probe_timeout() -> u64 {
    100
}

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl AptConfig {
    /// Load configuration from `config/apt.toml` and the environment
    ///
    /// Example override: `APT_MOTION_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    /// Provider chain used by [`AptConfig::load_from`].
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AptConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AptResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            return Err(AptError::configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LEVELS.join(", ")
            )));
        }

        if self.discovery.probe_timeout_ms == 0 {
            return Err(AptError::configuration("probe_timeout_ms must be positive"));
        }

        let mut ids = HashSet::new();
        for controller in &self.controllers {
            if !ids.insert(controller.id.as_str()) {
                return Err(AptError::configuration(format!(
                    "Duplicate controller ID: {}",
                    controller.id
                )));
            }
            controller.validate()?;
        }

        Ok(())
    }

    /// Look up a controller by id.
    pub fn controller(&self, id: &str) -> Option<&ControllerDefinition> {
        self.controllers.iter().find(|c| c.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apt_core::units::ScaleFactors;
    use apt_protocol::ControllerTopology;

    fn definition(id: &str) -> ControllerDefinition {
        ControllerDefinition {
            id: id.to_string(),
            serial_number: None,
            session: SessionConfig::for_stage("/dev/ttyUSB0", ControllerTopology::Compact, "DDSM100"),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AptConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.discovery.port_marker, "APT");
        assert_eq!(config.discovery.serial_settings().read_timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let config = AptConfig {
            controllers: vec![definition("x"), definition("x")],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate controller ID: x"));
    }

    #[test]
    fn test_rejects_unlocatable_controller() {
        let mut def = definition("lost");
        def.session.port = None;
        let config = AptConfig {
            controllers: vec![def.clone()],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        def.serial_number = Some(27_000_001);
        let config = AptConfig {
            controllers: vec![def],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_log_level_and_scale() {
        let mut config = AptConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut def = definition("bad-scale");
        def.session.stage = None;
        def.session.scale_factors = Some(ScaleFactors::DDSM100);
        assert!(def.validate().is_ok());
        def.session.stage = Some("NRT150".to_string());
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_lookup_by_id() {
        let config = AptConfig {
            controllers: vec![definition("azimuth"), definition("elevation")],
            ..Default::default()
        };
        assert!(config.controller("elevation").is_some());
        assert!(config.controller("roll").is_none());
    }
}
