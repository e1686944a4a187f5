//! Conversion between device units and physical units.
//!
//! APT controllers count position, velocity and acceleration in integer
//! "device units". Each stage model has three fixed scale factors that turn
//! those counts into millimetres, degrees, mm/s and so on:
//!
//! ```text
//! device = round(real * factor)
//! real   = device / factor
//! ```

use crate::error::{AptError, AptResult};
use serde::{Deserialize, Serialize};

/// Fixed divisor the DC status update uses for its 16-bit velocity field.
///
/// The status reply does not report velocity in the stage's own device units,
/// so `scale.velocity` does not apply to it.
pub const STATUS_VELOCITY_DIVISOR: f64 = 204.8;

/// Per-axis scale factors, ordered `[position, velocity, acceleration]`.
///
/// Deserializes from a three-element array, rejecting non-positive entries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 3]", into = "[f64; 3]")]
pub struct ScaleFactors {
    position: f64,
    velocity: f64,
    acceleration: f64,
}

impl ScaleFactors {
    /// DDSM100 direct-drive stage on a KBD101 controller.
    pub const DDSM100: Self = Self {
        position: 2000.0,
        velocity: 13421.77,
        acceleration: 1.374,
    };

    /// NRT150 long-travel stage on a BSC20x benchtop controller.
    pub const NRT150: Self = Self {
        position: 409_600.0,
        velocity: 21_987_328.0,
        acceleration: 4506.0,
    };

    /// PRM1Z8 rotation mount on a KDC101 controller.
    pub const PRMTZ8: Self = Self {
        position: 1919.641_857_862_339_1,
        velocity: 42941.66,
        acceleration: 14.66,
    };

    /// Create scale factors, rejecting zero, negative or non-finite values.
    pub fn new(position: f64, velocity: f64, acceleration: f64) -> AptResult<Self> {
        let factors = Self {
            position,
            velocity,
            acceleration,
        };
        factors.validate()?;
        Ok(factors)
    }

    /// Look up a named stage preset (case-insensitive).
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "DDSM100" => Some(Self::DDSM100),
            "NRT150" => Some(Self::NRT150),
            "PRMTZ8" | "PRM1Z8" | "PRM1-Z8" => Some(Self::PRMTZ8),
            _ => None,
        }
    }

    /// Check that every factor is a positive finite number.
    pub fn validate(&self) -> AptResult<()> {
        for (name, value) in [
            ("position", self.position),
            ("velocity", self.velocity),
            ("acceleration", self.acceleration),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(AptError::configuration(format!(
                    "Scale factor '{}' must be positive, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Device units per physical position unit.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Device units per physical velocity unit.
    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    /// Device units per physical acceleration unit.
    pub fn acceleration(&self) -> f64 {
        self.acceleration
    }

    /// Convert a physical position to signed device units.
    pub fn position_to_device(&self, real: f64) -> AptResult<i32> {
        to_device("position", real, self.position)
    }

    /// Convert a device-unit position to physical units.
    pub fn position_from_device(&self, device: i32) -> f64 {
        f64::from(device) / self.position
    }

    /// Convert a physical velocity to device units.
    pub fn velocity_to_device(&self, real: f64) -> AptResult<i32> {
        to_device("velocity", real, self.velocity)
    }

    /// Convert a device-unit velocity to physical units.
    pub fn velocity_from_device(&self, device: i32) -> f64 {
        f64::from(device) / self.velocity
    }

    /// Convert a physical acceleration to device units.
    pub fn acceleration_to_device(&self, real: f64) -> AptResult<i32> {
        to_device("acceleration", real, self.acceleration)
    }

    /// Convert a device-unit acceleration to physical units.
    pub fn acceleration_from_device(&self, device: i32) -> f64 {
        f64::from(device) / self.acceleration
    }
}

impl TryFrom<[f64; 3]> for ScaleFactors {
    type Error = AptError;

    fn try_from(value: [f64; 3]) -> AptResult<Self> {
        Self::new(value[0], value[1], value[2])
    }
}

impl From<ScaleFactors> for [f64; 3] {
    fn from(value: ScaleFactors) -> Self {
        [value.position, value.velocity, value.acceleration]
    }
}

/// Convert the raw velocity field of a DC status update to physical units.
pub fn status_velocity(raw: u16) -> f64 {
    f64::from(raw) / STATUS_VELOCITY_DIVISOR
}

fn to_device(field: &'static str, real: f64, factor: f64) -> AptResult<i32> {
    let device = (real * factor).round();
    if !device.is_finite() || device < f64::from(i32::MIN) || device > f64::from(i32::MAX) {
        return Err(AptError::OutOfRange { field, value: real });
    }
    Ok(device as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_rounds_to_nearest_device_unit() {
        let scale = ScaleFactors::DDSM100;
        assert_eq!(scale.position_to_device(25.0).unwrap(), 50_000);
        assert_eq!(scale.position_to_device(0.00074).unwrap(), 1);
        assert_eq!(scale.position_to_device(-1.5).unwrap(), -3000);
    }

    #[test]
    fn test_position_round_trip_within_one_device_unit() {
        let scale = ScaleFactors::PRMTZ8;
        for real in [0.0, 0.1234, 12.5, 179.999, -45.25] {
            let device = scale.position_to_device(real).unwrap();
            let back = scale.position_from_device(device);
            assert!(
                (back - real).abs() <= 1.0 / scale.position(),
                "{real} -> {device} -> {back}"
            );
        }
    }

    #[test]
    fn test_out_of_range_position() {
        let scale = ScaleFactors::NRT150;
        let err = scale.position_to_device(1.0e6).unwrap_err();
        assert!(matches!(err, AptError::OutOfRange { field: "position", .. }));
        assert!(scale.position_to_device(f64::NAN).is_err());
    }

    #[test]
    fn test_rejects_non_positive_factors() {
        assert!(ScaleFactors::new(0.0, 1.0, 1.0).is_err());
        assert!(ScaleFactors::new(1.0, -2.0, 1.0).is_err());
        assert!(ScaleFactors::new(1.0, 1.0, f64::INFINITY).is_err());
        assert!(ScaleFactors::new(2000.0, 13421.77, 1.374).is_ok());
    }

    #[test]
    fn test_presets_by_name() {
        assert_eq!(ScaleFactors::preset("ddsm100"), Some(ScaleFactors::DDSM100));
        assert_eq!(ScaleFactors::preset("PRM1Z8"), Some(ScaleFactors::PRMTZ8));
        assert_eq!(ScaleFactors::preset("unknown"), None);
    }

    #[test]
    fn test_status_velocity_uses_fixed_divisor() {
        assert!((status_velocity(2048) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_velocity_and_acceleration_conversion() {
        let scale = ScaleFactors::DDSM100;
        assert_eq!(scale.velocity_to_device(1.0).unwrap(), 13422);
        assert!((scale.acceleration_from_device(1374) - 1000.0).abs() < 1e-9);
    }
}
