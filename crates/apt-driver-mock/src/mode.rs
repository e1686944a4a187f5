//! Timing modes for simulated controllers.
//!
//! - **Instant**: confirmations are queued the moment a command arrives
//! - **Realistic**: homing and moves take time proportional to travel

use std::time::Duration;

/// How quickly a simulated controller completes motion.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SimMode {
    /// Zero delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Travel-dependent delays - for status polling and cancellation tests
    Realistic {
        /// Stage speed in device units per second
        device_units_per_sec: f64,
        /// Fixed time a homing sequence takes
        homing_time: Duration,
    },
}

impl SimMode {
    /// Realistic timing with a 20 000 units/s stage and a half-second homing run.
    pub fn realistic() -> Self {
        Self::Realistic {
            device_units_per_sec: 20_000.0,
            homing_time: Duration::from_millis(500),
        }
    }

    /// Time needed to travel `distance` device units.
    pub fn travel_time(&self, distance: i64) -> Duration {
        match *self {
            Self::Instant => Duration::ZERO,
            Self::Realistic {
                device_units_per_sec,
                ..
            } => {
                if device_units_per_sec <= 0.0 {
                    return Duration::ZERO;
                }
                Duration::from_secs_f64(distance.unsigned_abs() as f64 / device_units_per_sec)
            }
        }
    }

    /// Time a homing sequence takes.
    pub fn homing_time(&self) -> Duration {
        match *self {
            Self::Instant => Duration::ZERO,
            Self::Realistic { homing_time, .. } => homing_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instant_has_no_delays() {
        let mode = SimMode::default();
        assert_eq!(mode, SimMode::Instant);
        assert_eq!(mode.travel_time(1_000_000), Duration::ZERO);
        assert_eq!(mode.homing_time(), Duration::ZERO);
    }

    #[test]
    fn test_realistic_travel_is_symmetric() {
        let mode = SimMode::realistic();
        assert_eq!(mode.travel_time(10_000), Duration::from_millis(500));
        assert_eq!(mode.travel_time(-10_000), Duration::from_millis(500));
    }
}
