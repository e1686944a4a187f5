//! Exclusive port ownership.
//!
//! An APT connection belongs to exactly one owner at a time: a discovery probe
//! or a controller session. This module keeps a process-wide registry of
//! claimed port paths; a [`PortClaim`] releases its entry when dropped, so a
//! probe that returns early on any path frees the port for the session that
//! follows.

use apt_core::error::{AptError, AptResult};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Module-local registry of claimed ports.
static CLAIMED_PORTS: OnceLock<RwLock<HashSet<String>>> = OnceLock::new();

fn port_registry() -> &'static RwLock<HashSet<String>> {
    CLAIMED_PORTS.get_or_init(|| RwLock::new(HashSet::new()))
}

/// Exclusive hold on a serial port path. Released on drop.
#[derive(Debug)]
pub struct PortClaim {
    port: String,
}

impl PortClaim {
    /// The claimed port path.
    pub fn port(&self) -> &str {
        &self.port
    }
}

impl Drop for PortClaim {
    fn drop(&mut self) {
        let mut registry = port_registry().write();
        if registry.remove(&self.port) {
            tracing::trace!(port = %self.port, "Released APT port claim");
        }
    }
}

/// Claim `port_path` for exclusive use.
///
/// # Errors
///
/// Returns [`AptError::PortInUse`] if a live claim already exists.
pub fn claim_port(port_path: &str) -> AptResult<PortClaim> {
    let mut registry = port_registry().write();
    if !registry.insert(port_path.to_string()) {
        tracing::debug!(port = port_path, "APT port already claimed");
        return Err(AptError::PortInUse {
            port: port_path.to_string(),
        });
    }
    tracing::trace!(port = port_path, "Claimed APT port");
    Ok(PortClaim {
        port: port_path.to_string(),
    })
}

/// Whether a live claim exists for `port_path`.
pub fn is_claimed(port_path: &str) -> bool {
    port_registry().read().contains(port_path)
}

/// Number of currently claimed ports.
pub fn claimed_count() -> usize {
    CLAIMED_PORTS.get().map(|r| r.read().len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_is_rejected() {
        let first = claim_port("/dev/claims-test-a").unwrap();
        assert!(is_claimed("/dev/claims-test-a"));

        let err = claim_port("/dev/claims-test-a").unwrap_err();
        assert!(matches!(err, AptError::PortInUse { .. }));
        assert!(err.is_recoverable());

        drop(first);
        assert!(!is_claimed("/dev/claims-test-a"));
        assert!(claim_port("/dev/claims-test-a").is_ok());
    }

    #[test]
    fn test_claims_are_per_path() {
        let _a = claim_port("/dev/claims-test-b").unwrap();
        let b = claim_port("/dev/claims-test-c").unwrap();
        assert_eq!(b.port(), "/dev/claims-test-c");
        assert!(claimed_count() >= 2);
    }
}
