//! Synthetic identity management for permission conformance testing
//!
//! [`IdentitySimulator`] keeps an in-memory user/group database and hands
//! out [`permfs_core::IdentityContext`] values for whichever identity a test
//! wants to act as. [`UnsupportedIdentity`] stands in for systems with no
//! identity management at all.

pub mod simulator;
pub mod unsupported;

pub use simulator::{HomeProvisioner, IdentitySimulator, SimulatorConfig};
pub use unsupported::UnsupportedIdentity;

use permfs_core::{IdentityError, IdentityResult};

/// Longest accepted user or group name.
pub const MAX_NAME_LEN: usize = 32;

/// Check a user or group name: non-empty, at most [`MAX_NAME_LEN`] bytes,
/// ASCII letters, digits, `_`, `-` and `.` only, not starting with `-`
/// and not made of dots alone.
pub fn validate_name(name: &str) -> IdentityResult<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('-')
        && !name.chars().all(|c| c == '.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(IdentityError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_validation() {
        for ok in ["alice", "pfs_owner_12", "svc-web", "a.b"] {
            assert!(validate_name(ok).is_ok(), "{} should be valid", ok);
        }
        let long = "x".repeat(MAX_NAME_LEN + 1);
        for bad in ["", "-x", "..", "has space", "sl/ash", "c:olon", long.as_str()] {
            assert!(validate_name(bad).is_err(), "{:?} should be invalid", bad);
        }
    }
}
