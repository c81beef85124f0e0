//! Configuration types for the emulated filesystem

use permfs_core::{Mode, Os};
use serde::{Deserialize, Serialize};

/// Main emulated filesystem configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemFsConfig {
    /// Platform whose error codes and messages are reported.
    pub os: Os,
    pub umask: Mode,
    pub root_mode: Mode,
    pub symlinks: bool,
    pub hard_links: bool,
    pub chown: bool,
    pub chroot: bool,
}

impl MemFsConfig {
    /// Configuration emulating `os`, with that platform's feature set.
    pub fn for_os(os: Os) -> Self {
        let unix = os != Os::Windows;
        Self {
            os,
            chown: unix,
            chroot: unix,
            ..Self::default()
        }
    }
}

impl Default for MemFsConfig {
    fn default() -> Self {
        Self {
            os: Os::current(),
            umask: Mode::new(0o022),
            root_mode: Mode::new(0o755),
            symlinks: true,
            hard_links: true,
            chown: true,
            chroot: true,
        }
    }
}
