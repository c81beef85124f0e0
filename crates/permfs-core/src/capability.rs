//! Capability set for a filesystem/identity backend pair

use serde::{Deserialize, Serialize};

use crate::backend::FsBackend;
use crate::identity::{IdentityBackend, IdentitySupport};

/// Everything a scenario needs to know about what the backends support.
///
/// Queried once at the start of a scenario and passed around, rather than
/// re-derived at each call site.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub identity: IdentitySupport,
    pub symlinks: bool,
    pub hard_links: bool,
    pub chown: bool,
    pub chroot: bool,
    pub real_os: bool,
}

impl Capabilities {
    pub fn query(fs: &dyn FsBackend, ids: &dyn IdentityBackend) -> Self {
        let fs_caps = fs.capabilities();
        let caps = Self {
            identity: ids.support(),
            symlinks: fs_caps.symlinks,
            hard_links: fs_caps.hard_links,
            chown: fs_caps.chown,
            chroot: fs_caps.chroot,
            real_os: fs_caps.real_os,
        };
        tracing::debug!(backend = fs.name(), ?caps, "queried capabilities");
        caps
    }

    /// Identities can be created, switched and deleted.
    pub fn manages_identities(&self) -> bool {
        self.identity == IdentitySupport::Full
    }
}
