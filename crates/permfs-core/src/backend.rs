//! Filesystem backend contract consumed by the conformance harness

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::FsResult;
use crate::identity::IdentityContext;
use crate::types::{Metadata, Mode};

/// What a filesystem backend can do beyond plain files and directories
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsCapabilities {
    pub symlinks: bool,
    pub hard_links: bool,
    pub chown: bool,
    pub chroot: bool,
    /// Backed by the host operating system rather than emulated.
    pub real_os: bool,
}

/// Handle to a saved filesystem root, returned by [`FsBackend::save_root`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RootToken(u64);

impl RootToken {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

/// Permission-sensitive filesystem operations.
///
/// Every call runs as the given identity. Failures are reported as
/// [`crate::FsError`] with lowercase syscall-style operation names ("chmod",
/// "mkdir", "rename", ...).
pub trait FsBackend: Send + Sync {
    fn name(&self) -> &str;
    fn capabilities(&self) -> FsCapabilities;

    fn chmod(&self, ctx: &IdentityContext, path: &Path, mode: Mode) -> FsResult<()>;
    /// `None` leaves the id unchanged.
    fn chown(&self, ctx: &IdentityContext, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()>;
    fn lchown(&self, ctx: &IdentityContext, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()>;

    fn mkdir(&self, ctx: &IdentityContext, path: &Path, mode: Mode) -> FsResult<()>;
    fn mkdir_all(&self, ctx: &IdentityContext, path: &Path, mode: Mode) -> FsResult<()>;
    fn remove(&self, ctx: &IdentityContext, path: &Path) -> FsResult<()>;
    /// Succeeds when `path` does not exist.
    fn remove_all(&self, ctx: &IdentityContext, path: &Path) -> FsResult<()>;
    fn rename(&self, ctx: &IdentityContext, old: &Path, new: &Path) -> FsResult<()>;
    fn link(&self, ctx: &IdentityContext, old: &Path, new: &Path) -> FsResult<()>;
    fn symlink(&self, ctx: &IdentityContext, target: &Path, link: &Path) -> FsResult<()>;

    fn chroot(&self, ctx: &IdentityContext, path: &Path) -> FsResult<()>;
    fn chdir(&self, ctx: &IdentityContext, path: &Path) -> FsResult<()>;

    fn stat(&self, ctx: &IdentityContext, path: &Path) -> FsResult<Metadata>;
    fn lstat(&self, ctx: &IdentityContext, path: &Path) -> FsResult<Metadata>;
    fn read_link(&self, ctx: &IdentityContext, path: &Path) -> FsResult<PathBuf>;

    /// Create or truncate a file; `mode` applies only on creation.
    fn write_file(&self, ctx: &IdentityContext, path: &Path, data: &[u8], mode: Mode) -> FsResult<()>;
    fn read_file(&self, ctx: &IdentityContext, path: &Path) -> FsResult<Vec<u8>>;

    /// Hold on to the current root so a later chroot can be undone.
    fn save_root(&self, ctx: &IdentityContext) -> FsResult<RootToken>;
    /// Return to the saved root and release the token.
    fn restore_root(&self, ctx: &IdentityContext, token: RootToken) -> FsResult<()>;
}
