//! Filesystem backend over the host's real filesystem

use std::collections::HashMap;
use std::fs::{self, DirBuilder, File, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{self as unix_fs, DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[cfg(target_os = "linux")]
use nix::unistd::{getgroups, setgroups};
use nix::unistd::{getegid, geteuid, setegid, seteuid, Gid, Uid};
use permfs_core::{
    FsBackend, FsCapabilities, FsError, FsResult, IdentityContext, KnownError, Metadata, Mode,
    NodeKind, Os, RootToken,
};
use tracing::{debug, error};

/// Effective ids are process-wide, so every operation runs under this lock.
static IDENTITY_LOCK: Mutex<()> = Mutex::new(());

fn identity_lock() -> MutexGuard<'static, ()> {
    IDENTITY_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

fn rollback(result: io::Result<()>, what: &str) {
    if let Err(e) = result {
        error!(error = %e, what, "failed to roll back identity switch");
    }
}

#[cfg(target_os = "linux")]
type SavedGroups = Vec<Gid>;
#[cfg(not(target_os = "linux"))]
type SavedGroups = ();

/// Replace the supplementary groups, returning the previous set.
#[cfg(target_os = "linux")]
fn enter_groups(groups: &[u32]) -> io::Result<SavedGroups> {
    let saved = getgroups()?;
    let wanted: Vec<Gid> = groups.iter().copied().map(Gid::from_raw).collect();
    setgroups(&wanted)?;
    Ok(saved)
}

#[cfg(not(target_os = "linux"))]
fn enter_groups(_groups: &[u32]) -> io::Result<SavedGroups> {
    Ok(())
}

#[cfg(target_os = "linux")]
fn leave_groups(saved: &SavedGroups) -> io::Result<()> {
    setgroups(saved).map_err(io::Error::from)
}

#[cfg(not(target_os = "linux"))]
fn leave_groups(_saved: &SavedGroups) -> io::Result<()> {
    Ok(())
}

/// Root and working directory handles kept open by `save_root`
struct SavedRoot {
    root: File,
    cwd: File,
}

/// The host filesystem, driven through std and raw syscalls.
///
/// Operations for an identity other than the process's effective one
/// temporarily switch the effective uid and gid, which requires running as
/// root. Supplementary groups follow the identity on Linux only.
pub struct HostFs {
    saved_roots: Mutex<HashMap<u64, SavedRoot>>,
    next_token: Mutex<u64>,
}

impl Default for HostFs {
    fn default() -> Self {
        Self::new()
    }
}

impl HostFs {
    pub fn new() -> Self {
        Self {
            saved_roots: Mutex::new(HashMap::new()),
            next_token: Mutex::new(1),
        }
    }

    /// Run `f` with the effective ids of `ctx`.
    ///
    /// On Linux the supplementary groups are switched to `ctx.groups` as
    /// well. Elsewhere they stay those of the process, so access granted
    /// only through a supplementary group of `ctx` is not observed.
    fn as_identity<T>(&self, ctx: &IdentityContext, f: impl FnOnce() -> io::Result<T>) -> io::Result<T> {
        let _guard = identity_lock();
        let euid = geteuid();
        let egid = getegid();
        if ctx.uid == euid.as_raw() && ctx.gid == egid.as_raw() {
            return f();
        }
        if !euid.is_root() {
            debug!(user = %ctx.user, uid = ctx.uid, "cannot switch identity without root");
            return Err(io::Error::from_raw_os_error(libc::EPERM));
        }

        let saved_groups = enter_groups(&ctx.groups)?;
        if let Err(e) = setegid(Gid::from_raw(ctx.gid)) {
            rollback(leave_groups(&saved_groups), "supplementary groups");
            return Err(e.into());
        }
        if let Err(e) = seteuid(Uid::from_raw(ctx.uid)) {
            rollback(setegid(egid).map_err(io::Error::from), "effective gid");
            rollback(leave_groups(&saved_groups), "supplementary groups");
            return Err(e.into());
        }
        let outcome = f();
        let restored = seteuid(euid)
            .and_then(|_| setegid(egid))
            .map_err(io::Error::from)
            .and_then(|_| leave_groups(&saved_groups));
        if let Err(e) = restored {
            error!(error = %e, "failed to restore effective identity");
            return Err(e);
        }
        outcome
    }

    fn path_op<T>(
        &self,
        ctx: &IdentityContext,
        op: &str,
        path: &Path,
        f: impl FnOnce() -> io::Result<T>,
    ) -> FsResult<T> {
        self.as_identity(ctx, f)
            .map_err(|e| FsError::from_io(op, path, &e))
    }

    fn link_op(
        &self,
        ctx: &IdentityContext,
        op: &str,
        old: &Path,
        new: &Path,
        f: impl FnOnce() -> io::Result<()>,
    ) -> FsResult<()> {
        self.as_identity(ctx, f)
            .map_err(|e| FsError::from_io_link(op, old, new, &e))
    }
}

fn to_metadata(meta: fs::Metadata) -> Metadata {
    let file_type = meta.file_type();
    let kind = if file_type.is_dir() {
        NodeKind::Directory
    } else if file_type.is_symlink() {
        NodeKind::Symlink
    } else {
        NodeKind::File
    };
    Metadata {
        kind,
        mode: Mode::new(meta.mode()),
        uid: meta.uid(),
        gid: meta.gid(),
        len: meta.len(),
        nlink: meta.nlink() as u32,
    }
}

fn last_os_error(rc: libc::c_int) -> io::Result<()> {
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

impl FsBackend for HostFs {
    fn name(&self) -> &str {
        "host"
    }

    fn capabilities(&self) -> FsCapabilities {
        FsCapabilities {
            symlinks: true,
            hard_links: true,
            chown: true,
            chroot: true,
            real_os: true,
        }
    }

    fn chmod(&self, ctx: &IdentityContext, path: &Path, mode: Mode) -> FsResult<()> {
        self.path_op(ctx, "chmod", path, || {
            fs::set_permissions(path, Permissions::from_mode(mode.bits()))
        })
    }

    fn chown(&self, ctx: &IdentityContext, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        self.path_op(ctx, "chown", path, || unix_fs::chown(path, uid, gid))
    }

    fn lchown(&self, ctx: &IdentityContext, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        self.path_op(ctx, "lchown", path, || unix_fs::lchown(path, uid, gid))
    }

    fn mkdir(&self, ctx: &IdentityContext, path: &Path, mode: Mode) -> FsResult<()> {
        self.path_op(ctx, "mkdir", path, || {
            DirBuilder::new().mode(mode.bits()).create(path)
        })
    }

    fn mkdir_all(&self, ctx: &IdentityContext, path: &Path, mode: Mode) -> FsResult<()> {
        self.path_op(ctx, "mkdir", path, || {
            DirBuilder::new()
                .recursive(true)
                .mode(mode.bits())
                .create(path)
        })
    }

    fn remove(&self, ctx: &IdentityContext, path: &Path) -> FsResult<()> {
        self.path_op(ctx, "remove", path, || {
            if fs::symlink_metadata(path)?.is_dir() {
                fs::remove_dir(path)
            } else {
                fs::remove_file(path)
            }
        })
    }

    fn remove_all(&self, ctx: &IdentityContext, path: &Path) -> FsResult<()> {
        self.path_op(ctx, "unlinkat", path, || {
            let meta = match fs::symlink_metadata(path) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e),
            };
            if meta.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            }
        })
    }

    fn rename(&self, ctx: &IdentityContext, old: &Path, new: &Path) -> FsResult<()> {
        self.link_op(ctx, "rename", old, new, || fs::rename(old, new))
    }

    fn link(&self, ctx: &IdentityContext, old: &Path, new: &Path) -> FsResult<()> {
        self.link_op(ctx, "link", old, new, || fs::hard_link(old, new))
    }

    fn symlink(&self, ctx: &IdentityContext, target: &Path, link: &Path) -> FsResult<()> {
        self.link_op(ctx, "symlink", target, link, || unix_fs::symlink(target, link))
    }

    fn chroot(&self, ctx: &IdentityContext, path: &Path) -> FsResult<()> {
        self.path_op(ctx, "chroot", path, || {
            unix_fs::chroot(path)?;
            std::env::set_current_dir("/")
        })?;
        debug!(path = %path.display(), "host chroot");
        Ok(())
    }

    fn chdir(&self, ctx: &IdentityContext, path: &Path) -> FsResult<()> {
        self.path_op(ctx, "chdir", path, || std::env::set_current_dir(path))
    }

    fn stat(&self, ctx: &IdentityContext, path: &Path) -> FsResult<Metadata> {
        self.path_op(ctx, "stat", path, || fs::metadata(path).map(to_metadata))
    }

    fn lstat(&self, ctx: &IdentityContext, path: &Path) -> FsResult<Metadata> {
        self.path_op(ctx, "lstat", path, || {
            fs::symlink_metadata(path).map(to_metadata)
        })
    }

    fn read_link(&self, ctx: &IdentityContext, path: &Path) -> FsResult<PathBuf> {
        self.path_op(ctx, "readlink", path, || fs::read_link(path))
    }

    fn write_file(&self, ctx: &IdentityContext, path: &Path, data: &[u8], mode: Mode) -> FsResult<()> {
        let mut file = self.path_op(ctx, "open", path, || {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(mode.bits())
                .open(path)
        })?;
        file.write_all(data)
            .map_err(|e| FsError::from_io("write", path, &e))
    }

    fn read_file(&self, ctx: &IdentityContext, path: &Path) -> FsResult<Vec<u8>> {
        self.path_op(ctx, "open", path, || fs::read(path))
    }

    fn save_root(&self, ctx: &IdentityContext) -> FsResult<RootToken> {
        let saved = self.path_op(ctx, "open", Path::new("/"), || {
            Ok(SavedRoot {
                root: File::open("/")?,
                cwd: File::open(".")?,
            })
        })?;

        let mut next = self.next_token.lock().unwrap_or_else(|e| e.into_inner());
        let token = *next;
        *next += 1;
        self.saved_roots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(token, saved);
        Ok(RootToken::new(token))
    }

    fn restore_root(&self, ctx: &IdentityContext, token: RootToken) -> FsResult<()> {
        let saved = self
            .saved_roots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&token.id())
            .ok_or_else(|| {
                FsError::path("chroot", "/", KnownError::InvalidArgument.identity(Os::current()))
            })?;

        self.path_op(ctx, "chroot", Path::new("/"), || {
            // SAFETY: both descriptors stay open for the duration of the calls.
            last_os_error(unsafe { libc::fchdir(saved.root.as_raw_fd()) })?;
            unix_fs::chroot(".")?;
            last_os_error(unsafe { libc::fchdir(saved.cwd.as_raw_fd()) })
        })?;
        debug!(token = token.id(), "restored host root");
        Ok(())
    }
}
