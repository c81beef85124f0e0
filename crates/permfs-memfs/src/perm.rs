//! POSIX permission evaluation for emulated nodes

use permfs_core::{IdentityContext, Mode};

use crate::vfs::{Node, NodeData};

pub(crate) const READ: u32 = 0o4;
pub(crate) const WRITE: u32 = 0o2;
pub(crate) const EXEC: u32 = 0o1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Class {
    User,
    Group,
    Other,
}

fn class(node: &Node, ctx: &IdentityContext) -> Class {
    if ctx.uid == node.uid {
        Class::User
    } else if ctx.in_group(node.gid) {
        Class::Group
    } else {
        Class::Other
    }
}

fn class_bits(mode: Mode, class: Class) -> u32 {
    let m = mode.bits();
    match class {
        Class::User => (m >> 6) & 0o7,
        Class::Group => (m >> 3) & 0o7,
        Class::Other => m & 0o7,
    }
}

/// Whether `ctx` holds every access bit in `want` on `node`.
///
/// Only the first matching class counts: an owner denied by the user bits
/// is not rescued by the group or other bits. Admins bypass everything
/// except executing a non-directory with no execute bit at all.
pub(crate) fn permits(ctx: &IdentityContext, node: &Node, want: u32) -> bool {
    if ctx.admin {
        let is_dir = matches!(node.data, NodeData::Directory { .. });
        if want & EXEC != 0 && !is_dir && node.mode.bits() & 0o111 == 0 {
            return false;
        }
        return true;
    }
    class_bits(node.mode, class(node, ctx)) & want == want
}

/// Sticky directories only let the entry owner, the directory owner or an
/// admin remove or rename entries.
pub(crate) fn sticky_blocks(ctx: &IdentityContext, dir: &Node, entry: &Node) -> bool {
    dir.mode.is_sticky() && !ctx.admin && ctx.uid != entry.uid && ctx.uid != dir.uid
}

/// Whether `ctx` may change the mode of `node`.
pub(crate) fn may_chmod(ctx: &IdentityContext, node: &Node) -> bool {
    ctx.admin || ctx.uid == node.uid
}

/// Whether `ctx` may change ownership of `node` to (`uid`, `gid`).
///
/// Owners may "give" a file to themselves and move it to any group they
/// belong to; anything else takes an admin.
pub(crate) fn may_chown(ctx: &IdentityContext, node: &Node, uid: Option<u32>, gid: Option<u32>) -> bool {
    if ctx.admin {
        return true;
    }
    let owner = ctx.uid == node.uid;
    let uid_ok = uid.map_or(true, |u| owner && u == node.uid);
    let gid_ok = gid.map_or(true, |g| owner && (g == node.gid || ctx.in_group(g)));
    uid_ok && gid_ok
}
