//! Emulated filesystem implementation

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use permfs_core::{
    FsBackend, FsCapabilities, FsError, FsResult, IdentityContext, KnownError, Metadata, Mode,
    NodeKind, RootToken,
};
use tracing::{debug, trace};

use crate::config::MemFsConfig;
use crate::perm::{self, EXEC, READ, WRITE};

/// Symlinks followed during one lookup before giving up.
const MAX_SYMLINK_HOPS: usize = 40;

type OpResult<T> = Result<T, KnownError>;

/// Internal node ID for filesystem nodes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(pub(crate) u64);

/// Filesystem node payloads
#[derive(Clone, Debug)]
pub(crate) enum NodeData {
    File { data: Vec<u8> },
    Directory { children: BTreeMap<String, NodeId> },
    Symlink { target: PathBuf },
}

/// Filesystem node
#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub id: NodeId,
    pub data: NodeData,
    pub mode: Mode,
    pub uid: u32,
    pub gid: u32,
    /// Directory entries pointing at this node (files and symlinks only).
    pub nlink: u32,
}

impl Node {
    fn is_dir(&self) -> bool {
        matches!(self.data, NodeData::Directory { .. })
    }

    fn kind(&self) -> NodeKind {
        match self.data {
            NodeData::File { .. } => NodeKind::File,
            NodeData::Directory { .. } => NodeKind::Directory,
            NodeData::Symlink { .. } => NodeKind::Symlink,
        }
    }
}

/// Root and working directory a chroot can later be undone to
#[derive(Clone, Debug)]
struct SavedRoot {
    root: NodeId,
    cwd: Vec<NodeId>,
}

struct State {
    nodes: HashMap<NodeId, Node>,
    next_node_id: u64,
    /// Current root; differs from the real root after a chroot.
    root: NodeId,
    /// Working directory as the chain of directories from `root`.
    cwd: Vec<NodeId>,
    saved_roots: HashMap<u64, SavedRoot>,
    next_token: u64,
}

impl State {
    fn node(&self, id: NodeId) -> OpResult<&Node> {
        self.nodes.get(&id).ok_or(KnownError::NoSuchFileOrDir)
    }

    fn node_mut(&mut self, id: NodeId) -> OpResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(KnownError::NoSuchFileOrDir)
    }

    fn children_mut(&mut self, dir: NodeId) -> OpResult<&mut BTreeMap<String, NodeId>> {
        match &mut self.node_mut(dir)?.data {
            NodeData::Directory { children } => Ok(children),
            _ => Err(KnownError::NotADirectory),
        }
    }

    fn allocate_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    fn insert_node(&mut self, data: NodeData, mode: Mode, uid: u32, gid: u32) -> NodeId {
        let id = self.allocate_node_id();
        let node = Node {
            id,
            data,
            mode,
            uid,
            gid,
            nlink: 1,
        };
        self.nodes.insert(id, node);
        id
    }

    /// Add `name -> child` to `parent`.
    fn attach(&mut self, parent: NodeId, name: &str, child: NodeId) -> OpResult<()> {
        self.children_mut(parent)?.insert(name.to_string(), child);
        Ok(())
    }

    /// Remove the entry `name` from `parent`, dropping the node once no
    /// entry refers to it.
    fn detach(&mut self, parent: NodeId, name: &str) -> OpResult<NodeId> {
        let child = self
            .children_mut(parent)?
            .remove(name)
            .ok_or(KnownError::NoSuchFileOrDir)?;
        let node = self.node_mut(child)?;
        node.nlink = node.nlink.saturating_sub(1);
        if node.nlink == 0 || node.is_dir() {
            self.nodes.remove(&child);
        }
        Ok(child)
    }

    fn metadata(&self, id: NodeId) -> OpResult<Metadata> {
        let node = self.node(id)?;
        let (len, nlink) = match &node.data {
            NodeData::File { data } => (data.len() as u64, node.nlink),
            NodeData::Symlink { target } => (target.as_os_str().len() as u64, node.nlink),
            NodeData::Directory { children } => {
                let subdirs = children
                    .values()
                    .filter(|c| self.nodes.get(c).map_or(false, Node::is_dir))
                    .count() as u32;
                (0, 2 + subdirs)
            }
        };
        Ok(Metadata {
            kind: node.kind(),
            mode: node.mode,
            uid: node.uid,
            gid: node.gid,
            len,
            nlink,
        })
    }
}

/// Outcome of a path lookup
#[derive(Debug)]
struct Resolved {
    /// Directories from the root down to the parent of the final entry.
    chain: Vec<NodeId>,
    /// Final component name; `None` when the path names the root.
    name: Option<String>,
    /// The final node, or `None` when only the final component is missing.
    node: Option<NodeId>,
}

impl Resolved {
    fn parent(&self) -> OpResult<NodeId> {
        self.chain.last().copied().ok_or(KnownError::InvalidArgument)
    }

    fn existing(&self) -> OpResult<NodeId> {
        self.node.ok_or(KnownError::NoSuchFileOrDir)
    }

    fn entry_name(&self) -> OpResult<&str> {
        self.name.as_deref().ok_or(KnownError::InvalidArgument)
    }
}

fn components(path: &Path) -> VecDeque<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect()
}

/// In-memory filesystem enforcing POSIX ownership and mode semantics.
///
/// Working directory and root are filesystem-wide, like a process's; the
/// caller's identity comes from the context passed to each call.
pub struct MemFs {
    config: MemFsConfig,
    state: Mutex<State>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new(MemFsConfig::default())
    }
}

impl MemFs {
    pub fn new(config: MemFsConfig) -> Self {
        let root_id = NodeId(1);
        let root = Node {
            id: root_id,
            data: NodeData::Directory {
                children: BTreeMap::new(),
            },
            mode: config.root_mode,
            uid: 0,
            gid: 0,
            nlink: 1,
        };
        let mut nodes = HashMap::new();
        nodes.insert(root_id, root);

        let state = State {
            nodes,
            next_node_id: 2,
            root: root_id,
            cwd: vec![root_id],
            saved_roots: HashMap::new(),
            next_token: 1,
        };

        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &MemFsConfig {
        &self.config
    }

    /// Number of live nodes, root included.
    pub fn node_count(&self) -> usize {
        self.state().nodes.len()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn path_error(&self, op: &str, path: &Path, err: KnownError) -> FsError {
        FsError::path(op, path, err.identity(self.config.os))
    }

    fn link_error(&self, op: &str, old: &Path, new: &Path, err: KnownError) -> FsError {
        FsError::link(op, old, new, err.identity(self.config.os))
    }

    /// Run a single-path operation under the state lock.
    fn run<T>(
        &self,
        op: &str,
        path: &Path,
        f: impl FnOnce(&mut State) -> OpResult<T>,
    ) -> FsResult<T> {
        let mut state = self.state();
        f(&mut state).map_err(|e| {
            trace!(op, path = %path.display(), error = ?e, "memfs operation failed");
            self.path_error(op, path, e)
        })
    }

    /// Run a two-path operation under the state lock.
    fn run_link<T>(
        &self,
        op: &str,
        old: &Path,
        new: &Path,
        f: impl FnOnce(&mut State) -> OpResult<T>,
    ) -> FsResult<T> {
        let mut state = self.state();
        f(&mut state).map_err(|e| {
            trace!(op, old = %old.display(), new = %new.display(), error = ?e, "memfs operation failed");
            self.link_error(op, old, new, e)
        })
    }

    /// Resolve a path, checking search permission on every directory
    /// walked through.
    fn resolve(
        &self,
        st: &State,
        ctx: &IdentityContext,
        path: &Path,
        follow_final: bool,
    ) -> OpResult<Resolved> {
        if path.as_os_str().is_empty() {
            return Err(KnownError::NoSuchFileOrDir);
        }

        let mut stack: Vec<NodeId> = if path.has_root() {
            vec![st.root]
        } else {
            st.cwd.clone()
        };
        let mut pending = components(path);
        let mut hops = 0;

        while let Some(comp) = pending.pop_front() {
            let dir_id = stack.last().copied().unwrap_or(st.root);
            let dir = st.node(dir_id)?;
            let children = match &dir.data {
                NodeData::Directory { children } => children,
                _ => return Err(KnownError::NotADirectory),
            };
            if !perm::permits(ctx, dir, EXEC) {
                return Err(KnownError::PermissionDenied);
            }

            if comp == ".." {
                if stack.len() > 1 {
                    stack.pop();
                }
                continue;
            }

            let is_last = pending.is_empty();
            let Some(&child_id) = children.get(&comp) else {
                if is_last {
                    return Ok(Resolved {
                        chain: stack,
                        name: Some(comp),
                        node: None,
                    });
                }
                return Err(KnownError::NoSuchFileOrDir);
            };

            let child = st.node(child_id)?;
            if let NodeData::Symlink { target } = &child.data {
                if !is_last || follow_final {
                    hops += 1;
                    if hops > MAX_SYMLINK_HOPS {
                        return Err(KnownError::TooManyLinks);
                    }
                    if target.has_root() {
                        stack = vec![st.root];
                    }
                    let mut expanded = components(target);
                    expanded.extend(pending.drain(..));
                    pending = expanded;
                    continue;
                }
            }

            if is_last {
                return Ok(Resolved {
                    chain: stack,
                    name: Some(comp),
                    node: Some(child_id),
                });
            }
            stack.push(child_id);
        }

        // The path ended on a directory reached through ".." or a symlink.
        let node = stack.pop().unwrap_or(st.root);
        let name = if stack.is_empty() {
            None
        } else {
            Some(String::new())
        };
        Ok(Resolved {
            chain: stack,
            name,
            node: Some(node),
        })
    }

    fn require_write(&self, st: &State, ctx: &IdentityContext, dir: NodeId) -> OpResult<()> {
        if perm::permits(ctx, st.node(dir)?, WRITE) {
            Ok(())
        } else {
            Err(KnownError::PermissionDenied)
        }
    }

    fn mkdir_locked(&self, st: &mut State, ctx: &IdentityContext, path: &Path, mode: Mode) -> OpResult<()> {
        let r = self.resolve(st, ctx, path, false)?;
        if r.node.is_some() {
            return Err(KnownError::FileExists);
        }
        let parent_id = r.parent()?;
        let name = r.entry_name()?.to_string();
        self.require_write(st, ctx, parent_id)?;

        let parent = st.node(parent_id)?;
        let gid = if parent.mode.bits() & Mode::SETGID != 0 {
            parent.gid
        } else {
            ctx.gid
        };
        let mode = Mode::new(mode.bits() & 0o1777).apply_umask(self.config.umask);
        let dir = st.insert_node(
            NodeData::Directory {
                children: BTreeMap::new(),
            },
            mode,
            ctx.uid,
            gid,
        );
        st.attach(parent_id, &name, dir)?;
        debug!(path = %path.display(), %mode, uid = ctx.uid, "memfs mkdir");
        Ok(())
    }

    fn remove_locked(&self, st: &mut State, ctx: &IdentityContext, path: &Path) -> OpResult<()> {
        let r = self.resolve(st, ctx, path, false)?;
        let node_id = r.existing()?;
        let parent_id = r.parent()?;
        let name = r.entry_name()?.to_string();
        self.require_write(st, ctx, parent_id)?;

        let parent = st.node(parent_id)?;
        let node = st.node(node_id)?;
        if perm::sticky_blocks(ctx, parent, node) {
            return Err(KnownError::OpNotPermitted);
        }
        if let NodeData::Directory { children } = &node.data {
            if !children.is_empty() {
                return Err(KnownError::DirNotEmpty);
            }
        }
        st.detach(parent_id, &name)?;
        Ok(())
    }

    fn remove_all_locked(
        &self,
        st: &mut State,
        ctx: &IdentityContext,
        path: &Path,
    ) -> Result<(), (PathBuf, KnownError)> {
        let fail = |e: KnownError| (path.to_path_buf(), e);
        let r = match self.resolve(st, ctx, path, false) {
            Ok(r) => r,
            Err(KnownError::NoSuchFileOrDir) => return Ok(()),
            Err(e) => return Err(fail(e)),
        };
        let Some(node_id) = r.node else {
            return Ok(());
        };

        let names: Vec<String> = match &st.node(node_id).map_err(fail)?.data {
            NodeData::Directory { children } => {
                if !children.is_empty() && !perm::permits(ctx, st.node(node_id).map_err(fail)?, READ) {
                    return Err(fail(KnownError::PermissionDenied));
                }
                children.keys().cloned().collect()
            }
            _ => Vec::new(),
        };
        for name in names {
            self.remove_all_locked(st, ctx, &path.join(name))?;
        }
        self.remove_locked(st, ctx, path).map_err(fail)
    }

    fn chown_locked(
        &self,
        st: &mut State,
        ctx: &IdentityContext,
        path: &Path,
        uid: Option<u32>,
        gid: Option<u32>,
        follow: bool,
    ) -> OpResult<()> {
        if !self.config.chown {
            return Err(KnownError::NotSupported);
        }
        let id = self.resolve(st, ctx, path, follow)?.existing()?;
        let node = st.node_mut(id)?;
        if !perm::may_chown(ctx, node, uid, gid) {
            return Err(KnownError::OpNotPermitted);
        }
        if let Some(uid) = uid {
            node.uid = uid;
        }
        if let Some(gid) = gid {
            node.gid = gid;
        }
        Ok(())
    }

    fn stat_locked(&self, st: &State, ctx: &IdentityContext, path: &Path, follow: bool) -> OpResult<Metadata> {
        let id = self.resolve(st, ctx, path, follow)?.existing()?;
        st.metadata(id)
    }
}

impl FsBackend for MemFs {
    fn name(&self) -> &str {
        "memfs"
    }

    fn capabilities(&self) -> FsCapabilities {
        FsCapabilities {
            symlinks: self.config.symlinks,
            hard_links: self.config.hard_links,
            chown: self.config.chown,
            chroot: self.config.chroot,
            real_os: false,
        }
    }

    fn chmod(&self, ctx: &IdentityContext, path: &Path, mode: Mode) -> FsResult<()> {
        self.run("chmod", path, |st| {
            let id = self.resolve(st, ctx, path, true)?.existing()?;
            let node = st.node_mut(id)?;
            if !perm::may_chmod(ctx, node) {
                return Err(KnownError::OpNotPermitted);
            }
            node.mode = Mode::new(mode.bits());
            Ok(())
        })
    }

    fn chown(&self, ctx: &IdentityContext, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        self.run("chown", path, |st| self.chown_locked(st, ctx, path, uid, gid, true))
    }

    fn lchown(&self, ctx: &IdentityContext, path: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        self.run("lchown", path, |st| self.chown_locked(st, ctx, path, uid, gid, false))
    }

    fn mkdir(&self, ctx: &IdentityContext, path: &Path, mode: Mode) -> FsResult<()> {
        self.run("mkdir", path, |st| self.mkdir_locked(st, ctx, path, mode))
    }

    fn mkdir_all(&self, ctx: &IdentityContext, path: &Path, mode: Mode) -> FsResult<()> {
        let mut st = self.state();
        let mut prefix = PathBuf::new();
        for comp in path.components() {
            prefix.push(comp);
            if !matches!(comp, Component::Normal(_) | Component::ParentDir) {
                continue;
            }
            let outcome = match self.resolve(&st, ctx, &prefix, true) {
                Ok(Resolved { node: Some(id), .. }) => match st.node(id) {
                    Ok(node) if node.is_dir() => Ok(()),
                    Ok(_) => Err(KnownError::NotADirectory),
                    Err(e) => Err(e),
                },
                Ok(Resolved { node: None, .. }) => self.mkdir_locked(&mut st, ctx, &prefix, mode),
                Err(e) => Err(e),
            };
            outcome.map_err(|e| self.path_error("mkdir", &prefix, e))?;
        }
        Ok(())
    }

    fn remove(&self, ctx: &IdentityContext, path: &Path) -> FsResult<()> {
        self.run("remove", path, |st| self.remove_locked(st, ctx, path))
    }

    fn remove_all(&self, ctx: &IdentityContext, path: &Path) -> FsResult<()> {
        let mut st = self.state();
        self.remove_all_locked(&mut st, ctx, path)
            .map_err(|(failed, e)| self.path_error("unlinkat", &failed, e))
    }

    fn rename(&self, ctx: &IdentityContext, old: &Path, new: &Path) -> FsResult<()> {
        self.run_link("rename", old, new, |st| {
            let ro = self.resolve(st, ctx, old, false)?;
            let old_id = ro.existing()?;
            let old_parent = ro.parent()?;
            let old_name = ro.entry_name()?.to_string();

            let rn = self.resolve(st, ctx, new, false)?;
            let new_parent = rn.parent()?;
            let new_name = rn.entry_name()?.to_string();

            self.require_write(st, ctx, old_parent)?;
            self.require_write(st, ctx, new_parent)?;

            let old_node = st.node(old_id)?;
            let old_is_dir = old_node.is_dir();
            if perm::sticky_blocks(ctx, st.node(old_parent)?, old_node) {
                return Err(KnownError::OpNotPermitted);
            }

            if let Some(target_id) = rn.node {
                if target_id == old_id {
                    return Ok(());
                }
                let target = st.node(target_id)?;
                if perm::sticky_blocks(ctx, st.node(new_parent)?, target) {
                    return Err(KnownError::OpNotPermitted);
                }
                match (&target.data, old_is_dir) {
                    (NodeData::Directory { children }, true) if !children.is_empty() => {
                        return Err(KnownError::DirNotEmpty)
                    }
                    (NodeData::Directory { .. }, true) => {}
                    (NodeData::Directory { .. }, false) => return Err(KnownError::IsADirectory),
                    (_, true) => return Err(KnownError::NotADirectory),
                    (_, false) => {}
                }
            }

            if old_is_dir {
                if rn.chain.contains(&old_id) {
                    return Err(KnownError::InvalidArgument);
                }
                // Moving a directory rewrites its ".." entry.
                if old_parent != new_parent && !perm::permits(ctx, st.node(old_id)?, WRITE) {
                    return Err(KnownError::PermissionDenied);
                }
            }

            if rn.node.is_some() {
                st.detach(new_parent, &new_name)?;
            }
            st.children_mut(old_parent)?.remove(&old_name);
            st.attach(new_parent, &new_name, old_id)?;
            debug!(old = %old.display(), new = %new.display(), "memfs rename");
            Ok(())
        })
    }

    fn link(&self, ctx: &IdentityContext, old: &Path, new: &Path) -> FsResult<()> {
        self.run_link("link", old, new, |st| {
            if !self.config.hard_links {
                return Err(KnownError::NotSupported);
            }
            let source = self.resolve(st, ctx, old, false)?.existing()?;
            if st.node(source)?.is_dir() {
                return Err(KnownError::OpNotPermitted);
            }
            let rn = self.resolve(st, ctx, new, false)?;
            if rn.node.is_some() {
                return Err(KnownError::FileExists);
            }
            let parent = rn.parent()?;
            let name = rn.entry_name()?.to_string();
            self.require_write(st, ctx, parent)?;

            st.attach(parent, &name, source)?;
            st.node_mut(source)?.nlink += 1;
            Ok(())
        })
    }

    fn symlink(&self, ctx: &IdentityContext, target: &Path, link: &Path) -> FsResult<()> {
        self.run_link("symlink", target, link, |st| {
            if !self.config.symlinks {
                return Err(KnownError::NotSupported);
            }
            let rn = self.resolve(st, ctx, link, false)?;
            if rn.node.is_some() {
                return Err(KnownError::FileExists);
            }
            let parent = rn.parent()?;
            let name = rn.entry_name()?.to_string();
            self.require_write(st, ctx, parent)?;

            let id = st.insert_node(
                NodeData::Symlink {
                    target: target.to_path_buf(),
                },
                Mode::new(0o777),
                ctx.uid,
                ctx.gid,
            );
            st.attach(parent, &name, id)
        })
    }

    fn chroot(&self, ctx: &IdentityContext, path: &Path) -> FsResult<()> {
        self.run("chroot", path, |st| {
            if !self.config.chroot {
                return Err(KnownError::NotSupported);
            }
            if !ctx.admin {
                return Err(KnownError::OpNotPermitted);
            }
            let id = self.resolve(st, ctx, path, true)?.existing()?;
            if !st.node(id)?.is_dir() {
                return Err(KnownError::NotADirectory);
            }
            st.root = id;
            st.cwd = vec![id];
            debug!(path = %path.display(), "memfs chroot");
            Ok(())
        })
    }

    fn chdir(&self, ctx: &IdentityContext, path: &Path) -> FsResult<()> {
        self.run("chdir", path, |st| {
            let r = self.resolve(st, ctx, path, true)?;
            let id = r.existing()?;
            let node = st.node(id)?;
            if !node.is_dir() {
                return Err(KnownError::NotADirectory);
            }
            if !perm::permits(ctx, node, EXEC) {
                return Err(KnownError::PermissionDenied);
            }
            let mut cwd = r.chain;
            cwd.push(id);
            st.cwd = cwd;
            Ok(())
        })
    }

    fn stat(&self, ctx: &IdentityContext, path: &Path) -> FsResult<Metadata> {
        self.run("stat", path, |st| self.stat_locked(st, ctx, path, true))
    }

    fn lstat(&self, ctx: &IdentityContext, path: &Path) -> FsResult<Metadata> {
        self.run("lstat", path, |st| self.stat_locked(st, ctx, path, false))
    }

    fn read_link(&self, ctx: &IdentityContext, path: &Path) -> FsResult<PathBuf> {
        self.run("readlink", path, |st| {
            let id = self.resolve(st, ctx, path, false)?.existing()?;
            match &st.node(id)?.data {
                NodeData::Symlink { target } => Ok(target.clone()),
                _ => Err(KnownError::InvalidArgument),
            }
        })
    }

    fn write_file(&self, ctx: &IdentityContext, path: &Path, data: &[u8], mode: Mode) -> FsResult<()> {
        self.run("open", path, |st| {
            let r = self.resolve(st, ctx, path, true)?;
            if let Some(id) = r.node {
                let node = st.node(id)?;
                if node.is_dir() {
                    return Err(KnownError::IsADirectory);
                }
                if !perm::permits(ctx, node, WRITE) {
                    return Err(KnownError::PermissionDenied);
                }
                if let NodeData::File { data: contents } = &mut st.node_mut(id)?.data {
                    *contents = data.to_vec();
                }
                return Ok(());
            }

            let parent = r.parent()?;
            let name = r.entry_name()?.to_string();
            self.require_write(st, ctx, parent)?;
            let mode = mode.perm().apply_umask(self.config.umask);
            let id = st.insert_node(NodeData::File { data: data.to_vec() }, mode, ctx.uid, ctx.gid);
            st.attach(parent, &name, id)
        })
    }

    fn read_file(&self, ctx: &IdentityContext, path: &Path) -> FsResult<Vec<u8>> {
        self.run("open", path, |st| {
            let id = self.resolve(st, ctx, path, true)?.existing()?;
            let node = st.node(id)?;
            if !perm::permits(ctx, node, READ) {
                return Err(KnownError::PermissionDenied);
            }
            match &node.data {
                NodeData::File { data } => Ok(data.clone()),
                _ => Err(KnownError::IsADirectory),
            }
        })
    }

    fn save_root(&self, _ctx: &IdentityContext) -> FsResult<RootToken> {
        let mut st = self.state();
        let token = st.next_token;
        st.next_token += 1;
        let saved = SavedRoot {
            root: st.root,
            cwd: st.cwd.clone(),
        };
        st.saved_roots.insert(token, saved);
        Ok(RootToken::new(token))
    }

    fn restore_root(&self, ctx: &IdentityContext, token: RootToken) -> FsResult<()> {
        self.run("chroot", Path::new("/"), |st| {
            if !ctx.admin {
                return Err(KnownError::OpNotPermitted);
            }
            let saved = st
                .saved_roots
                .remove(&token.id())
                .ok_or(KnownError::InvalidArgument)?;
            st.root = saved.root;
            st.cwd = saved.cwd;
            Ok(())
        })
    }
}
