//! Deterministic sample tree fixtures
//!
//! The catalog covers nested directories six levels deep with modes
//! between 0o700 and 0o777, small files, and symlinks that are absolute,
//! relative, chained through another link, or dangling. Each materialized
//! node carries the mode every path segment should end up with once the
//! umask is applied, so recursive creation can be checked segment by
//! segment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use permfs_core::{join_root, FsBackend, FsResult, IdentityContext, Mode};
use tracing::debug;

/// How a catalog entry is created
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SampleKind {
    /// Single `mkdir`; the parent must already exist.
    Directory,
    /// `mkdir_all`; every missing segment gets the same mode.
    DirectoryAll,
    File { content: Vec<u8> },
    Symlink {
        target: PathBuf,
        /// Target is taken relative to the fixture root and made absolute.
        absolute: bool,
        resolves: bool,
    },
}

/// One catalog entry, with its path relative to the fixture root
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleSpec {
    pub path: PathBuf,
    pub kind: SampleKind,
    pub mode: Mode,
}

impl SampleSpec {
    fn dir(path: &str, mode: u32) -> Self {
        Self {
            path: PathBuf::from(path),
            kind: SampleKind::Directory,
            mode: Mode::new(mode),
        }
    }

    fn dir_all(path: &str, mode: u32) -> Self {
        Self {
            path: PathBuf::from(path),
            kind: SampleKind::DirectoryAll,
            mode: Mode::new(mode),
        }
    }

    fn file(path: &str, mode: u32, content: &[u8]) -> Self {
        Self {
            path: PathBuf::from(path),
            kind: SampleKind::File {
                content: content.to_vec(),
            },
            mode: Mode::new(mode),
        }
    }

    fn symlink(path: &str, target: &str, absolute: bool, resolves: bool) -> Self {
        Self {
            path: PathBuf::from(path),
            kind: SampleKind::Symlink {
                target: PathBuf::from(target),
                absolute,
                resolves,
            },
            mode: Mode::new(0o777),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, SampleKind::Directory | SampleKind::DirectoryAll)
    }
}

/// A materialized catalog entry
#[derive(Clone, Debug)]
pub struct SampleNode {
    pub spec: SampleSpec,
    /// Absolute path on the backend.
    pub path: PathBuf,
    /// Expected permission bits of every segment below the root, ending
    /// with the node itself. Symlinks contribute their parents only.
    pub segment_modes: Vec<(PathBuf, Mode)>,
}

/// The fixed fixture catalog
#[derive(Clone, Debug)]
pub struct SampleTree {
    specs: Vec<SampleSpec>,
}

impl Default for SampleTree {
    fn default() -> Self {
        Self::catalog()
    }
}

impl SampleTree {
    pub fn catalog() -> Self {
        let specs = vec![
            SampleSpec::dir("a", 0o755),
            SampleSpec::dir("a/b", 0o750),
            SampleSpec::dir("a/b/c", 0o700),
            SampleSpec::dir("a/b/c/d", 0o777),
            SampleSpec::dir("a/b/c/d/e", 0o711),
            SampleSpec::dir("a/b/c/d/e/f", 0o770),
            SampleSpec::dir("shared", 0o775),
            SampleSpec::dir("private", 0o700),
            SampleSpec::dir_all("deep/one/two/three/four/five", 0o777),
            SampleSpec::file("a/hello.txt", 0o644, b"hello\n"),
            SampleSpec::file("a/b/data.bin", 0o600, &[0, 1, 2, 3, 255]),
            SampleSpec::file("a/b/c/d/e/f/leaf.txt", 0o640, b"leaf\n"),
            SampleSpec::file("shared/notes.txt", 0o666, b"shared notes\n"),
            SampleSpec::file("private/script.sh", 0o755, b"#!/bin/sh\necho hi\n"),
            SampleSpec::dir("links", 0o755),
            SampleSpec::symlink("links/abs", "a/hello.txt", true, true),
            SampleSpec::symlink("links/rel", "../a/hello.txt", false, true),
            SampleSpec::symlink("links/chain", "rel", false, true),
            SampleSpec::symlink("links/dir", "../a/b", false, true),
            SampleSpec::symlink("links/dangling", "../missing/nowhere", false, false),
        ];
        Self { specs }
    }

    pub fn specs(&self) -> &[SampleSpec] {
        &self.specs
    }

    /// Expected permission bits for every segment of `spec`.
    fn segment_modes(&self, spec: &SampleSpec, umask: Mode) -> Vec<(PathBuf, Mode)> {
        let declared: BTreeMap<&Path, &SampleSpec> =
            self.specs.iter().map(|s| (s.path.as_path(), s)).collect();

        let mut segments = Vec::new();
        let mut prefix = PathBuf::new();
        for comp in spec.path.components() {
            prefix.push(comp);
            let mode = match declared.get(prefix.as_path()) {
                Some(s) if matches!(s.kind, SampleKind::Symlink { .. }) => continue,
                Some(s) => s.mode.perm().apply_umask(umask),
                // Intermediate segment created by a recursive mkdir.
                None => spec.mode.perm().apply_umask(umask),
            };
            segments.push((prefix.clone(), mode));
        }
        segments
    }

    /// Create the catalog under `root`, which must exist, in order.
    pub fn materialize(
        &self,
        fs: &dyn FsBackend,
        ctx: &IdentityContext,
        root: &Path,
        umask: Mode,
    ) -> FsResult<Vec<SampleNode>> {
        let mut nodes = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            let path = join_root(root, &spec.path);
            match &spec.kind {
                SampleKind::Directory => fs.mkdir(ctx, &path, spec.mode)?,
                SampleKind::DirectoryAll => fs.mkdir_all(ctx, &path, spec.mode)?,
                SampleKind::File { content } => fs.write_file(ctx, &path, content, spec.mode)?,
                SampleKind::Symlink { target, absolute, .. } => {
                    let target = if *absolute {
                        join_root(root, target)
                    } else {
                        target.clone()
                    };
                    fs.symlink(ctx, &target, &path)?
                }
            }
            nodes.push(SampleNode {
                spec: spec.clone(),
                path,
                segment_modes: self.segment_modes(spec, umask),
            });
        }
        debug!(root = %root.display(), nodes = nodes.len(), "materialized sample tree");
        Ok(nodes)
    }

    /// Check materialized nodes against the backend. Returns one message
    /// per problem found.
    pub fn verify(
        fs: &dyn FsBackend,
        ctx: &IdentityContext,
        root: &Path,
        nodes: &[SampleNode],
    ) -> Vec<String> {
        let mut problems = Vec::new();
        for node in nodes {
            for (segment, expected) in &node.segment_modes {
                let path = join_root(root, segment);
                match fs.lstat(ctx, &path) {
                    Ok(meta) if meta.mode.perm() != *expected => problems.push(format!(
                        "{}: mode {:03o}, expected {:03o}",
                        segment.display(),
                        meta.mode.perm(),
                        expected
                    )),
                    Ok(_) => {}
                    Err(e) => problems.push(format!("{}: {}", segment.display(), e)),
                }
            }

            match &node.spec.kind {
                SampleKind::File { content } => match fs.read_file(ctx, &node.path) {
                    Ok(data) if &data != content => {
                        problems.push(format!("{}: content differs", node.spec.path.display()))
                    }
                    Ok(_) => {}
                    Err(e) => problems.push(e.to_string()),
                },
                SampleKind::Symlink { resolves, .. } => {
                    match fs.lstat(ctx, &node.path) {
                        Ok(meta) if !meta.is_symlink() => problems
                            .push(format!("{}: not a symlink", node.spec.path.display())),
                        Ok(_) => {}
                        Err(e) => problems.push(e.to_string()),
                    }
                    let resolved = fs.stat(ctx, &node.path).is_ok();
                    if resolved != *resolves {
                        problems.push(format!(
                            "{}: resolves={}, expected {}",
                            node.spec.path.display(),
                            resolved,
                            resolves
                        ));
                    }
                }
                SampleKind::Directory | SampleKind::DirectoryAll => {}
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use permfs_core::strip_root;

    #[test]
    fn catalog_is_deterministic() {
        assert_eq!(SampleTree::catalog().specs(), SampleTree::catalog().specs());
    }

    #[test]
    fn catalog_shape() {
        let tree = SampleTree::catalog();
        let depth = tree
            .specs()
            .iter()
            .filter(|s| s.is_dir())
            .map(|s| s.path.components().count())
            .max()
            .unwrap();
        assert_eq!(depth, 6);
        for spec in tree.specs().iter().filter(|s| s.is_dir()) {
            assert!((0o700..=0o777).contains(&spec.mode.bits()), "{:?}", spec.path);
        }
        let dangling = tree
            .specs()
            .iter()
            .filter(|s| matches!(s.kind, SampleKind::Symlink { resolves: false, .. }))
            .count();
        assert!(dangling >= 1);
    }

    #[test]
    fn segment_modes_follow_declared_parents() {
        let tree = SampleTree::catalog();
        let umask = Mode::new(0o022);
        let leaf = tree
            .specs()
            .iter()
            .find(|s| s.path == Path::new("a/b/c/d/e/f/leaf.txt"))
            .unwrap();
        let modes: Vec<u32> = tree
            .segment_modes(leaf, umask)
            .iter()
            .map(|(_, m)| m.bits())
            .collect();
        assert_eq!(modes, vec![0o755, 0o750, 0o700, 0o755, 0o711, 0o750, 0o640]);

        let deep = tree.specs().iter().find(|s| s.kind == SampleKind::DirectoryAll).unwrap();
        let segs = tree.segment_modes(deep, umask);
        assert_eq!(segs.len(), 6);
        assert!(segs.iter().all(|(_, m)| *m == Mode::new(0o755)));
    }

    #[test]
    fn fixture_paths_survive_strip_and_join() {
        let root = Path::new("/fixtures/run");
        for spec in SampleTree::catalog().specs() {
            let full = join_root(root, &spec.path);
            assert_eq!(join_root(root, &strip_root(root, &full)), full);
        }
    }
}
