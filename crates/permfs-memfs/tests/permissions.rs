//! Permission behaviour of the emulated filesystem under non-admin identities

use std::path::Path;

use permfs_core::{FsBackend, IdentityContext, KnownError, Mode, Os};
use permfs_memfs::{MemFs, MemFsConfig};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn user(name: &str, uid: u32, gid: u32) -> IdentityContext {
    IdentityContext {
        user: name.to_string(),
        uid,
        gid,
        groups: vec![gid],
        admin: false,
    }
}

fn setup() -> (MemFs, IdentityContext) {
    init_tracing();
    let fs = MemFs::new(MemFsConfig::for_os(Os::Linux));
    let root = IdentityContext::root();
    fs.mkdir(&root, Path::new("/tmp"), Mode::new(0o1777)).unwrap();
    fs.chmod(&root, Path::new("/tmp"), Mode::new(0o1777)).unwrap();
    (fs, root)
}

#[test]
fn chmod_by_non_owner_is_not_permitted() {
    let (fs, root) = setup();
    let alice = user("alice", 1000, 1000);
    let bob = user("bob", 1001, 1001);

    fs.mkdir(&alice, Path::new("/tmp/a"), Mode::new(0o755)).unwrap();
    fs.chmod(&alice, Path::new("/tmp/a"), Mode::new(0o000)).unwrap();

    let err = fs.chmod(&bob, Path::new("/tmp/a"), Mode::new(0o777)).unwrap_err();
    assert!(err.is(KnownError::OpNotPermitted, Os::Linux));

    // The owner can always restore access, even from 0o000.
    fs.chmod(&alice, Path::new("/tmp/a"), Mode::new(0o700)).unwrap();
    assert_eq!(fs.stat(&root, Path::new("/tmp/a")).unwrap().mode, Mode::new(0o700));
}

#[test]
fn mkdir_under_read_only_parent_is_denied() {
    let (fs, _root) = setup();
    let alice = user("alice", 1000, 1000);

    fs.mkdir(&alice, Path::new("/tmp/ro"), Mode::new(0o755)).unwrap();
    fs.chmod(&alice, Path::new("/tmp/ro"), Mode::new(0o555)).unwrap();

    let err = fs.mkdir(&alice, Path::new("/tmp/ro/child"), Mode::new(0o755)).unwrap_err();
    assert!(err.is(KnownError::PermissionDenied, Os::Linux));
    assert_eq!(err.to_string(), "mkdir /tmp/ro/child: permission denied");
}

#[test]
fn group_members_use_group_bits() {
    let (fs, root) = setup();
    let alice = user("alice", 1000, 1000);
    let mut carol = user("carol", 1002, 1002);

    fs.mkdir(&alice, Path::new("/tmp/shared"), Mode::new(0o777)).unwrap();
    fs.chmod(&alice, Path::new("/tmp/shared"), Mode::new(0o070)).unwrap();
    fs.chown(&root, Path::new("/tmp/shared"), None, Some(2000)).unwrap();

    let err = fs.mkdir(&carol, Path::new("/tmp/shared/x"), Mode::new(0o755)).unwrap_err();
    assert!(err.is(KnownError::PermissionDenied, Os::Linux));

    carol.groups.push(2000);
    fs.mkdir(&carol, Path::new("/tmp/shared/x"), Mode::new(0o755)).unwrap();

    // The owner falls in the user class and gets nothing from the group bits.
    let err = fs.stat(&alice, Path::new("/tmp/shared/x")).unwrap_err();
    assert!(err.is(KnownError::PermissionDenied, Os::Linux));
}

#[test]
fn sticky_directory_blocks_foreign_removal() {
    let (fs, _root) = setup();
    let alice = user("alice", 1000, 1000);
    let bob = user("bob", 1001, 1001);

    fs.write_file(&alice, Path::new("/tmp/note"), b"hi", Mode::new(0o666)).unwrap();
    let err = fs.remove(&bob, Path::new("/tmp/note")).unwrap_err();
    assert!(err.is(KnownError::OpNotPermitted, Os::Linux));

    let err = fs.rename(&bob, Path::new("/tmp/note"), Path::new("/tmp/stolen")).unwrap_err();
    assert!(err.is(KnownError::OpNotPermitted, Os::Linux));

    fs.remove(&alice, Path::new("/tmp/note")).unwrap();
}

#[test]
fn remove_populated_directory_then_stat() {
    let (fs, root) = setup();
    fs.mkdir_all(&root, Path::new("/tmp/full/inner"), Mode::new(0o755)).unwrap();

    let err = fs.remove(&root, Path::new("/tmp/full")).unwrap_err();
    assert!(err.is(KnownError::DirNotEmpty, Os::Linux));

    fs.remove_all(&root, Path::new("/tmp/full")).unwrap();
    let err = fs.stat(&root, Path::new("/tmp/full")).unwrap_err();
    assert!(err.is(KnownError::NoSuchFileOrDir, Os::Linux));
}

#[test]
fn remove_all_reports_unlinkat_on_denial() {
    let (fs, _root) = setup();
    let alice = user("alice", 1000, 1000);
    let bob = user("bob", 1001, 1001);

    fs.mkdir(&alice, Path::new("/tmp/keep"), Mode::new(0o755)).unwrap();
    fs.write_file(&alice, Path::new("/tmp/keep/f"), b"", Mode::new(0o644)).unwrap();

    let err = fs.remove_all(&bob, Path::new("/tmp/keep")).unwrap_err();
    assert!(err.is(KnownError::PermissionDenied, Os::Linux));
    assert!(err.to_string().starts_with("unlinkat /tmp/keep/f"));
}

#[test]
fn unreadable_file_is_denied_to_others_but_not_admin() {
    let (fs, root) = setup();
    let alice = user("alice", 1000, 1000);
    let bob = user("bob", 1001, 1001);

    fs.write_file(&alice, Path::new("/tmp/secret"), b"s3cr3t", Mode::new(0o600)).unwrap();
    let err = fs.read_file(&bob, Path::new("/tmp/secret")).unwrap_err();
    assert!(err.is(KnownError::PermissionDenied, Os::Linux));
    assert_eq!(fs.read_file(&root, Path::new("/tmp/secret")).unwrap(), b"s3cr3t");
}

#[test]
fn chown_to_foreign_user_needs_admin() {
    let (fs, root) = setup();
    let alice = user("alice", 1000, 1000);

    fs.write_file(&alice, Path::new("/tmp/mine"), b"", Mode::new(0o644)).unwrap();
    let err = fs.chown(&alice, Path::new("/tmp/mine"), Some(1001), None).unwrap_err();
    assert!(err.is(KnownError::OpNotPermitted, Os::Linux));

    fs.chown(&root, Path::new("/tmp/mine"), Some(1001), Some(1001)).unwrap();
    let meta = fs.stat(&root, Path::new("/tmp/mine")).unwrap();
    assert_eq!((meta.uid, meta.gid), (1001, 1001));
}

#[test]
fn setgid_directory_passes_group_down() {
    let (fs, root) = setup();
    let alice = user("alice", 1000, 1000);

    fs.mkdir(&root, Path::new("/tmp/proj"), Mode::new(0o777)).unwrap();
    fs.chown(&root, Path::new("/tmp/proj"), None, Some(3000)).unwrap();
    fs.chmod(&root, Path::new("/tmp/proj"), Mode::new(0o2777)).unwrap();

    fs.mkdir(&alice, Path::new("/tmp/proj/sub"), Mode::new(0o755)).unwrap();
    assert_eq!(fs.stat(&root, Path::new("/tmp/proj/sub")).unwrap().gid, 3000);
}

#[test]
fn macos_emulation_uses_darwin_errno() {
    init_tracing();
    let fs = MemFs::new(MemFsConfig::for_os(Os::MacOs));
    let root = IdentityContext::root();
    fs.mkdir_all(&root, Path::new("/d/e"), Mode::new(0o755)).unwrap();
    let err = fs.remove(&root, Path::new("/d")).unwrap_err();
    assert_eq!(err.identity().code, Some(66));
}
