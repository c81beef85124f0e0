#![cfg(unix)]
//! Host filesystem behaviour, run as whatever user invokes the tests.
//!
//! Everything here is serialized: chroot and effective-id switches are
//! process-wide.

use permfs_core::{FsBackend, IdentityBackend, IdentityContext, KnownError, Mode, Os};
use permfs_host::{HostFs, HostIdentity};
use serial_test::serial;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup() -> (HostFs, IdentityContext, TempDir) {
    init_tracing();
    let ctx = HostIdentity::new().admin_context().unwrap();
    let dir = tempfile::tempdir().unwrap();
    (HostFs::new(), ctx, dir)
}

#[test]
#[serial]
fn remove_populated_directory_then_stat() {
    let (fs, ctx, tmp) = setup();
    let dir = tmp.path().join("full");
    fs.mkdir_all(&ctx, &dir.join("inner"), Mode::new(0o755)).unwrap();

    let err = fs.remove(&ctx, &dir).unwrap_err();
    assert!(err.is(KnownError::DirNotEmpty, Os::current()), "{}", err);
    assert!(err.to_string().starts_with("remove "));

    fs.remove_all(&ctx, &dir).unwrap();
    let err = fs.stat(&ctx, &dir).unwrap_err();
    assert!(err.is(KnownError::NoSuchFileOrDir, Os::current()));

    // Removing what is already gone is fine.
    fs.remove_all(&ctx, &dir).unwrap();
}

#[test]
#[serial]
fn mkdir_under_read_only_parent() {
    let (fs, ctx, tmp) = setup();
    if ctx.admin {
        // Root bypasses mode bits on the host.
        return;
    }
    let parent = tmp.path().join("ro");
    fs.mkdir(&ctx, &parent, Mode::new(0o755)).unwrap();
    fs.chmod(&ctx, &parent, Mode::new(0o555)).unwrap();

    let err = fs.mkdir(&ctx, &parent.join("child"), Mode::new(0o755)).unwrap_err();
    assert!(err.is(KnownError::PermissionDenied, Os::current()));

    fs.chmod(&ctx, &parent, Mode::new(0o755)).unwrap();
}

#[test]
#[serial]
fn symlinks_and_metadata() {
    let (fs, ctx, tmp) = setup();
    let file = tmp.path().join("f");
    let link = tmp.path().join("l");
    fs.write_file(&ctx, &file, b"data", Mode::new(0o640)).unwrap();
    fs.symlink(&ctx, std::path::Path::new("f"), &link).unwrap();

    assert_eq!(fs.read_file(&ctx, &link).unwrap(), b"data");
    assert!(fs.lstat(&ctx, &link).unwrap().is_symlink());
    assert_eq!(fs.read_link(&ctx, &link).unwrap(), std::path::PathBuf::from("f"));

    let meta = fs.stat(&ctx, &file).unwrap();
    assert_eq!(meta.uid, ctx.uid);
    assert_eq!(meta.len, 4);

    let err = fs.symlink(&ctx, std::path::Path::new("f"), &link).unwrap_err();
    assert!(err.is(KnownError::FileExists, Os::current()));
}

#[test]
#[serial]
fn chroot_requires_privilege() {
    let (fs, ctx, tmp) = setup();
    let jail = tmp.path().join("jail");
    fs.mkdir_all(&ctx, &jail.join("etc"), Mode::new(0o755)).unwrap();

    if !ctx.admin {
        let err = fs.chroot(&ctx, &jail).unwrap_err();
        assert!(err.is(KnownError::OpNotPermitted, Os::current()));
        return;
    }

    let token = fs.save_root(&ctx).unwrap();
    fs.chroot(&ctx, &jail).unwrap();
    let inside = fs.stat(&ctx, std::path::Path::new("/etc"));
    fs.restore_root(&ctx, token).unwrap();

    assert!(inside.unwrap().is_dir());
    assert!(fs.stat(&ctx, &jail).is_ok());
}

#[test]
#[serial]
fn switching_identity_without_root_is_refused() {
    let (fs, ctx, tmp) = setup();
    if ctx.admin {
        return;
    }
    let other = IdentityContext {
        user: "nobody".to_string(),
        uid: ctx.uid.wrapping_add(1),
        gid: ctx.gid,
        groups: vec![ctx.gid],
        admin: false,
    };
    let err = fs.mkdir(&other, &tmp.path().join("x"), Mode::new(0o755)).unwrap_err();
    assert!(err.is(KnownError::OpNotPermitted, Os::current()));
}

#[cfg(target_os = "linux")]
#[test]
#[serial]
fn supplementary_group_grants_access() {
    let (fs, ctx, tmp) = setup();
    if !ctx.admin {
        return;
    }
    fs.chmod(&ctx, tmp.path(), Mode::new(0o755)).unwrap();
    let shared = tmp.path().join("shared");
    fs.mkdir(&ctx, &shared, Mode::new(0o755)).unwrap();
    fs.chown(&ctx, &shared, None, Some(54321)).unwrap();
    fs.chmod(&ctx, &shared, Mode::new(0o070)).unwrap();

    let member = IdentityContext {
        user: "member".to_string(),
        uid: 54320,
        gid: 54320,
        groups: vec![54320, 54321],
        admin: false,
    };
    let outsider = IdentityContext {
        groups: vec![54320],
        ..member.clone()
    };

    let err = fs.mkdir(&outsider, &shared.join("denied"), Mode::new(0o755)).unwrap_err();
    assert!(err.is(KnownError::PermissionDenied, Os::current()), "{}", err);

    fs.mkdir(&member, &shared.join("granted"), Mode::new(0o755)).unwrap();
    assert_eq!(fs.stat(&ctx, &shared.join("granted")).unwrap().uid, 54320);

    // The admin's own groups are back in place afterwards.
    fs.chmod(&ctx, &shared, Mode::new(0o755)).unwrap();
    fs.remove_all(&ctx, &shared).unwrap();
}
