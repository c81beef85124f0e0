//! Permission matrix runner
//!
//! For one target operation, sweeps every roster role against all 512
//! permission values: the admin builds a fixture owned by the role's user
//! with the given mode, the constrained actor performs the operation, and
//! the normalized outcome is recorded into or compared against the golden
//! oracle.

use std::fmt;
use std::path::{Path, PathBuf};

use permfs_core::{
    normalize, FsBackend, FsResult, IdentityBackend, IdentityContext, Mode, NormalizedFailure, User,
};
use tracing::{debug, info, warn};

use crate::config::ConformanceConfig;
use crate::error::{HarnessError, Result};
use crate::golden::{Discrepancy, GoldenKey, GoldenOracle, OracleMode, Severity};
use crate::orchestrator::SavedRoot;

/// Name of the file the admin places inside every fixture directory.
pub const ENTRY: &str = "entry";

/// Relation between a fixture's owner and the acting user
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// The actor owns the fixture.
    Owner,
    /// Owned by another user sharing the actor's primary group.
    Member,
    /// Owned by a user in an unrelated group.
    Other,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Owner, Role::Member, Role::Other];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Member => "member",
            Role::Other => "other",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A synthetic user standing in for one role
#[derive(Clone, Debug)]
pub struct RosterMember {
    pub role: Role,
    pub user: User,
    pub ctx: IdentityContext,
}

/// The synthetic users and groups one run sweeps over
#[derive(Clone, Debug)]
pub struct Roster {
    members: Vec<RosterMember>,
    groups: Vec<String>,
}

impl Roster {
    /// Create the roster's groups and users through `ids`.
    pub fn create(ids: &dyn IdentityBackend, admin: &IdentityContext, config: &ConformanceConfig) -> Result<Self> {
        let shared = config.synthetic_name("grp");
        let apart = config.synthetic_name("grpx");
        let mut roster = Roster {
            members: Vec::new(),
            groups: Vec::new(),
        };

        let result = (|| -> Result<()> {
            ids.add_group(admin, &shared)?;
            roster.groups.push(shared.clone());
            ids.add_group(admin, &apart)?;
            roster.groups.push(apart.clone());

            for role in Role::ALL {
                let group = if role == Role::Other { &apart } else { &shared };
                let user = ids.add_user(admin, &config.synthetic_name(role.as_str()), group)?;
                let ctx = ids.set_active_identity(admin, &user.name)?;
                debug!(role = %role, user = %user.name, uid = user.uid, gid = user.primary_gid, "roster member");
                roster.members.push(RosterMember { role, user, ctx });
            }
            Ok(())
        })();

        if let Err(e) = result {
            roster.teardown(ids, admin);
            return Err(e);
        }
        info!(users = roster.members.len(), "created roster");
        Ok(roster)
    }

    pub fn members(&self) -> &[RosterMember] {
        &self.members
    }

    pub fn member(&self, role: Role) -> Option<&RosterMember> {
        self.members.iter().find(|m| m.role == role)
    }

    /// The constrained identity operations run as: the owner role.
    pub fn actor(&self) -> Result<&IdentityContext> {
        self.member(Role::Owner)
            .map(|m| &m.ctx)
            .ok_or_else(|| HarnessError::Setup("roster has no owner".to_string()))
    }

    /// Delete the roster's users and groups, logging anything that fails.
    pub fn teardown(&self, ids: &dyn IdentityBackend, admin: &IdentityContext) {
        for member in &self.members {
            if let Err(e) = ids.del_user(admin, &member.user.name) {
                warn!(user = %member.user.name, error = %e, "failed to delete roster user");
            }
        }
        for group in &self.groups {
            if let Err(e) = ids.del_group(admin, group) {
                warn!(group = %group, error = %e, "failed to delete roster group");
            }
        }
    }
}

/// Operation swept by the permission matrix.
///
/// Every fixture is a directory with mode M, owned by the role's user, that
/// contains an admin-created `entry` file owned by the same user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MatrixTarget {
    Chmod,
    Chown,
    Mkdir,
    MkdirAll,
    CreateFile,
    Rename,
    Remove,
    Link,
    Symlink,
    Chroot,
    Chdir,
    Stat,
}

impl MatrixTarget {
    pub const ALL: [MatrixTarget; 12] = [
        MatrixTarget::Chmod,
        MatrixTarget::Chown,
        MatrixTarget::Mkdir,
        MatrixTarget::MkdirAll,
        MatrixTarget::CreateFile,
        MatrixTarget::Rename,
        MatrixTarget::Remove,
        MatrixTarget::Link,
        MatrixTarget::Symlink,
        MatrixTarget::Chroot,
        MatrixTarget::Chdir,
        MatrixTarget::Stat,
    ];

    /// Name used for the golden file.
    pub fn name(self) -> &'static str {
        match self {
            MatrixTarget::Chmod => "chmod",
            MatrixTarget::Chown => "chown",
            MatrixTarget::Mkdir => "mkdir",
            MatrixTarget::MkdirAll => "mkdirall",
            MatrixTarget::CreateFile => "create",
            MatrixTarget::Rename => "rename",
            MatrixTarget::Remove => "remove",
            MatrixTarget::Link => "link",
            MatrixTarget::Symlink => "symlink",
            MatrixTarget::Chroot => "chroot",
            MatrixTarget::Chdir => "chdir",
            MatrixTarget::Stat => "stat",
        }
    }

    fn changes_cwd(self) -> bool {
        matches!(self, MatrixTarget::Chdir | MatrixTarget::Chroot)
    }

    /// Perform the operation as `actor` against `fixture`.
    fn invoke(self, fs: &dyn FsBackend, actor: &IdentityContext, fixture: &Path) -> FsResult<()> {
        let entry = fixture.join(ENTRY);
        match self {
            MatrixTarget::Chmod => fs.chmod(actor, fixture, Mode::new(0o700)),
            MatrixTarget::Chown => fs.chown(actor, fixture, None, Some(actor.gid)),
            MatrixTarget::Mkdir => fs.mkdir(actor, &fixture.join("new"), Mode::new(0o755)),
            MatrixTarget::MkdirAll => {
                fs.mkdir_all(actor, &fixture.join("new").join("deeper"), Mode::new(0o755))
            }
            MatrixTarget::CreateFile => {
                fs.write_file(actor, &fixture.join("created"), b"created", Mode::new(0o644))
            }
            MatrixTarget::Rename => fs.rename(actor, &entry, &fixture.join("renamed")),
            MatrixTarget::Remove => fs.remove(actor, &entry),
            MatrixTarget::Link => fs.link(actor, &entry, &fixture.join("hard")),
            MatrixTarget::Symlink => fs.symlink(actor, Path::new(ENTRY), &fixture.join("soft")),
            MatrixTarget::Chroot => fs.chroot(actor, fixture),
            MatrixTarget::Chdir => fs.chdir(actor, fixture),
            MatrixTarget::Stat => fs.stat(actor, &entry).map(|_| ()),
        }
    }
}

impl fmt::Display for MatrixTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one matrix sweep
#[derive(Clone, Debug)]
pub struct MatrixReport {
    pub target: MatrixTarget,
    /// `None` when the sweep was skipped.
    pub mode: Option<OracleMode>,
    pub entries: usize,
    pub discrepancies: Vec<Discrepancy>,
    pub warnings: Vec<Discrepancy>,
    pub persisted: bool,
    pub skipped: Option<String>,
}

impl MatrixReport {
    pub fn skipped(target: MatrixTarget, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        info!(op = %target, reason = %reason, "skipping matrix");
        Self {
            target,
            mode: None,
            entries: 0,
            discrepancies: Vec::new(),
            warnings: Vec::new(),
            persisted: false,
            skipped: Some(reason),
        }
    }

    /// No hard discrepancies.
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// Runs matrix sweeps against one filesystem backend
pub struct MatrixRunner<'a> {
    fs: &'a dyn FsBackend,
    config: &'a ConformanceConfig,
}

impl<'a> MatrixRunner<'a> {
    pub fn new(fs: &'a dyn FsBackend, config: &'a ConformanceConfig) -> Self {
        Self { fs, config }
    }

    /// Directory the sweep for `target` builds its fixtures under.
    pub fn matrix_root(&self, target: MatrixTarget) -> PathBuf {
        self.config.fixture_root.join(format!("{}_matrix", target.name()))
    }

    /// Sweep `target` over every roster role and permission value.
    ///
    /// Fixture errors abort the sweep; comparison mismatches are collected.
    /// Teardown runs either way.
    pub fn run(&self, target: MatrixTarget, roster: &Roster, admin: &IdentityContext) -> Result<MatrixReport> {
        let root = self.matrix_root(target);
        let mut oracle = GoldenOracle::load(&self.config.golden_dir, target.name(), self.config.os)?;
        let mut report = MatrixReport {
            target,
            mode: Some(oracle.mode()),
            entries: 0,
            discrepancies: Vec::new(),
            warnings: Vec::new(),
            persisted: false,
            skipped: None,
        };
        info!(op = %target, mode = ?oracle.mode(), root = %root.display(), "starting matrix sweep");

        let swept = self.sweep(target, roster, admin, &root, &mut oracle, &mut report);
        let torn_down = self.teardown(target, admin, &root);
        settle(target, swept, torn_down)?;

        report.persisted = oracle.persist()?;
        info!(
            op = %target,
            entries = report.entries,
            discrepancies = report.discrepancies.len(),
            warnings = report.warnings.len(),
            "finished matrix sweep"
        );
        Ok(report)
    }

    fn sweep(
        &self,
        target: MatrixTarget,
        roster: &Roster,
        admin: &IdentityContext,
        root: &Path,
        oracle: &mut GoldenOracle,
        report: &mut MatrixReport,
    ) -> Result<()> {
        let actor = roster.actor()?;
        self.fs.remove_all(admin, root)?;
        self.fs.mkdir_all(admin, root, Mode::MAX_PERM)?;
        self.fs.chmod(admin, root, Mode::MAX_PERM)?;

        for member in roster.members() {
            let role_dir = root.join(member.role.as_str());
            self.fs.mkdir(admin, &role_dir, Mode::MAX_PERM)?;
            self.fs.chmod(admin, &role_dir, Mode::MAX_PERM)?;

            for mode in Mode::all_permissions() {
                let fixture = role_dir.join(mode.octal());
                self.build_fixture(admin, member, &fixture, mode)?;

                let outcome = self.invoke_guarded(target, admin, actor, &fixture, root)?;
                let failure = outcome.relative_to(root);
                let key = GoldenKey::new(member.role.as_str(), mode);

                match oracle.mode() {
                    OracleMode::Record => {
                        oracle.record_if_absent(key, failure);
                    }
                    OracleMode::Replay => {
                        if let Some(d) = oracle.compare(&key, &failure, &self.config.compare)? {
                            match d.severity {
                                Severity::Error => {
                                    warn!(op = %target, key = %d.key, fields = ?d.fields, "matrix discrepancy");
                                    report.discrepancies.push(d);
                                }
                                Severity::Warning => {
                                    debug!(op = %target, key = %d.key, fields = ?d.fields, "matrix warning");
                                    report.warnings.push(d);
                                }
                            }
                        }
                    }
                }
                report.entries += 1;
            }
        }
        Ok(())
    }

    /// Create the fixture directory and its entry, owned by the role's user.
    fn build_fixture(&self, admin: &IdentityContext, member: &RosterMember, fixture: &Path, mode: Mode) -> Result<()> {
        let entry = fixture.join(ENTRY);
        let (uid, gid) = (Some(member.user.uid), Some(member.user.primary_gid));
        self.fs.mkdir(admin, fixture, Mode::MAX_PERM)?;
        self.fs.write_file(admin, &entry, ENTRY.as_bytes(), Mode::new(0o666))?;
        self.fs.chmod(admin, &entry, Mode::new(0o666))?;
        self.fs.chown(admin, &entry, uid, gid)?;
        self.fs.chown(admin, fixture, uid, gid)?;
        self.fs.chmod(admin, fixture, mode)?;
        Ok(())
    }

    /// Invoke the target, undoing any root or working-directory change it
    /// makes before the next fixture is built.
    fn invoke_guarded(
        &self,
        target: MatrixTarget,
        admin: &IdentityContext,
        actor: &IdentityContext,
        fixture: &Path,
        root: &Path,
    ) -> Result<NormalizedFailure> {
        if target != MatrixTarget::Chroot {
            let outcome = target.invoke(self.fs, actor, fixture);
            if target.changes_cwd() && outcome.is_ok() {
                self.fs.chdir(admin, root)?;
            }
            return Ok(normalize(&outcome));
        }

        let saved = SavedRoot::new(self.fs, admin)?;
        let outcome = target.invoke(self.fs, actor, fixture);
        saved.restore()?;
        if outcome.is_ok() {
            self.fs.chdir(admin, root)?;
        }
        Ok(normalize(&outcome))
    }

    /// Restore cwd, open up every fixture and remove the matrix tree.
    fn teardown(&self, target: MatrixTarget, admin: &IdentityContext, root: &Path) -> Result<()> {
        if target.changes_cwd() {
            let parent = root.parent().unwrap_or(root);
            if let Err(e) = self.fs.chdir(admin, parent) {
                warn!(error = %e, "failed to leave matrix root");
            }
        }

        for role in Role::ALL {
            let role_dir = root.join(role.as_str());
            if self.fs.lstat(admin, &role_dir).is_err() {
                continue;
            }
            for mode in Mode::all_permissions() {
                let fixture = role_dir.join(mode.octal());
                // Missing fixtures are fine: the sweep may have stopped early.
                let _ = self.fs.chmod(admin, &fixture, Mode::MAX_PERM);
            }
        }

        self.fs.remove_all(admin, root)?;
        debug!(op = %target, root = %root.display(), "tore down matrix fixtures");
        Ok(())
    }
}

/// The sweep's error wins over a teardown error, which is logged instead.
fn settle(target: MatrixTarget, swept: Result<()>, torn_down: Result<()>) -> Result<()> {
    match (swept, torn_down) {
        (Err(e), Err(teardown)) => {
            warn!(op = %target, error = %teardown, "matrix teardown failed after sweep error");
            Err(e)
        }
        (swept, torn_down) => swept.and(torn_down),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_names_are_unique() {
        let mut names: Vec<&str> = MatrixTarget::ALL.iter().map(|t| t.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), MatrixTarget::ALL.len());
    }

    #[test]
    fn role_labels() {
        let labels: Vec<String> = Role::ALL.iter().map(|r| r.to_string()).collect();
        assert_eq!(labels, vec!["owner", "member", "other"]);
    }

    #[test]
    fn skipped_report_is_clean() {
        let report = MatrixReport::skipped(MatrixTarget::Chroot, "no chroot");
        assert!(report.is_clean());
        assert_eq!(report.skipped.as_deref(), Some("no chroot"));
        assert!(report.mode.is_none());
    }

    #[test]
    fn sweep_error_outranks_teardown_error() {
        let sweep = || Err(HarnessError::Setup("sweep".into()));
        let teardown = || Err(HarnessError::Setup("teardown".into()));

        let err = settle(MatrixTarget::Chmod, sweep(), teardown()).unwrap_err();
        assert_eq!(err.to_string(), "setup: sweep");

        let err = settle(MatrixTarget::Chmod, Ok(()), teardown()).unwrap_err();
        assert_eq!(err.to_string(), "setup: teardown");

        assert!(settle(MatrixTarget::Chmod, Ok(()), Ok(())).is_ok());
    }
}
