//! Scenario orchestration
//!
//! The [`Orchestrator`] owns one filesystem backend and one identity backend,
//! queries their capabilities once, and runs matrix sweeps, fixed permission
//! scenarios and identity-management conformance checks against them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use permfs_core::{
    normalize, Capabilities, FsBackend, FsResult, IdentityBackend, IdentityContext,
    IdentityErrorKind, IdentitySupport, KnownError, Mode, NativeFailure, NodeKind, NormalizedFailure,
    Platform, RootToken, ToolchainVersion,
};
use tracing::{debug, info, warn};

use crate::config::ConformanceConfig;
use crate::error::Result;
use crate::expect::{evaluate, Case, Expectation, Verdict};
use crate::matrix::{MatrixReport, MatrixRunner, MatrixTarget, Role, Roster};
use crate::sample_tree::SampleTree;

/// Saved process root that is put back when the guard goes out of scope.
///
/// Call [`SavedRoot::restore`] to observe the restore error; dropping the
/// guard restores too but can only log a failure.
pub struct SavedRoot<'a> {
    fs: &'a dyn FsBackend,
    admin: &'a IdentityContext,
    token: Option<RootToken>,
}

impl<'a> SavedRoot<'a> {
    pub fn new(fs: &'a dyn FsBackend, admin: &'a IdentityContext) -> FsResult<Self> {
        let token = fs.save_root(admin)?;
        debug!(token = token.id(), "saved root");
        Ok(Self {
            fs,
            admin,
            token: Some(token),
        })
    }

    pub fn restore(mut self) -> FsResult<()> {
        match self.token.take() {
            Some(token) => self.fs.restore_root(self.admin, token),
            None => Ok(()),
        }
    }
}

impl Drop for SavedRoot<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = self.fs.restore_root(self.admin, token) {
                warn!(error = %e, "failed to restore saved root");
            }
        }
    }
}

/// One named check and its verdict
#[derive(Clone, Debug)]
pub struct ScenarioCheck {
    pub name: String,
    pub verdict: Verdict,
}

impl fmt::Display for ScenarioCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.verdict)
    }
}

/// Verdicts collected by a scenario run
#[derive(Clone, Debug, Default)]
pub struct ScenarioReport {
    pub checks: Vec<ScenarioCheck>,
}

impl ScenarioReport {
    pub fn record(&mut self, name: impl Into<String>, verdict: Verdict) {
        let name = name.into();
        match &verdict {
            Verdict::Fail { .. } => warn!(check = %name, %verdict, "check failed"),
            Verdict::NotApplicable => debug!(check = %name, "check not applicable"),
            Verdict::Pass { warnings } if !warnings.is_empty() => {
                warn!(check = %name, ?warnings, "check passed with warnings")
            }
            Verdict::Pass { .. } => debug!(check = %name, "check passed"),
        }
        self.checks.push(ScenarioCheck { name, verdict });
    }

    pub fn failures(&self) -> Vec<&ScenarioCheck> {
        self.checks.iter().filter(|c| c.verdict.is_fail()).collect()
    }

    pub fn passed(&self) -> usize {
        self.checks.iter().filter(|c| c.verdict.is_pass()).count()
    }

    pub fn not_applicable(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.verdict == Verdict::NotApplicable)
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.checks.iter().all(|c| !c.verdict.is_fail())
    }

    pub fn check(&self, name: &str) -> Option<&Verdict> {
        self.checks.iter().find(|c| c.name == name).map(|c| &c.verdict)
    }
}

/// Drives conformance runs over one backend pair
pub struct Orchestrator {
    fs: Arc<dyn FsBackend>,
    ids: Arc<dyn IdentityBackend>,
    config: ConformanceConfig,
    caps: Capabilities,
    platform: Platform,
    admin: IdentityContext,
}

impl Orchestrator {
    pub fn new(fs: Arc<dyn FsBackend>, ids: Arc<dyn IdentityBackend>, config: ConformanceConfig) -> Result<Self> {
        let caps = Capabilities::query(fs.as_ref(), ids.as_ref());
        let admin = ids.admin_context()?;
        let platform = Platform::new(config.os, ToolchainVersion::current());
        info!(backend = fs.name(), os = %config.os, admin = %admin.user, "created orchestrator");
        Ok(Self {
            fs,
            ids,
            config,
            caps,
            platform,
            admin,
        })
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub fn config(&self) -> &ConformanceConfig {
        &self.config
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Reason `target` cannot run on these backends, if any.
    fn unsupported(&self, target: MatrixTarget) -> Option<&'static str> {
        if !self.caps.manages_identities() {
            return Some("identity backend cannot create synthetic users");
        }
        match target {
            MatrixTarget::Link if !self.caps.hard_links => Some("hard links unsupported"),
            MatrixTarget::Symlink if !self.caps.symlinks => Some("symlinks unsupported"),
            MatrixTarget::Chown if !self.caps.chown => Some("chown unsupported"),
            MatrixTarget::Chroot if !self.caps.chroot => Some("chroot unsupported"),
            _ => None,
        }
    }

    /// Sweep one target with a fresh roster.
    pub fn run_matrix(&self, target: MatrixTarget) -> Result<MatrixReport> {
        if let Some(reason) = self.unsupported(target) {
            return Ok(MatrixReport::skipped(target, reason));
        }
        let roster = Roster::create(self.ids.as_ref(), &self.admin, &self.config)?;
        let report = MatrixRunner::new(self.fs.as_ref(), &self.config).run(target, &roster, &self.admin);
        roster.teardown(self.ids.as_ref(), &self.admin);
        report
    }

    /// Sweep every target, sharing one roster.
    pub fn run_all_matrices(&self) -> Result<Vec<MatrixReport>> {
        let mut reports = Vec::with_capacity(MatrixTarget::ALL.len());
        let mut roster = None;
        let result = (|| -> Result<()> {
            for target in MatrixTarget::ALL {
                if let Some(reason) = self.unsupported(target) {
                    reports.push(MatrixReport::skipped(target, reason));
                    continue;
                }
                if roster.is_none() {
                    roster = Some(Roster::create(self.ids.as_ref(), &self.admin, &self.config)?);
                }
                if let Some(roster) = &roster {
                    let runner = MatrixRunner::new(self.fs.as_ref(), &self.config);
                    reports.push(runner.run(target, roster, &self.admin)?);
                }
            }
            Ok(())
        })();
        if let Some(roster) = &roster {
            roster.teardown(self.ids.as_ref(), &self.admin);
        }
        result?;
        Ok(reports)
    }

    fn check<T, E>(&self, report: &mut ScenarioReport, name: &str, expectation: &Expectation, outcome: &std::result::Result<T, E>)
    where
        E: NativeFailure,
    {
        let actual = normalize(outcome);
        report.record(name, evaluate(expectation, &actual, &self.platform));
    }

    fn check_failure(&self, report: &mut ScenarioReport, name: &str, expectation: &Expectation, actual: &NormalizedFailure) {
        report.record(name, evaluate(expectation, actual, &self.platform));
    }

    /// Fixed permission scenarios against the filesystem backend.
    pub fn run_scenarios(&self) -> Result<ScenarioReport> {
        let base = self.scenario_root();
        let fs = self.fs.as_ref();
        let admin = &self.admin;

        fs.remove_all(admin, &base)?;
        fs.mkdir_all(admin, &base, Mode::MAX_PERM)?;
        fs.chmod(admin, &base, Mode::MAX_PERM)?;

        let roster = if self.caps.manages_identities() {
            Some(Roster::create(self.ids.as_ref(), admin, &self.config)?)
        } else {
            warn!("identity management unavailable, skipping multi-user scenarios");
            None
        };

        let mut report = ScenarioReport::default();
        let result = self.scenarios(&mut report, &base, roster.as_ref());

        for fixture in ["readonly", "locked"] {
            if let Err(e) = fs.chmod(admin, &base.join(fixture), Mode::MAX_PERM) {
                debug!(fixture, error = %e, "fixture not present");
            }
        }
        let cleaned = fs.remove_all(admin, &base);
        if let Some(roster) = &roster {
            roster.teardown(self.ids.as_ref(), admin);
        }
        result?;
        cleaned?;

        info!(
            passed = report.passed(),
            failed = report.failures().len(),
            not_applicable = report.not_applicable(),
            "finished scenarios"
        );
        Ok(report)
    }

    fn scenarios(&self, report: &mut ScenarioReport, base: &Path, roster: Option<&Roster>) -> Result<()> {
        let fs = self.fs.as_ref();
        let admin = &self.admin;
        let actor = roster.map(|r| r.actor()).transpose()?;

        // chmod of a 0o000 directory by someone other than the owner
        match (actor, roster.and_then(|r| r.member(Role::Member))) {
            (Some(actor), Some(owner)) => {
                let locked = base.join("locked");
                fs.mkdir(admin, &locked, Mode::MAX_PERM)?;
                fs.chown(admin, &locked, Some(owner.user.uid), Some(owner.user.primary_gid))?;
                fs.chmod(admin, &locked, Mode::new(0o000))?;
                let kind = fs.lstat(admin, &locked).map(|m| m.kind);
                report.record(
                    "chmod_target_is_directory",
                    Verdict::check(
                        matches!(&kind, Ok(m) if *m == NodeKind::Directory),
                        format!("locked fixture is {:?}", kind),
                    ),
                );
                let outcome = fs.chmod(actor, &locked, Mode::new(0o755));
                let actual = normalize(&outcome).relative_to(base);
                let expect = Expectation::new().case(
                    Case::failure()
                        .operation("chmod")
                        .known(KnownError::PermissionDenied)
                        .path("locked"),
                );
                self.check_failure(report, "chmod_by_non_owner", &expect, &actual);
            }
            _ => {
                report.record("chmod_target_is_directory", Verdict::NotApplicable);
                report.record("chmod_by_non_owner", Verdict::NotApplicable);
            }
        }

        // mkdir beneath a read-only directory
        let readonly = base.join("readonly");
        fs.mkdir(admin, &readonly, Mode::MAX_PERM)?;
        fs.chmod(admin, &readonly, Mode::new(0o555))?;
        match actor {
            Some(actor) => {
                let outcome = fs.mkdir(actor, &readonly.join("child"), Mode::new(0o755));
                let expect = Expectation::failure("mkdir", KnownError::PermissionDenied);
                self.check(report, "mkdir_under_readonly_by_non_owner", &expect, &outcome);
            }
            None => report.record("mkdir_under_readonly_by_non_owner", Verdict::NotApplicable),
        }
        if admin.admin {
            let outcome = fs.mkdir(admin, &readonly.join("child"), Mode::new(0o755));
            self.check(report, "mkdir_under_readonly_by_admin", &Expectation::no_failure(), &outcome);
        } else {
            report.record("mkdir_under_readonly_by_admin", Verdict::NotApplicable);
        }

        // removing a populated directory
        let full = base.join("full");
        fs.mkdir(admin, &full, Mode::new(0o755))?;
        fs.write_file(admin, &full.join("f"), b"x", Mode::new(0o644))?;
        let outcome = fs.remove(admin, &full);
        let expect = Expectation::failure("remove", KnownError::DirNotEmpty);
        self.check(report, "remove_populated_directory", &expect, &outcome);

        fs.remove(admin, &full.join("f"))?;
        let outcome = fs.remove(admin, &full);
        self.check(report, "remove_emptied_directory", &Expectation::no_failure(), &outcome);
        let outcome = fs.stat(admin, &full);
        let expect = Expectation::failure("stat", KnownError::NoSuchFileOrDir);
        self.check(report, "stat_removed_directory", &expect, &outcome);

        self.chroot_scenario(report, base, actor)?;

        // sample tree
        let sample_root = base.join("sample");
        fs.mkdir(admin, &sample_root, Mode::new(0o755))?;
        fs.chmod(admin, &sample_root, Mode::new(0o755))?;
        if self.caps.symlinks {
            let tree = SampleTree::catalog();
            let nodes = tree.materialize(fs, admin, &sample_root, self.config.fixture_umask)?;
            let problems = SampleTree::verify(fs, admin, &sample_root, &nodes);
            report.record(
                "sample_tree",
                Verdict::check(problems.is_empty(), problems.join("; ")),
            );
        } else {
            report.record("sample_tree", Verdict::NotApplicable);
        }
        Ok(())
    }

    fn chroot_scenario(&self, report: &mut ScenarioReport, base: &Path, actor: Option<&IdentityContext>) -> Result<()> {
        let fs = self.fs.as_ref();
        let admin = &self.admin;
        if !self.caps.chroot || !admin.admin {
            report.record("chroot_by_admin", Verdict::NotApplicable);
            report.record("chroot_by_non_admin", Verdict::NotApplicable);
            return Ok(());
        }

        let jail = base.join("jail");
        fs.mkdir(admin, &jail, Mode::new(0o755))?;
        fs.write_file(admin, &jail.join("inside"), b"jailed", Mode::new(0o644))?;

        if let Some(actor) = actor {
            let guard = SavedRoot::new(fs, admin)?;
            let outcome = fs.chroot(actor, &jail);
            guard.restore()?;
            let expect = Expectation::failure("chroot", KnownError::OpNotPermitted);
            self.check(report, "chroot_by_non_admin", &expect, &outcome);
        } else {
            report.record("chroot_by_non_admin", Verdict::NotApplicable);
        }

        let guard = SavedRoot::new(fs, admin)?;
        let verdict = match fs.chroot(admin, &jail) {
            Ok(()) => {
                let jailed = fs.read_file(admin, Path::new("/inside"));
                Verdict::check(
                    matches!(jailed.as_deref(), Ok(b"jailed")),
                    format!("reading /inside after chroot: {:?}", jailed.map(|_| ())),
                )
            }
            Err(e) => Verdict::fail(format!("chroot failed: {}", e)),
        };
        guard.restore()?;
        report.record("chroot_by_admin", verdict);

        let outcome = fs.stat(admin, &jail.join("inside"));
        self.check(report, "root_restored_after_chroot", &Expectation::no_failure(), &outcome);
        Ok(())
    }

    /// Identity-management conformance: error kinds, id allocation,
    /// membership and identity switching.
    pub fn run_identity_conformance(&self) -> Result<ScenarioReport> {
        let mut report = ScenarioReport::default();
        if !self.caps.manages_identities() {
            self.identity_degradation(&mut report);
            return Ok(report);
        }

        let mut users = Vec::new();
        let mut groups = Vec::new();
        let result = self.identity_checks(&mut report, &mut users, &mut groups);

        let ids = self.ids.as_ref();
        for user in users.iter().rev() {
            if let Err(e) = ids.del_user(&self.admin, user) {
                debug!(user = %user, error = %e, "user already gone");
            }
        }
        for group in groups.iter().rev() {
            if let Err(e) = ids.del_group(&self.admin, group) {
                debug!(group = %group, error = %e, "group already gone");
            }
        }
        result?;

        info!(
            passed = report.passed(),
            failed = report.failures().len(),
            "finished identity conformance"
        );
        Ok(report)
    }

    fn identity_checks(
        &self,
        report: &mut ScenarioReport,
        users: &mut Vec<String>,
        groups: &mut Vec<String>,
    ) -> Result<()> {
        let ids = self.ids.as_ref();
        let admin = &self.admin;
        let name = |label: &str| self.config.synthetic_name(label);
        let (g1, g2, u1, u2, u3) = (name("ig1"), name("ig2"), name("iu1"), name("iu2"), name("iu3"));

        let outcome = ids.add_group(admin, "");
        self.check(report, "add_group_empty_name", &Expectation::identity(IdentityErrorKind::InvalidName), &outcome);

        let first = ids.add_group(admin, &g1)?;
        groups.push(g1.clone());
        let second = ids.add_group(admin, &g2)?;
        groups.push(g2.clone());
        report.record(
            "group_ids_increase",
            Verdict::check(second.gid > first.gid, format!("gid {} after {}", second.gid, first.gid)),
        );

        let outcome = ids.add_group(admin, &g1);
        self.check(report, "add_duplicate_group", &Expectation::identity(IdentityErrorKind::AlreadyExistsGroup), &outcome);
        let outcome = ids.del_group(admin, &name("missing"));
        self.check(report, "del_unknown_group", &Expectation::identity(IdentityErrorKind::UnknownGroup), &outcome);
        let outcome = ids.add_user(admin, &u1, &name("missing"));
        self.check(report, "add_user_unknown_group", &Expectation::identity(IdentityErrorKind::UnknownGroup), &outcome);

        let alice = ids.add_user(admin, &u1, &g1)?;
        users.push(u1.clone());
        let bob = ids.add_user(admin, &u2, &g1)?;
        users.push(u2.clone());
        report.record(
            "user_ids_increase",
            Verdict::check(bob.uid > alice.uid, format!("uid {} after {}", bob.uid, alice.uid)),
        );
        let outcome = ids.add_user(admin, &u1, &g1);
        self.check(report, "add_duplicate_user", &Expectation::identity(IdentityErrorKind::AlreadyExistsUser), &outcome);

        ids.del_user(admin, &u2)?;
        let carol = ids.add_user(admin, &u3, &g1)?;
        users.push(u3.clone());
        report.record(
            "deleted_ids_not_reused",
            Verdict::check(carol.uid > bob.uid, format!("uid {} reused after {}", carol.uid, bob.uid)),
        );

        let by_name = ids.lookup_user(&u1)?;
        let by_id = ids.lookup_user_by_id(alice.uid)?;
        report.record(
            "lookup_user",
            Verdict::check(by_name == alice && by_id == alice, format!("{:?} / {:?}", by_name, by_id)),
        );
        let group_by_id = ids.lookup_group_by_id(first.gid)?;
        report.record(
            "lookup_group",
            Verdict::check(group_by_id.name == g1, format!("gid {} resolved to {}", first.gid, group_by_id.name)),
        );
        let outcome = ids.lookup_user(&u2);
        self.check(report, "lookup_deleted_user", &Expectation::identity(IdentityErrorKind::UnknownUser), &outcome);
        let outcome = ids.lookup_group_by_id(u32::MAX);
        self.check(report, "lookup_unknown_gid", &Expectation::identity(IdentityErrorKind::UnknownGroupId), &outcome);

        ids.add_user_to_group(admin, &u1, &g2)?;
        let ctx = ids.set_active_identity(admin, &u1)?;
        report.record(
            "membership_in_context",
            Verdict::check(ctx.in_group(second.gid), format!("groups {:?} lack {}", ctx.groups, second.gid)),
        );
        ids.remove_user_from_group(admin, &u1, &g2)?;
        let ctx = ids.set_active_identity(admin, &u1)?;
        report.record(
            "membership_removed",
            Verdict::check(!ctx.groups.contains(&second.gid), format!("groups {:?} still hold {}", ctx.groups, second.gid)),
        );

        ids.set_primary_group(admin, &u1, &g2)?;
        let primary = ids.primary_group(&u1)?;
        report.record(
            "set_primary_group",
            Verdict::check(primary.gid == second.gid, format!("primary group is {}", primary.name)),
        );

        let outcome = ids.set_active_identity(&ctx, &u3);
        self.check(report, "switch_identity_without_admin", &Expectation::identity(IdentityErrorKind::PermissionDenied), &outcome);
        let outcome = ids.set_active_identity(admin, &name("nobody"));
        self.check(report, "switch_to_unknown_user", &Expectation::identity(IdentityErrorKind::UnknownUser), &outcome);
        let outcome = ids.add_group(&ctx, &name("ig3"));
        self.check(report, "add_group_without_admin", &Expectation::identity(IdentityErrorKind::PermissionDenied), &outcome);

        let outcome = ids.del_group(admin, &g1);
        self.check(report, "del_group_in_use", &Expectation::identity(IdentityErrorKind::GroupInUse), &outcome);
        Ok(())
    }

    /// Without identity management every mutation must be refused.
    fn identity_degradation(&self, report: &mut ScenarioReport) {
        let ids = self.ids.as_ref();
        let admin = &self.admin;
        let denied = Expectation::identity(IdentityErrorKind::PermissionDenied);
        let group = self.config.synthetic_name("deg");
        info!(support = ?self.caps.identity, "checking identity degradation");

        let outcome = ids.add_group(admin, &group);
        self.check(report, "add_group_refused", &denied, &outcome);
        let outcome = ids.add_user(admin, &group, &group);
        self.check(report, "add_user_refused", &denied, &outcome);
        let outcome = ids.del_user(admin, &group);
        self.check(report, "del_user_refused", &denied, &outcome);
        let outcome = ids.set_primary_group(admin, &admin.user, &group);
        self.check(report, "set_primary_group_refused", &denied, &outcome);

        if self.caps.identity == IdentitySupport::None {
            let outcome = ids.lookup_user(&admin.user);
            self.check(report, "lookup_refused", &denied, &outcome);
        } else {
            // uid 0 is present in every account database.
            let outcome = ids.lookup_user_by_id(0);
            self.check(report, "lookup_superuser", &Expectation::no_failure(), &outcome);
        }
    }

    /// Directory the scenarios build fixtures under.
    pub fn scenario_root(&self) -> PathBuf {
        self.config.fixture_root.join("scenarios")
    }
}
