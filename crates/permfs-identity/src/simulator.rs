//! In-memory identity simulator

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use permfs_core::{
    FsBackend, Group, IdentityBackend, IdentityContext, IdentityError, IdentityResult,
    IdentitySupport, Mode, Os, User,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::validate_name;

/// Simulator settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Platform whose conventions (home directories) are simulated.
    pub os: Os,
    pub first_uid: u32,
    pub first_gid: u32,
    pub admin_user: String,
    pub admin_group: String,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            os: Os::current(),
            first_uid: 1000,
            first_gid: 1000,
            admin_user: "root".to_string(),
            admin_group: "root".to_string(),
        }
    }
}

/// Where and how new users get a home directory
#[derive(Clone)]
pub struct HomeProvisioner {
    pub fs: Arc<dyn FsBackend>,
    pub root: PathBuf,
    pub mode: Mode,
}

impl HomeProvisioner {
    pub fn new(fs: Arc<dyn FsBackend>, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
            mode: Mode::new(0o700),
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }
}

struct Registry {
    users: BTreeMap<String, User>,
    groups: BTreeMap<String, Group>,
    next_uid: u32,
    next_gid: u32,
}

impl Registry {
    fn allocate_uid(&mut self) -> u32 {
        let id = self.next_uid;
        self.next_uid += 1;
        id
    }

    fn allocate_gid(&mut self) -> u32 {
        let id = self.next_gid;
        self.next_gid += 1;
        id
    }

    fn user(&self, name: &str) -> IdentityResult<&User> {
        self.users
            .get(name)
            .ok_or_else(|| IdentityError::UnknownUser(name.to_string()))
    }

    fn group(&self, name: &str) -> IdentityResult<&Group> {
        self.groups
            .get(name)
            .ok_or_else(|| IdentityError::UnknownGroup(name.to_string()))
    }

    fn group_by_id(&self, gid: u32) -> IdentityResult<&Group> {
        self.groups
            .values()
            .find(|g| g.gid == gid)
            .ok_or(IdentityError::UnknownGroupId(gid))
    }
}

/// Synthetic user/group database.
///
/// Ids handed out by `add_user`/`add_group` strictly increase over the
/// simulator's lifetime; deleted ids are never reused.
pub struct IdentitySimulator {
    config: SimulatorConfig,
    registry: Mutex<Registry>,
    home: Option<HomeProvisioner>,
}

impl Default for IdentitySimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentitySimulator {
    pub fn new() -> Self {
        Self::with_config(SimulatorConfig::default())
    }

    pub fn with_config(config: SimulatorConfig) -> Self {
        let mut users = BTreeMap::new();
        let mut groups = BTreeMap::new();
        groups.insert(
            config.admin_group.clone(),
            Group {
                name: config.admin_group.clone(),
                gid: 0,
                members: Vec::new(),
            },
        );
        users.insert(
            config.admin_user.clone(),
            User {
                name: config.admin_user.clone(),
                uid: 0,
                primary_gid: 0,
                admin: true,
                home: None,
            },
        );

        let registry = Registry {
            users,
            groups,
            next_uid: config.first_uid,
            next_gid: config.first_gid,
        };

        Self {
            config,
            registry: Mutex::new(registry),
            home: None,
        }
    }

    /// Provision a home directory for every user created from now on.
    pub fn with_home_provisioner(mut self, home: HomeProvisioner) -> Self {
        self.home = Some(home);
        self
    }

    fn require_admin(&self, caller: &IdentityContext) -> IdentityResult<()> {
        if caller.admin {
            Ok(())
        } else {
            debug!(caller = %caller.user, "identity mutation denied");
            Err(IdentityError::PermissionDenied)
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        // A panic while holding the lock leaves the maps consistent.
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn context_for(&self, registry: &Registry, user: &User) -> IdentityContext {
        let mut groups: Vec<u32> = registry
            .groups
            .values()
            .filter(|g| g.members.contains(&user.uid))
            .map(|g| g.gid)
            .collect();
        groups.push(user.primary_gid);
        groups.sort_unstable();
        groups.dedup();

        IdentityContext {
            user: user.name.clone(),
            uid: user.uid,
            gid: user.primary_gid,
            groups,
            admin: user.admin,
        }
    }

    fn provision_home(&self, user: &User) -> IdentityResult<Option<PathBuf>> {
        let Some(home) = &self.home else {
            return Ok(None);
        };
        if !self.config.os.has_home_directories() {
            debug!(user = %user.name, os = %self.config.os, "skipping home directory");
            return Ok(None);
        }

        let admin = self.admin_context()?;
        let dir = home.root.join(&user.name);
        let provision = || -> permfs_core::FsResult<()> {
            home.fs.mkdir_all(&admin, &home.root, Mode::new(0o755))?;
            home.fs.mkdir_all(&admin, &dir, home.mode)?;
            home.fs.chmod(&admin, &dir, home.mode)?;
            home.fs.chown(&admin, &dir, Some(user.uid), Some(user.primary_gid))
        };
        provision().map_err(|e| IdentityError::HomeProvisioning(e.to_string()))?;
        debug!(user = %user.name, home = %dir.display(), "provisioned home directory");
        Ok(Some(dir))
    }

    fn remove_home(&self, user: &User) {
        let (Some(home), Some(dir)) = (&self.home, &user.home) else {
            return;
        };
        let result = self
            .admin_context()
            .map_err(|e| e.to_string())
            .and_then(|admin| home.fs.remove_all(&admin, dir).map_err(|e| e.to_string()));
        if let Err(e) = result {
            warn!(user = %user.name, error = %e, "failed to remove home directory");
        }
    }

    /// Every known user, ordered by name.
    pub fn users(&self) -> Vec<User> {
        self.registry().users.values().cloned().collect()
    }

    /// Every known group, ordered by name.
    pub fn groups(&self) -> Vec<Group> {
        self.registry().groups.values().cloned().collect()
    }
}

impl IdentityBackend for IdentitySimulator {
    fn support(&self) -> IdentitySupport {
        IdentitySupport::Full
    }

    fn admin_context(&self) -> IdentityResult<IdentityContext> {
        let registry = self.registry();
        let admin = registry.user(&self.config.admin_user)?;
        Ok(self.context_for(&registry, admin))
    }

    fn add_user(&self, caller: &IdentityContext, name: &str, primary_group: &str) -> IdentityResult<User> {
        self.require_admin(caller)?;
        validate_name(name)?;
        validate_name(primary_group)?;

        let mut user = {
            let mut registry = self.registry();
            if registry.users.contains_key(name) {
                return Err(IdentityError::AlreadyExistsUser(name.to_string()));
            }
            let primary_gid = registry.group(primary_group)?.gid;
            let user = User {
                name: name.to_string(),
                uid: registry.allocate_uid(),
                primary_gid,
                admin: false,
                home: None,
            };
            registry.users.insert(name.to_string(), user.clone());
            user
        };

        match self.provision_home(&user) {
            Ok(home) => user.home = home,
            Err(e) => {
                self.registry().users.remove(name);
                return Err(e);
            }
        }
        if user.home.is_some() {
            if let Some(stored) = self.registry().users.get_mut(name) {
                stored.home = user.home.clone();
            }
        }

        info!(user = %user.name, uid = user.uid, gid = user.primary_gid, "added user");
        Ok(user)
    }

    fn add_group(&self, caller: &IdentityContext, name: &str) -> IdentityResult<Group> {
        self.require_admin(caller)?;
        validate_name(name)?;

        let mut registry = self.registry();
        if registry.groups.contains_key(name) {
            return Err(IdentityError::AlreadyExistsGroup(name.to_string()));
        }
        let group = Group {
            name: name.to_string(),
            gid: registry.allocate_gid(),
            members: Vec::new(),
        };
        registry.groups.insert(name.to_string(), group.clone());

        info!(group = %group.name, gid = group.gid, "added group");
        Ok(group)
    }

    fn del_user(&self, caller: &IdentityContext, name: &str) -> IdentityResult<()> {
        self.require_admin(caller)?;
        validate_name(name)?;

        let removed = {
            let mut registry = self.registry();
            let user = registry.user(name)?;
            if user.admin {
                return Err(IdentityError::PermissionDenied);
            }
            let uid = user.uid;
            for group in registry.groups.values_mut() {
                group.members.retain(|m| *m != uid);
            }
            registry.users.remove(name)
        };

        if let Some(user) = removed {
            self.remove_home(&user);
            info!(user = %user.name, uid = user.uid, "deleted user");
        }
        Ok(())
    }

    fn del_group(&self, caller: &IdentityContext, name: &str) -> IdentityResult<()> {
        self.require_admin(caller)?;
        validate_name(name)?;

        let mut registry = self.registry();
        let gid = registry.group(name)?.gid;
        if name == self.config.admin_group {
            return Err(IdentityError::PermissionDenied);
        }
        if registry.users.values().any(|u| u.primary_gid == gid) {
            return Err(IdentityError::GroupInUse(name.to_string()));
        }
        registry.groups.remove(name);

        info!(group = %name, gid, "deleted group");
        Ok(())
    }

    fn lookup_user(&self, name: &str) -> IdentityResult<User> {
        self.registry().user(name).cloned()
    }

    fn lookup_user_by_id(&self, uid: u32) -> IdentityResult<User> {
        self.registry()
            .users
            .values()
            .find(|u| u.uid == uid)
            .cloned()
            .ok_or(IdentityError::UnknownUserId(uid))
    }

    fn lookup_group(&self, name: &str) -> IdentityResult<Group> {
        self.registry().group(name).cloned()
    }

    fn lookup_group_by_id(&self, gid: u32) -> IdentityResult<Group> {
        self.registry().group_by_id(gid).cloned()
    }

    fn add_user_to_group(&self, caller: &IdentityContext, user: &str, group: &str) -> IdentityResult<()> {
        self.require_admin(caller)?;
        validate_name(user)?;
        validate_name(group)?;

        let mut registry = self.registry();
        let uid = registry.user(user)?.uid;
        let entry = registry
            .groups
            .get_mut(group)
            .ok_or_else(|| IdentityError::UnknownGroup(group.to_string()))?;
        if !entry.members.contains(&uid) {
            entry.members.push(uid);
        }
        debug!(user, group, "added user to group");
        Ok(())
    }

    fn remove_user_from_group(&self, caller: &IdentityContext, user: &str, group: &str) -> IdentityResult<()> {
        self.require_admin(caller)?;
        validate_name(user)?;
        validate_name(group)?;

        let mut registry = self.registry();
        let uid = registry.user(user)?.uid;
        let entry = registry
            .groups
            .get_mut(group)
            .ok_or_else(|| IdentityError::UnknownGroup(group.to_string()))?;
        entry.members.retain(|m| *m != uid);
        debug!(user, group, "removed user from group");
        Ok(())
    }

    fn primary_group(&self, user: &str) -> IdentityResult<Group> {
        let registry = self.registry();
        let gid = registry.user(user)?.primary_gid;
        registry.group_by_id(gid).cloned()
    }

    fn set_primary_group(&self, caller: &IdentityContext, user: &str, group: &str) -> IdentityResult<()> {
        self.require_admin(caller)?;
        validate_name(user)?;
        validate_name(group)?;

        let mut registry = self.registry();
        let gid = registry.group(group)?.gid;
        let entry = registry
            .users
            .get_mut(user)
            .ok_or_else(|| IdentityError::UnknownUser(user.to_string()))?;
        entry.primary_gid = gid;
        debug!(user, group, gid, "set primary group");
        Ok(())
    }

    fn set_active_identity(&self, caller: &IdentityContext, name: &str) -> IdentityResult<IdentityContext> {
        let registry = self.registry();
        let user = registry.user(name)?;
        if !caller.admin && caller.user != name {
            debug!(caller = %caller.user, target = name, "identity switch denied");
            return Err(IdentityError::PermissionDenied);
        }
        let ctx = self.context_for(&registry, user);
        debug!(user = %ctx.user, uid = ctx.uid, gid = ctx.gid, "switched active identity");
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use permfs_core::IdentityErrorKind;

    fn sim() -> (IdentitySimulator, IdentityContext) {
        let sim = IdentitySimulator::new();
        let admin = sim.admin_context().unwrap();
        (sim, admin)
    }

    #[test]
    fn ids_strictly_increase() {
        let (sim, admin) = sim();
        let mut last_gid = 0;
        let mut last_uid = 0;
        for i in 0..5 {
            let g = sim.add_group(&admin, &format!("grp{}", i)).unwrap();
            assert!(g.gid > last_gid);
            last_gid = g.gid;
            let u = sim.add_user(&admin, &format!("usr{}", i), &g.name).unwrap();
            assert!(u.uid > last_uid);
            last_uid = u.uid;
        }
    }

    #[test]
    fn deleted_ids_are_not_reused() {
        let (sim, admin) = sim();
        let g = sim.add_group(&admin, "staff").unwrap();
        let a = sim.add_user(&admin, "alice", "staff").unwrap();
        sim.del_user(&admin, "alice").unwrap();
        let b = sim.add_user(&admin, "alice", "staff").unwrap();
        assert!(b.uid > a.uid);
        assert_eq!(b.primary_gid, g.gid);
    }

    #[test]
    fn group_error_taxonomy() {
        let (sim, admin) = sim();
        assert_eq!(
            sim.add_group(&admin, "").unwrap_err().kind(),
            IdentityErrorKind::InvalidName
        );
        sim.add_group(&admin, "staff").unwrap();
        assert_eq!(
            sim.add_group(&admin, "staff").unwrap_err().kind(),
            IdentityErrorKind::AlreadyExistsGroup
        );
        assert_eq!(
            sim.del_group(&admin, "nosuch").unwrap_err().kind(),
            IdentityErrorKind::UnknownGroup
        );
    }

    #[test]
    fn user_error_taxonomy() {
        let (sim, admin) = sim();
        assert_eq!(
            sim.add_user(&admin, "bob", "nosuch").unwrap_err().kind(),
            IdentityErrorKind::UnknownGroup
        );
        sim.add_group(&admin, "staff").unwrap();
        sim.add_user(&admin, "bob", "staff").unwrap();
        assert_eq!(
            sim.add_user(&admin, "bob", "staff").unwrap_err().kind(),
            IdentityErrorKind::AlreadyExistsUser
        );
        assert_eq!(
            sim.del_user(&admin, "carol").unwrap_err().kind(),
            IdentityErrorKind::UnknownUser
        );
        assert_eq!(
            sim.lookup_user_by_id(4242).unwrap_err(),
            IdentityError::UnknownUserId(4242)
        );
        assert_eq!(
            sim.lookup_group_by_id(4242).unwrap_err(),
            IdentityError::UnknownGroupId(4242)
        );
    }

    #[test]
    fn mutations_require_admin() {
        let (sim, admin) = sim();
        sim.add_group(&admin, "staff").unwrap();
        sim.add_user(&admin, "dave", "staff").unwrap();
        let dave = sim.set_active_identity(&admin, "dave").unwrap();
        assert_eq!(
            sim.add_group(&dave, "other").unwrap_err(),
            IdentityError::PermissionDenied
        );
        assert_eq!(
            sim.del_user(&dave, "dave").unwrap_err(),
            IdentityError::PermissionDenied
        );
    }

    #[test]
    fn primary_group_cannot_be_deleted() {
        let (sim, admin) = sim();
        sim.add_group(&admin, "staff").unwrap();
        sim.add_user(&admin, "erin", "staff").unwrap();
        assert_eq!(
            sim.del_group(&admin, "staff").unwrap_err().kind(),
            IdentityErrorKind::GroupInUse
        );
        sim.del_user(&admin, "erin").unwrap();
        sim.del_group(&admin, "staff").unwrap();
    }

    #[test]
    fn membership_flows_into_context() {
        let (sim, admin) = sim();
        let staff = sim.add_group(&admin, "staff").unwrap();
        let audio = sim.add_group(&admin, "audio").unwrap();
        sim.add_user(&admin, "fay", "staff").unwrap();
        sim.add_user_to_group(&admin, "fay", "audio").unwrap();

        let ctx = sim.set_active_identity(&admin, "fay").unwrap();
        assert_eq!(ctx.gid, staff.gid);
        assert!(ctx.in_group(audio.gid));

        sim.remove_user_from_group(&admin, "fay", "audio").unwrap();
        let ctx = sim.set_active_identity(&admin, "fay").unwrap();
        assert!(!ctx.in_group(audio.gid));

        sim.set_primary_group(&admin, "fay", "audio").unwrap();
        assert_eq!(sim.primary_group("fay").unwrap().gid, audio.gid);
    }

    #[test]
    fn membership_ops_validate_names() {
        let (sim, admin) = sim();
        assert_eq!(
            sim.add_user_to_group(&admin, "", "staff").unwrap_err().kind(),
            IdentityErrorKind::InvalidName
        );
        assert_eq!(
            sim.set_primary_group(&admin, "x", "").unwrap_err().kind(),
            IdentityErrorKind::InvalidName
        );
        assert_eq!(
            sim.remove_user_from_group(&admin, "ghost", "root").unwrap_err().kind(),
            IdentityErrorKind::UnknownUser
        );
    }

    #[test]
    fn non_admin_may_only_switch_to_itself() {
        let (sim, admin) = sim();
        sim.add_group(&admin, "staff").unwrap();
        sim.add_user(&admin, "gil", "staff").unwrap();
        sim.add_user(&admin, "hal", "staff").unwrap();

        let gil = sim.set_active_identity(&admin, "gil").unwrap();
        assert!(sim.set_active_identity(&gil, "gil").is_ok());
        assert_eq!(
            sim.set_active_identity(&gil, "hal").unwrap_err(),
            IdentityError::PermissionDenied
        );
        assert_eq!(
            sim.set_active_identity(&gil, "nobody").unwrap_err().kind(),
            IdentityErrorKind::UnknownUser
        );
        assert_eq!(sim.set_active_identity(&gil, "root").unwrap_err(), IdentityError::PermissionDenied);
    }

    #[test]
    fn admin_user_cannot_be_deleted() {
        let (sim, admin) = sim();
        assert_eq!(
            sim.del_user(&admin, "root").unwrap_err(),
            IdentityError::PermissionDenied
        );
        assert_eq!(
            sim.del_group(&admin, "root").unwrap_err(),
            IdentityError::PermissionDenied
        );
    }
}
