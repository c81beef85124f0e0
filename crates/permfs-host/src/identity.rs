//! Read-only view of the host's user and group database

use nix::unistd::{self, getegid, geteuid, Gid, Uid};
use permfs_core::{
    Group, IdentityBackend, IdentityContext, IdentityError, IdentityResult, IdentitySupport, User,
};
use tracing::debug;

fn to_user(user: unistd::User) -> User {
    User {
        name: user.name,
        uid: user.uid.as_raw(),
        primary_gid: user.gid.as_raw(),
        admin: user.uid.is_root(),
        home: Some(user.dir),
    }
}

fn to_group(group: unistd::Group) -> Group {
    let mut members: Vec<u32> = group
        .mem
        .iter()
        .filter_map(|name| unistd::User::from_name(name).ok().flatten())
        .map(|u| u.uid.as_raw())
        .collect();
    members.sort_unstable();
    members.dedup();
    Group {
        name: group.name,
        gid: group.gid.as_raw(),
        members,
    }
}

/// Host accounts, queried through the system's passwd and group databases.
///
/// Lookups and identity switches work; every mutation is refused with
/// `PermissionDenied` so conformance runs never touch real accounts.
#[derive(Clone, Debug, Default)]
pub struct HostIdentity;

impl HostIdentity {
    pub fn new() -> Self {
        Self
    }

    fn context(user: &User) -> IdentityContext {
        IdentityContext {
            user: user.name.clone(),
            uid: user.uid,
            gid: user.primary_gid,
            groups: vec![user.primary_gid],
            admin: user.admin,
        }
    }
}

impl IdentityBackend for HostIdentity {
    fn support(&self) -> IdentitySupport {
        IdentitySupport::ReadOnly
    }

    /// The process's effective identity.
    fn admin_context(&self) -> IdentityResult<IdentityContext> {
        let euid = geteuid();
        let egid = getegid().as_raw();
        let name = unistd::User::from_uid(euid)
            .ok()
            .flatten()
            .map(|u| u.name)
            .unwrap_or_else(|| euid.as_raw().to_string());
        Ok(IdentityContext {
            user: name,
            uid: euid.as_raw(),
            gid: egid,
            groups: vec![egid],
            admin: euid.is_root(),
        })
    }

    fn add_user(&self, _caller: &IdentityContext, _name: &str, _primary_group: &str) -> IdentityResult<User> {
        Err(IdentityError::PermissionDenied)
    }

    fn add_group(&self, _caller: &IdentityContext, _name: &str) -> IdentityResult<Group> {
        Err(IdentityError::PermissionDenied)
    }

    fn del_user(&self, _caller: &IdentityContext, _name: &str) -> IdentityResult<()> {
        Err(IdentityError::PermissionDenied)
    }

    fn del_group(&self, _caller: &IdentityContext, _name: &str) -> IdentityResult<()> {
        Err(IdentityError::PermissionDenied)
    }

    fn lookup_user(&self, name: &str) -> IdentityResult<User> {
        unistd::User::from_name(name)
            .ok()
            .flatten()
            .map(to_user)
            .ok_or_else(|| IdentityError::UnknownUser(name.to_string()))
    }

    fn lookup_user_by_id(&self, uid: u32) -> IdentityResult<User> {
        unistd::User::from_uid(Uid::from_raw(uid))
            .ok()
            .flatten()
            .map(to_user)
            .ok_or(IdentityError::UnknownUserId(uid))
    }

    fn lookup_group(&self, name: &str) -> IdentityResult<Group> {
        unistd::Group::from_name(name)
            .ok()
            .flatten()
            .map(to_group)
            .ok_or_else(|| IdentityError::UnknownGroup(name.to_string()))
    }

    fn lookup_group_by_id(&self, gid: u32) -> IdentityResult<Group> {
        unistd::Group::from_gid(Gid::from_raw(gid))
            .ok()
            .flatten()
            .map(to_group)
            .ok_or(IdentityError::UnknownGroupId(gid))
    }

    fn add_user_to_group(&self, _caller: &IdentityContext, _user: &str, _group: &str) -> IdentityResult<()> {
        Err(IdentityError::PermissionDenied)
    }

    fn remove_user_from_group(&self, _caller: &IdentityContext, _user: &str, _group: &str) -> IdentityResult<()> {
        Err(IdentityError::PermissionDenied)
    }

    fn primary_group(&self, user: &str) -> IdentityResult<Group> {
        let gid = self.lookup_user(user)?.primary_gid;
        self.lookup_group_by_id(gid)
    }

    fn set_primary_group(&self, _caller: &IdentityContext, _user: &str, _group: &str) -> IdentityResult<()> {
        Err(IdentityError::PermissionDenied)
    }

    fn set_active_identity(&self, caller: &IdentityContext, name: &str) -> IdentityResult<IdentityContext> {
        let user = self.lookup_user(name)?;
        if !caller.admin && caller.uid != user.uid {
            return Err(IdentityError::PermissionDenied);
        }
        debug!(user = %user.name, uid = user.uid, "switching to host identity");
        Ok(Self::context(&user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutations_are_refused() {
        let ids = HostIdentity::new();
        let admin = ids.admin_context().unwrap();
        assert!(matches!(
            ids.add_group(&admin, "permfs_never"),
            Err(IdentityError::PermissionDenied)
        ));
        assert!(matches!(
            ids.del_user(&admin, "root"),
            Err(IdentityError::PermissionDenied)
        ));
    }

    #[test]
    fn root_is_always_known() {
        let ids = HostIdentity::new();
        let root = ids.lookup_user_by_id(0).unwrap();
        assert!(root.admin);
        assert_eq!(ids.lookup_user(&root.name).unwrap().uid, 0);
    }

    #[test]
    fn admin_context_reflects_effective_ids() {
        let ctx = HostIdentity::new().admin_context().unwrap();
        assert_eq!(ctx.uid, geteuid().as_raw());
        assert_eq!(ctx.admin, geteuid().is_root());
    }
}
