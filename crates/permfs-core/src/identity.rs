//! Identities: who an operation runs as, and the backend that manages them

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::IdentityResult;

/// The identity an operation executes under.
///
/// Passed explicitly to every backend call instead of living in process
/// state, so two contexts can coexist within one test.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityContext {
    pub user: String,
    pub uid: u32,
    pub gid: u32,
    /// Supplementary groups, primary group included.
    pub groups: Vec<u32>,
    pub admin: bool,
}

impl IdentityContext {
    /// The conventional superuser.
    pub fn root() -> Self {
        Self {
            user: "root".to_string(),
            uid: 0,
            gid: 0,
            groups: vec![0],
            admin: true,
        }
    }

    pub fn in_group(&self, gid: u32) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }
}

/// A synthetic (or host) user account
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub uid: u32,
    pub primary_gid: u32,
    pub admin: bool,
    pub home: Option<PathBuf>,
}

/// A synthetic (or host) group
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub gid: u32,
    /// Explicit members; users whose primary group this is are not listed.
    pub members: Vec<u32>,
}

/// How much identity management a backend offers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentitySupport {
    /// No identity management at all; every call is denied.
    None,
    /// Lookups work, mutations are denied.
    ReadOnly,
    Full,
}

/// Identity-management backend.
///
/// Mutations take the calling identity and are denied with
/// `PermissionDenied` for non-admin callers, for read-only backends and for
/// backends without identity support.
pub trait IdentityBackend: Send + Sync {
    fn support(&self) -> IdentitySupport;

    /// Context for the privileged identity used to build fixtures.
    fn admin_context(&self) -> IdentityResult<IdentityContext>;

    fn add_user(&self, caller: &IdentityContext, name: &str, primary_group: &str) -> IdentityResult<User>;
    fn add_group(&self, caller: &IdentityContext, name: &str) -> IdentityResult<Group>;
    fn del_user(&self, caller: &IdentityContext, name: &str) -> IdentityResult<()>;
    fn del_group(&self, caller: &IdentityContext, name: &str) -> IdentityResult<()>;

    fn lookup_user(&self, name: &str) -> IdentityResult<User>;
    fn lookup_user_by_id(&self, uid: u32) -> IdentityResult<User>;
    fn lookup_group(&self, name: &str) -> IdentityResult<Group>;
    fn lookup_group_by_id(&self, gid: u32) -> IdentityResult<Group>;

    fn add_user_to_group(&self, caller: &IdentityContext, user: &str, group: &str) -> IdentityResult<()>;
    fn remove_user_from_group(&self, caller: &IdentityContext, user: &str, group: &str) -> IdentityResult<()>;
    fn primary_group(&self, user: &str) -> IdentityResult<Group>;
    fn set_primary_group(&self, caller: &IdentityContext, user: &str, group: &str) -> IdentityResult<()>;

    /// Build the context for `name`. A non-admin caller may only switch to
    /// itself.
    fn set_active_identity(&self, caller: &IdentityContext, name: &str) -> IdentityResult<IdentityContext>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_context_is_admin() {
        let root = IdentityContext::root();
        assert!(root.admin);
        assert_eq!(root.uid, 0);
        assert!(root.in_group(0));
        assert!(!root.in_group(100));
    }
}
