//! Identity backend for systems without identity management

use permfs_core::{
    Group, IdentityBackend, IdentityContext, IdentityError, IdentityResult, IdentitySupport, User,
};

/// Denies every identity operation with `PermissionDenied`.
///
/// Fixtures are still built under the ambient identity the backend was
/// created with, which `admin_context` hands back.
#[derive(Clone, Debug)]
pub struct UnsupportedIdentity {
    ambient: IdentityContext,
}

impl UnsupportedIdentity {
    pub fn new(ambient: IdentityContext) -> Self {
        Self { ambient }
    }
}

impl Default for UnsupportedIdentity {
    fn default() -> Self {
        Self::new(IdentityContext::root())
    }
}

impl IdentityBackend for UnsupportedIdentity {
    fn support(&self) -> IdentitySupport {
        IdentitySupport::None
    }

    fn admin_context(&self) -> IdentityResult<IdentityContext> {
        Ok(self.ambient.clone())
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

    fn lookup_user(&self, _name: &str) -> IdentityResult<User> {
        Err(IdentityError::PermissionDenied)
    }

    fn lookup_user_by_id(&self, _uid: u32) -> IdentityResult<User> {
        Err(IdentityError::PermissionDenied)
    }

    fn lookup_group(&self, _name: &str) -> IdentityResult<Group> {
        Err(IdentityError::PermissionDenied)
    }

    fn lookup_group_by_id(&self, _gid: u32) -> IdentityResult<Group> {
        Err(IdentityError::PermissionDenied)
    }

    fn add_user_to_group(&self, _caller: &IdentityContext, _user: &str, _group: &str) -> IdentityResult<()> {
        Err(IdentityError::PermissionDenied)
    }

    fn remove_user_from_group(&self, _caller: &IdentityContext, _user: &str, _group: &str) -> IdentityResult<()> {
        Err(IdentityError::PermissionDenied)
    }

    fn primary_group(&self, _user: &str) -> IdentityResult<Group> {
        Err(IdentityError::PermissionDenied)
    }

    fn set_primary_group(&self, _caller: &IdentityContext, _user: &str, _group: &str) -> IdentityResult<()> {
        Err(IdentityError::PermissionDenied)
    }

    fn set_active_identity(&self, _caller: &IdentityContext, _name: &str) -> IdentityResult<IdentityContext> {
        Err(IdentityError::PermissionDenied)
    }
}
