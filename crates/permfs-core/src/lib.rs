//! permfs core: shared vocabulary for permission conformance testing
//!
//! This crate defines the identity context operations run under, the
//! backend traits the harness drives (filesystem and identity management),
//! the error taxonomy, and the normalizer that turns native failures into
//! comparable records.

pub mod backend;
pub mod capability;
pub mod error;
pub mod identity;
pub mod normalize;
pub mod types;

// Re-export key types for convenience
pub use backend::{FsBackend, FsCapabilities, RootToken};
pub use capability::Capabilities;
pub use error::{
    ErrorIdentity, FsError, FsResult, IdentityError, IdentityErrorKind, IdentityResult, KnownError,
};
pub use identity::{Group, IdentityBackend, IdentityContext, IdentitySupport, User};
pub use normalize::{join_root, normalize, strip_root, FailureKind, NativeFailure, NormalizedFailure};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IdentityError::PermissionDenied;
        assert_eq!(err.to_string(), "permission denied");
    }

    #[test]
    fn test_platform_detection() {
        let platform = Platform::current();
        assert_eq!(platform.os, Os::current());
    }
}
