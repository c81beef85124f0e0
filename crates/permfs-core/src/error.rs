//! Error types for permfs
//!
//! Three families live here: the logical error classes a permission check
//! can produce ([`KnownError`]), the native failure shapes returned by
//! filesystem backends ([`FsError`]), and the identity-management taxonomy
//! ([`IdentityError`]).

use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::Os;

/// Underlying identity of an error: a platform code when one exists, and
/// the message the platform reports for it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorIdentity {
    pub code: Option<i32>,
    pub message: String,
}

impl ErrorIdentity {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// An identity known only by its message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Codes win when both sides carry one; otherwise messages must agree.
    pub fn matches(&self, other: &ErrorIdentity) -> bool {
        match (self.code, other.code) {
            (Some(a), Some(b)) => a == b,
            _ => self.message == other.message,
        }
    }
}

impl fmt::Display for ErrorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ErrorIdentity {}

/// Logical error classes, independent of how a platform spells them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KnownError {
    PermissionDenied,
    OpNotPermitted,
    NoSuchFileOrDir,
    FileExists,
    NotADirectory,
    IsADirectory,
    DirNotEmpty,
    InvalidArgument,
    TooManyLinks,
    NotSupported,
    CrossDevice,
    // Windows-only sentinels
    WinAccessDenied,
    WinPathNotFound,
    WinPrivilegeNotHeld,
    WinDirectory,
}

impl KnownError {
    const ALL: [KnownError; 15] = [
        KnownError::PermissionDenied,
        KnownError::OpNotPermitted,
        KnownError::NoSuchFileOrDir,
        KnownError::FileExists,
        KnownError::NotADirectory,
        KnownError::IsADirectory,
        KnownError::DirNotEmpty,
        KnownError::InvalidArgument,
        KnownError::TooManyLinks,
        KnownError::NotSupported,
        KnownError::CrossDevice,
        KnownError::WinAccessDenied,
        KnownError::WinPathNotFound,
        KnownError::WinPrivilegeNotHeld,
        KnownError::WinDirectory,
    ];

    /// Platform code for this class (errno on Unix, Win32 code on Windows).
    pub fn code(self, os: Os) -> i32 {
        use KnownError::*;
        match os {
            Os::Windows => match self {
                PermissionDenied | OpNotPermitted | IsADirectory | WinAccessDenied => 5,
                NoSuchFileOrDir => 2,
                WinPathNotFound => 3,
                FileExists => 183,
                NotADirectory | WinDirectory => 267,
                DirNotEmpty => 145,
                InvalidArgument => 87,
                TooManyLinks => 1921,
                NotSupported => 50,
                CrossDevice => 17,
                WinPrivilegeNotHeld => 1314,
            },
            Os::MacOs => match self {
                TooManyLinks => 62,
                DirNotEmpty => 66,
                NotSupported => 45,
                other => other.code(Os::Linux),
            },
            Os::Linux | Os::Other => match self {
                PermissionDenied | WinAccessDenied => 13,
                OpNotPermitted | WinPrivilegeNotHeld => 1,
                NoSuchFileOrDir | WinPathNotFound => 2,
                FileExists => 17,
                NotADirectory | WinDirectory => 20,
                IsADirectory => 21,
                DirNotEmpty => 39,
                InvalidArgument => 22,
                TooManyLinks => 40,
                NotSupported => 95,
                CrossDevice => 18,
            },
        }
    }

    /// The message a platform reports for this class.
    pub fn message(self, os: Os) -> &'static str {
        use KnownError::*;
        if os == Os::Windows {
            return match self {
                PermissionDenied | OpNotPermitted | IsADirectory | WinAccessDenied => {
                    "Access is denied."
                }
                NoSuchFileOrDir => "The system cannot find the file specified.",
                WinPathNotFound => "The system cannot find the path specified.",
                FileExists => "Cannot create a file when that file already exists.",
                NotADirectory | WinDirectory => "The directory name is invalid.",
                DirNotEmpty => "The directory is not empty.",
                InvalidArgument => "The parameter is incorrect.",
                TooManyLinks => "The name of the file cannot be resolved by the system.",
                NotSupported => "The request is not supported.",
                CrossDevice => "The system cannot move the file to a different disk drive.",
                WinPrivilegeNotHeld => "A required privilege is not held by the client.",
            };
        }
        match self {
            PermissionDenied | WinAccessDenied => "permission denied",
            OpNotPermitted | WinPrivilegeNotHeld => "operation not permitted",
            NoSuchFileOrDir | WinPathNotFound => "no such file or directory",
            FileExists => "file exists",
            NotADirectory | WinDirectory => "not a directory",
            IsADirectory => "is a directory",
            DirNotEmpty => "directory not empty",
            InvalidArgument => "invalid argument",
            TooManyLinks => "too many levels of symbolic links",
            NotSupported => "operation not supported",
            CrossDevice => "invalid cross-device link",
        }
    }

    pub fn identity(self, os: Os) -> ErrorIdentity {
        ErrorIdentity::new(self.code(os), self.message(os))
    }

    /// Every identity an expectation should accept for this class on `os`.
    ///
    /// Permission failures are reported as either "access denied" or
    /// "operation not permitted" depending on which check fires first, so
    /// both count. POSIX also lets `rmdir` report a non-empty directory as
    /// already existing.
    pub fn acceptable(self, os: Os) -> Vec<ErrorIdentity> {
        use KnownError::*;
        let classes: &[KnownError] = match (self, os) {
            (PermissionDenied | OpNotPermitted, Os::Windows) => {
                &[WinAccessDenied, WinPrivilegeNotHeld]
            }
            (PermissionDenied | OpNotPermitted, _) => &[PermissionDenied, OpNotPermitted],
            (NoSuchFileOrDir, Os::Windows) => &[NoSuchFileOrDir, WinPathNotFound],
            (NotADirectory, Os::Windows) => &[WinDirectory, WinPathNotFound],
            (DirNotEmpty, Os::Windows) => &[DirNotEmpty],
            (DirNotEmpty, _) => &[DirNotEmpty, FileExists],
            _ => return vec![self.identity(os)],
        };
        let mut out: Vec<ErrorIdentity> = Vec::with_capacity(classes.len());
        for class in classes {
            let id = class.identity(os);
            if !out.iter().any(|seen| seen.code == id.code) {
                out.push(id);
            }
        }
        out
    }

    /// Classify a raw platform code, preferring the portable classes.
    pub fn from_code(code: i32, os: Os) -> Option<KnownError> {
        Self::ALL.into_iter().find(|k| k.code(os) == code)
    }

    fn from_io_kind(kind: io::ErrorKind) -> Option<KnownError> {
        match kind {
            io::ErrorKind::NotFound => Some(KnownError::NoSuchFileOrDir),
            io::ErrorKind::PermissionDenied => Some(KnownError::PermissionDenied),
            io::ErrorKind::AlreadyExists => Some(KnownError::FileExists),
            io::ErrorKind::InvalidInput => Some(KnownError::InvalidArgument),
            io::ErrorKind::Unsupported => Some(KnownError::NotSupported),
            _ => None,
        }
    }
}

/// Identity of an `io::Error` as reported on the current platform.
pub fn io_identity(err: &io::Error) -> ErrorIdentity {
    let os = Os::current();
    if let Some(code) = err.raw_os_error() {
        let message = match KnownError::from_code(code, os) {
            Some(known) => known.message(os).to_string(),
            None => strip_os_error_suffix(&err.to_string()),
        };
        return ErrorIdentity::new(code, message);
    }
    match KnownError::from_io_kind(err.kind()) {
        Some(known) => known.identity(os),
        None => ErrorIdentity::message(err.to_string()),
    }
}

fn strip_os_error_suffix(message: &str) -> String {
    match message.rfind(" (os error ") {
        Some(idx) => message[..idx].to_string(),
        None => message.to_string(),
    }
}

/// Native filesystem failure, in one of the three shapes backends report.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("{op} {}: {source}", .path.display())]
    Path {
        op: String,
        path: PathBuf,
        #[source]
        source: ErrorIdentity,
    },
    #[error("{op} {} {}: {source}", .old.display(), .new.display())]
    Link {
        op: String,
        old: PathBuf,
        new: PathBuf,
        #[source]
        source: ErrorIdentity,
    },
    #[error("{0}")]
    Other(String),
}

impl FsError {
    pub fn path(op: impl Into<String>, path: impl Into<PathBuf>, source: ErrorIdentity) -> Self {
        Self::Path {
            op: op.into(),
            path: path.into(),
            source,
        }
    }

    pub fn link(
        op: impl Into<String>,
        old: impl Into<PathBuf>,
        new: impl Into<PathBuf>,
        source: ErrorIdentity,
    ) -> Self {
        Self::Link {
            op: op.into(),
            old: old.into(),
            new: new.into(),
            source,
        }
    }

    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other(message.into())
    }

    /// Wrap a host `io::Error` raised by a single-path operation.
    pub fn from_io(op: &str, path: impl Into<PathBuf>, err: &io::Error) -> Self {
        Self::path(op, path, io_identity(err))
    }

    /// Wrap a host `io::Error` raised by a two-path operation.
    pub fn from_io_link(
        op: &str,
        old: impl Into<PathBuf>,
        new: impl Into<PathBuf>,
        err: &io::Error,
    ) -> Self {
        Self::link(op, old, new, io_identity(err))
    }

    pub fn identity(&self) -> ErrorIdentity {
        match self {
            Self::Path { source, .. } | Self::Link { source, .. } => source.clone(),
            Self::Other(message) => ErrorIdentity::message(message.clone()),
        }
    }

    /// Whether this failure belongs to the given class on `os`.
    pub fn is(&self, known: KnownError, os: Os) -> bool {
        let id = self.identity();
        known.acceptable(os).iter().any(|want| want.matches(&id))
    }
}

pub type FsResult<T> = Result<T, FsError>;

/// Stable, payload-free discriminant of an [`IdentityError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityErrorKind {
    InvalidName,
    AlreadyExistsUser,
    AlreadyExistsGroup,
    UnknownUser,
    UnknownGroup,
    UnknownUserId,
    UnknownGroupId,
    PermissionDenied,
    GroupInUse,
    HomeProvisioning,
}

impl IdentityErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidName => "InvalidName",
            Self::AlreadyExistsUser => "AlreadyExistsUser",
            Self::AlreadyExistsGroup => "AlreadyExistsGroup",
            Self::UnknownUser => "UnknownUser",
            Self::UnknownGroup => "UnknownGroup",
            Self::UnknownUserId => "UnknownUserId",
            Self::UnknownGroupId => "UnknownGroupId",
            Self::PermissionDenied => "PermissionDenied",
            Self::GroupInUse => "GroupInUse",
            Self::HomeProvisioning => "HomeProvisioning",
        }
    }

    /// Identity used when an identity failure is normalized.
    pub fn identity(self) -> ErrorIdentity {
        ErrorIdentity::message(self.as_str())
    }
}

/// Identity-management error taxonomy
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("invalid name: {0:?}")]
    InvalidName(String),
    #[error("user already exists: {0}")]
    AlreadyExistsUser(String),
    #[error("group already exists: {0}")]
    AlreadyExistsGroup(String),
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error("unknown group: {0}")]
    UnknownGroup(String),
    #[error("unknown user id: {0}")]
    UnknownUserId(u32),
    #[error("unknown group id: {0}")]
    UnknownGroupId(u32),
    #[error("permission denied")]
    PermissionDenied,
    #[error("group {0} is still a primary group")]
    GroupInUse(String),
    #[error("home directory provisioning failed: {0}")]
    HomeProvisioning(String),
}

impl IdentityError {
    pub fn kind(&self) -> IdentityErrorKind {
        match self {
            Self::InvalidName(_) => IdentityErrorKind::InvalidName,
            Self::AlreadyExistsUser(_) => IdentityErrorKind::AlreadyExistsUser,
            Self::AlreadyExistsGroup(_) => IdentityErrorKind::AlreadyExistsGroup,
            Self::UnknownUser(_) => IdentityErrorKind::UnknownUser,
            Self::UnknownGroup(_) => IdentityErrorKind::UnknownGroup,
            Self::UnknownUserId(_) => IdentityErrorKind::UnknownUserId,
            Self::UnknownGroupId(_) => IdentityErrorKind::UnknownGroupId,
            Self::PermissionDenied => IdentityErrorKind::PermissionDenied,
            Self::GroupInUse(_) => IdentityErrorKind::GroupInUse,
            Self::HomeProvisioning(_) => IdentityErrorKind::HomeProvisioning,
        }
    }
}

pub type IdentityResult<T> = Result<T, IdentityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_accepts_eacces_and_eperm() {
        let accepted = KnownError::PermissionDenied.acceptable(Os::Linux);
        let codes: Vec<_> = accepted.iter().filter_map(|id| id.code).collect();
        assert_eq!(codes, vec![13, 1]);
    }

    #[test]
    fn windows_spells_errors_differently() {
        assert_eq!(KnownError::DirNotEmpty.code(Os::Windows), 145);
        assert_eq!(KnownError::DirNotEmpty.code(Os::MacOs), 66);
        assert_eq!(KnownError::DirNotEmpty.code(Os::Linux), 39);
        assert_eq!(
            KnownError::PermissionDenied.message(Os::Windows),
            "Access is denied."
        );
    }

    #[test]
    fn identity_matches_by_code_then_message() {
        let a = ErrorIdentity::new(13, "permission denied");
        let b = ErrorIdentity::new(13, "Permission denied");
        let c = ErrorIdentity::message("permission denied");
        assert!(a.matches(&b));
        assert!(a.matches(&c));
        assert!(!b.matches(&c));
    }

    #[test]
    fn from_code_prefers_portable_class() {
        assert_eq!(
            KnownError::from_code(5, Os::Windows),
            Some(KnownError::PermissionDenied)
        );
        assert_eq!(KnownError::from_code(39, Os::Linux), Some(KnownError::DirNotEmpty));
        assert_eq!(KnownError::from_code(9999, Os::Linux), None);
    }

    #[test]
    fn io_identity_strips_os_suffix() {
        let err = io::Error::from_raw_os_error(KnownError::NoSuchFileOrDir.code(Os::current()));
        let id = io_identity(&err);
        assert_eq!(id.message, KnownError::NoSuchFileOrDir.message(Os::current()));
    }

    #[test]
    fn fs_error_display_includes_op_and_path() {
        let err = FsError::path(
            "chmod",
            "/tmp/x",
            KnownError::PermissionDenied.identity(Os::Linux),
        );
        assert_eq!(err.to_string(), "chmod /tmp/x: permission denied");
        assert!(err.is(KnownError::PermissionDenied, Os::Linux));
        assert!(!err.is(KnownError::NoSuchFileOrDir, Os::Linux));
    }

    #[test]
    fn identity_error_kinds_are_stable() {
        let err = IdentityError::AlreadyExistsGroup("staff".into());
        assert_eq!(err.kind().as_str(), "AlreadyExistsGroup");
        assert_eq!(err.to_string(), "group already exists: staff");
    }
}
