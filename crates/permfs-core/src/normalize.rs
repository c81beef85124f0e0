//! Failure normalization
//!
//! Turns whatever a backend returned into a [`NormalizedFailure`]: a
//! backend- and platform-independent record of the outcome. Classification
//! only looks at what the failure carries:
//!
//! * an operation name and two paths: [`NormalizedFailure::Link`]
//! * an operation name and one path: [`NormalizedFailure::Path`]
//! * anything else: [`NormalizedFailure::Opaque`], wrapping the message
//!
//! Success normalizes to [`NormalizedFailure::None`]. Normalizing never
//! fails.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_identity, ErrorIdentity, FsError, IdentityError};

/// Shape-agnostic view of a native failure value.
pub trait NativeFailure {
    fn operation(&self) -> Option<&str> {
        None
    }
    fn primary_path(&self) -> Option<&Path> {
        None
    }
    fn secondary_path(&self) -> Option<&Path> {
        None
    }
    fn identity(&self) -> ErrorIdentity;
}

impl NativeFailure for FsError {
    fn operation(&self) -> Option<&str> {
        match self {
            FsError::Path { op, .. } | FsError::Link { op, .. } => Some(op),
            FsError::Other(_) => None,
        }
    }

    fn primary_path(&self) -> Option<&Path> {
        match self {
            FsError::Path { path, .. } => Some(path),
            FsError::Link { old, .. } => Some(old),
            FsError::Other(_) => None,
        }
    }

    fn secondary_path(&self) -> Option<&Path> {
        match self {
            FsError::Link { new, .. } => Some(new),
            _ => None,
        }
    }

    fn identity(&self) -> ErrorIdentity {
        FsError::identity(self)
    }
}

impl NativeFailure for io::Error {
    fn identity(&self) -> ErrorIdentity {
        io_identity(self)
    }
}

impl NativeFailure for IdentityError {
    fn identity(&self) -> ErrorIdentity {
        self.kind().identity()
    }
}

/// Kind tag of a normalized record, as stored in golden files
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    PathError,
    LinkError,
    StringError,
    NoError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::PathError => "PathError",
            FailureKind::LinkError => "LinkError",
            FailureKind::StringError => "StringError",
            FailureKind::NoError => "NoError",
        };
        f.write_str(s)
    }
}

/// Uniform record of an operation outcome
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NormalizedFailure {
    None,
    Path {
        operation: String,
        path: PathBuf,
        error: ErrorIdentity,
    },
    Link {
        operation: String,
        old: PathBuf,
        new: PathBuf,
        error: ErrorIdentity,
    },
    Opaque {
        error: ErrorIdentity,
    },
}

impl NormalizedFailure {
    pub fn from_failure<E: NativeFailure + ?Sized>(err: &E) -> Self {
        let error = err.identity();
        let operation = err.operation().filter(|op| !op.is_empty());
        match (operation, err.primary_path(), err.secondary_path()) {
            (Some(op), Some(old), Some(new)) => NormalizedFailure::Link {
                operation: op.to_string(),
                old: old.to_path_buf(),
                new: new.to_path_buf(),
                error,
            },
            (Some(op), Some(path), None) => NormalizedFailure::Path {
                operation: op.to_string(),
                path: path.to_path_buf(),
                error,
            },
            _ => NormalizedFailure::Opaque { error },
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            NormalizedFailure::None => FailureKind::NoError,
            NormalizedFailure::Path { .. } => FailureKind::PathError,
            NormalizedFailure::Link { .. } => FailureKind::LinkError,
            NormalizedFailure::Opaque { .. } => FailureKind::StringError,
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, NormalizedFailure::None)
    }

    pub fn operation(&self) -> Option<&str> {
        match self {
            NormalizedFailure::Path { operation, .. } | NormalizedFailure::Link { operation, .. } => {
                Some(operation)
            }
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorIdentity> {
        match self {
            NormalizedFailure::None => None,
            NormalizedFailure::Path { error, .. }
            | NormalizedFailure::Link { error, .. }
            | NormalizedFailure::Opaque { error } => Some(error),
        }
    }

    /// The single path of a path failure, or the old path of a link failure.
    pub fn path(&self) -> Option<&Path> {
        match self {
            NormalizedFailure::Path { path, .. } => Some(path),
            NormalizedFailure::Link { old, .. } => Some(old),
            _ => None,
        }
    }

    pub fn new_path(&self) -> Option<&Path> {
        match self {
            NormalizedFailure::Link { new, .. } => Some(new),
            _ => None,
        }
    }

    /// Rewrite every path relative to `root`.
    pub fn relative_to(self, root: &Path) -> Self {
        match self {
            NormalizedFailure::Path {
                operation,
                path,
                error,
            } => NormalizedFailure::Path {
                operation,
                path: strip_root(root, &path),
                error,
            },
            NormalizedFailure::Link {
                operation,
                old,
                new,
                error,
            } => NormalizedFailure::Link {
                operation,
                old: strip_root(root, &old),
                new: strip_root(root, &new),
                error,
            },
            other => other,
        }
    }
}

impl fmt::Display for NormalizedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizedFailure::None => f.write_str("<no failure>"),
            NormalizedFailure::Path {
                operation,
                path,
                error,
            } => write!(f, "{} {}: {}", operation, path.display(), error),
            NormalizedFailure::Link {
                operation,
                old,
                new,
                error,
            } => write!(f, "{} {} {}: {}", operation, old.display(), new.display(), error),
            NormalizedFailure::Opaque { error } => write!(f, "{}", error),
        }
    }
}

/// Normalize the outcome of a backend call.
pub fn normalize<T, E: NativeFailure>(outcome: &Result<T, E>) -> NormalizedFailure {
    match outcome {
        Ok(_) => NormalizedFailure::None,
        Err(err) => NormalizedFailure::from_failure(err),
    }
}

/// Path of `path` relative to `root`; paths outside `root` come back
/// unchanged.
pub fn strip_root(root: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix(root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => path.to_path_buf(),
    }
}

/// Inverse of [`strip_root`].
pub fn join_root(root: &Path, rel: &Path) -> PathBuf {
    if rel.as_os_str().is_empty() {
        root.to_path_buf()
    } else {
        root.join(rel)
    }
}
