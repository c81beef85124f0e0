//! Error types for the conformance harness

use std::io;
use std::path::PathBuf;

use permfs_core::{FsError, IdentityError};
use thiserror::Error;

/// Golden oracle storage errors
#[derive(Error, Debug)]
pub enum GoldenError {
    #[error("golden file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt golden file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid golden record {key}: {reason}")]
    InvalidRecord { key: String, reason: String },

    #[error("no golden recording for {key}")]
    NoRecording { key: String },
}

/// Errors that abort a conformance scenario
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("golden oracle: {0}")]
    Golden(#[from] GoldenError),

    #[error("identity setup: {0}")]
    Identity(#[from] IdentityError),

    #[error("fixture setup: {0}")]
    Fixture(#[from] FsError),

    #[error("setup: {0}")]
    Setup(String),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
