//! permfs memfs: an emulated POSIX filesystem
//!
//! [`MemFs`] keeps the whole tree in memory and enforces ownership, mode
//! bits, sticky directories and symlink resolution against the identity
//! context passed with each call. It reports failures with the codes and
//! messages of whichever platform it is configured to emulate, which makes
//! it a deterministic stand-in for a host filesystem in conformance runs.

pub mod config;
mod perm;
pub mod vfs;

pub use config::MemFsConfig;
pub use vfs::MemFs;
