//! permfs host: backends over the real operating system
//!
//! [`HostFs`] runs permission-sensitive operations against the host
//! filesystem, switching effective ids to match the caller's identity
//! context. [`HostIdentity`] exposes the host account database read-only.
//! Both are Unix-only.

#[cfg(unix)]
pub mod fs;
#[cfg(unix)]
pub mod identity;

#[cfg(unix)]
pub use fs::HostFs;
#[cfg(unix)]
pub use identity::HostIdentity;
