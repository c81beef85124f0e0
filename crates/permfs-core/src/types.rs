//! Core type definitions for permfs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Permission bits of a filesystem node (the nine rwx bits plus
/// setuid, setgid and sticky).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mode(u32);

impl Mode {
    pub const MASK: u32 = 0o7777;
    pub const SETUID: u32 = 0o4000;
    pub const SETGID: u32 = 0o2000;
    pub const STICKY: u32 = 0o1000;
    /// Largest value of the nine permission bits.
    pub const MAX_PERM: Mode = Mode(0o777);

    pub const fn new(bits: u32) -> Self {
        Self(bits & Self::MASK)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Only the nine rwx bits.
    pub const fn perm(self) -> Mode {
        Mode(self.0 & 0o777)
    }

    pub const fn is_sticky(self) -> bool {
        self.0 & Self::STICKY != 0
    }

    pub const fn apply_umask(self, umask: Mode) -> Mode {
        Mode(self.0 & !umask.0)
    }

    /// All 512 values of the nine permission bits, in ascending order.
    pub fn all_permissions() -> impl Iterator<Item = Mode> {
        (0..=Self::MAX_PERM.0).map(Mode)
    }

    /// Three-digit octal rendering used in golden keys ("007", "755").
    pub fn octal(self) -> String {
        format!("{:03o}", self.0)
    }
}

impl From<u32> for Mode {
    fn from(bits: u32) -> Self {
        Mode::new(bits)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0o{:03o}", self.0)
    }
}

impl fmt::Octal for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Octal::fmt(&self.0, f)
    }
}

/// Operating system family, as far as error reporting is concerned
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Linux,
    MacOs,
    Windows,
    Other,
}

impl Os {
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            Os::Linux
        } else if cfg!(target_os = "macos") {
            Os::MacOs
        } else if cfg!(windows) {
            Os::Windows
        } else {
            Os::Other
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::MacOs => "macos",
            Os::Windows => "windows",
            Os::Other => "other",
        }
    }

    /// Whether user home directories are a meaningful concept to provision.
    pub fn has_home_directories(self) -> bool {
        !matches!(self, Os::Windows)
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Version of the Rust toolchain (and therefore standard library) in use
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ToolchainVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ToolchainVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// The toolchain this crate was compiled with; 0.0.0 if unknown.
    pub fn current() -> Self {
        option_env!("PERMFS_RUSTC_VERSION")
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

impl FromStr for ToolchainVersion {
    type Err = String;

    /// Accepts "1.82.0", "1.82" or full `rustc --version` output.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s
            .split_whitespace()
            .find(|t| t.starts_with(|c: char| c.is_ascii_digit()))
            .ok_or_else(|| format!("no version number in {:?}", s))?;
        let core = token.split(&['-', '+'][..]).next().unwrap_or(token);
        let mut parts = core.split('.').map(|p| p.parse::<u32>());
        let mut next = |name: &str| -> Result<u32, String> {
            match parts.next() {
                Some(Ok(n)) => Ok(n),
                Some(Err(e)) => Err(format!("bad {} component in {:?}: {}", name, s, e)),
                None => Ok(0),
            }
        };
        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for ToolchainVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Half-open toolchain range: `min` inclusive, `max` exclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    pub min: Option<ToolchainVersion>,
    pub max: Option<ToolchainVersion>,
}

impl VersionRange {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn at_least(min: ToolchainVersion) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    pub fn below(max: ToolchainVersion) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    pub fn between(min: ToolchainVersion, max: ToolchainVersion) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn contains(&self, version: ToolchainVersion) -> bool {
        self.min.map_or(true, |min| version >= min) && self.max.map_or(true, |max| version < max)
    }
}

/// The environment assertions are evaluated in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os: Os,
    pub toolchain: ToolchainVersion,
}

impl Platform {
    pub fn new(os: Os, toolchain: ToolchainVersion) -> Self {
        Self { os, toolchain }
    }

    pub fn current() -> Self {
        Self::new(Os::current(), ToolchainVersion::current())
    }
}

/// Filesystem node types
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Directory,
    File,
    Symlink,
}

/// Node attributes as reported by `stat`/`lstat`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub kind: NodeKind,
    pub mode: Mode,
    pub uid: u32,
    pub gid: u32,
    pub len: u64,
    pub nlink: u32,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == NodeKind::Symlink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_octal_rendering() {
        assert_eq!(Mode::new(0o7).octal(), "007");
        assert_eq!(Mode::new(0o755).octal(), "755");
        assert_eq!(Mode::new(0o1777).to_string(), "0o1777");
    }

    #[test]
    fn all_permissions_covers_nine_bits() {
        let modes: Vec<_> = Mode::all_permissions().collect();
        assert_eq!(modes.len(), 512);
        assert_eq!(modes[0], Mode::new(0));
        assert_eq!(modes[511], Mode::MAX_PERM);
    }

    #[test]
    fn umask_clears_bits() {
        assert_eq!(Mode::new(0o777).apply_umask(Mode::new(0o022)), Mode::new(0o755));
        assert_eq!(Mode::new(0o700).apply_umask(Mode::new(0o077)), Mode::new(0o700));
    }

    #[test]
    fn parses_rustc_version_output() {
        let v: ToolchainVersion = "rustc 1.82.0 (f6e511eec 2024-10-15)".parse().unwrap();
        assert_eq!(v, ToolchainVersion::new(1, 82, 0));
        let v: ToolchainVersion = "rustc 1.84.0-nightly (abc 2024-11-01)".parse().unwrap();
        assert_eq!(v, ToolchainVersion::new(1, 84, 0));
        let v: ToolchainVersion = "1.70".parse().unwrap();
        assert_eq!(v, ToolchainVersion::new(1, 70, 0));
        assert!("unknown".parse::<ToolchainVersion>().is_err());
    }

    #[test]
    fn version_range_is_half_open() {
        let range = VersionRange::between(ToolchainVersion::new(1, 70, 0), ToolchainVersion::new(1, 80, 0));
        assert!(range.contains(ToolchainVersion::new(1, 70, 0)));
        assert!(range.contains(ToolchainVersion::new(1, 79, 9)));
        assert!(!range.contains(ToolchainVersion::new(1, 80, 0)));
        assert!(VersionRange::any().contains(ToolchainVersion::default()));
    }
}
