//! Configuration types for conformance runs

use std::path::PathBuf;

use permfs_core::{Mode, Os};
use serde::{Deserialize, Serialize};

use crate::golden::ComparePolicy;

/// Main conformance run configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConformanceConfig {
    /// Directory holding `<operation>_<os>.json` golden files.
    pub golden_dir: PathBuf,
    /// Platform the golden files are named for.
    pub os: Os,
    pub compare: ComparePolicy,
    /// Prefix for synthetic user and group names.
    pub user_prefix: String,
    /// Per-run suffix so synthetic names never collide with a previous run.
    pub run_suffix: String,
    /// Directory on the backend under which fixtures are built.
    pub fixture_root: PathBuf,
    /// Umask the backend applies when fixtures are created.
    pub fixture_umask: Mode,
    /// Home directory root for synthetic users, if homes are provisioned.
    pub home_root: Option<PathBuf>,
    pub home_mode: Mode,
}

impl ConformanceConfig {
    /// Synthetic name `<prefix>_<label>_<suffix>`.
    pub fn synthetic_name(&self, label: &str) -> String {
        format!("{}_{}_{}", self.user_prefix, label, self.run_suffix)
    }
}

impl Default for ConformanceConfig {
    fn default() -> Self {
        Self {
            golden_dir: PathBuf::from("testdata/golden"),
            os: Os::current(),
            compare: ComparePolicy::default(),
            user_prefix: "pfs".to_string(),
            run_suffix: std::process::id().to_string(),
            fixture_root: PathBuf::from("/permfs"),
            fixture_umask: Mode::new(0o022),
            home_root: None,
            home_mode: Mode::new(0o700),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_names_carry_prefix_and_suffix() {
        let config = ConformanceConfig {
            run_suffix: "42".to_string(),
            ..ConformanceConfig::default()
        };
        assert_eq!(config.synthetic_name("owner"), "pfs_owner_42");
    }

    #[test]
    fn config_roundtrips_through_json() {
        let config = ConformanceConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: ConformanceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.fixture_umask, config.fixture_umask);
        assert_eq!(back.golden_dir, config.golden_dir);
    }
}
