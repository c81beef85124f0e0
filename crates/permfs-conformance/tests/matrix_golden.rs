use std::fs;
use std::path::Path;
use std::sync::Arc;

use permfs_conformance::{
    ConformanceConfig, GoldenOracle, MatrixTarget, OracleMode, Orchestrator, Severity,
};
use permfs_core::{IdentityContext, Os};
use permfs_identity::{IdentitySimulator, SimulatorConfig, UnsupportedIdentity};
use permfs_memfs::{MemFs, MemFsConfig};
use tempfile::tempdir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(golden: &Path) -> ConformanceConfig {
    ConformanceConfig {
        golden_dir: golden.to_path_buf(),
        os: Os::Linux,
        run_suffix: "t1".to_string(),
        ..ConformanceConfig::default()
    }
}

fn orchestrator(config: ConformanceConfig) -> anyhow::Result<Orchestrator> {
    let fs = Arc::new(MemFs::new(MemFsConfig::for_os(Os::Linux)));
    let ids = Arc::new(IdentitySimulator::with_config(SimulatorConfig {
        os: Os::Linux,
        ..SimulatorConfig::default()
    }));
    Ok(Orchestrator::new(fs, ids, config)?)
}

/// Rewrite one record of a golden file in place.
fn edit_record(path: &Path, key: &str, edit: impl FnOnce(&mut serde_json::Value)) -> anyhow::Result<()> {
    let mut doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    let record = doc
        .get_mut(key)
        .ok_or_else(|| anyhow::anyhow!("no record {}", key))?;
    edit(record);
    fs::write(path, serde_json::to_string_pretty(&doc)?)?;
    Ok(())
}

#[test]
fn record_then_replay_is_clean() -> anyhow::Result<()> {
    init_tracing();
    let golden = tempdir()?;

    let first = orchestrator(config(golden.path()))?.run_matrix(MatrixTarget::Chmod)?;
    assert_eq!(first.mode, Some(OracleMode::Record));
    assert_eq!(first.entries, 3 * 512);
    assert!(first.persisted);

    let file = GoldenOracle::file_path(golden.path(), "chmod", Os::Linux);
    assert!(file.exists());
    let before = fs::read_to_string(&file)?;

    let second = orchestrator(config(golden.path()))?.run_matrix(MatrixTarget::Chmod)?;
    assert_eq!(second.mode, Some(OracleMode::Replay));
    assert_eq!(second.entries, 3 * 512);
    assert!(second.is_clean(), "{:?}", second.discrepancies);
    assert!(!second.persisted);
    assert_eq!(fs::read_to_string(&file)?, before);
    Ok(())
}

#[test]
fn recorded_outcomes_reflect_roles() -> anyhow::Result<()> {
    init_tracing();
    let golden = tempdir()?;
    orchestrator(config(golden.path()))?.run_matrix(MatrixTarget::Stat)?;

    let oracle = GoldenOracle::load(golden.path(), "stat", Os::Linux)?;
    assert_eq!(oracle.len(), 3 * 512);

    let key = |role: &str, mode: u32| permfs_conformance::GoldenKey::new(role, permfs_core::Mode::new(mode));
    // Search permission on the fixture decides whether the entry is reachable.
    assert!(!oracle.lookup(&key("owner", 0o100))?.is_failure());
    assert!(!oracle.lookup(&key("member", 0o010))?.is_failure());
    assert!(!oracle.lookup(&key("other", 0o001))?.is_failure());

    let denied = oracle.lookup(&key("owner", 0o077))?;
    assert_eq!(denied.operation(), Some("stat"));
    assert_eq!(denied.path(), Some(Path::new("owner/077/entry")));
    assert_eq!(denied.error().and_then(|e| e.code), Some(13));
    Ok(())
}

#[test]
fn altered_golden_record_is_reported() -> anyhow::Result<()> {
    init_tracing();
    let golden = tempdir()?;
    orchestrator(config(golden.path()))?.run_matrix(MatrixTarget::Stat)?;

    let file = GoldenOracle::file_path(golden.path(), "stat", Os::Linux);
    edit_record(&file, "owner/000", |record| {
        record["errorCode"] = serde_json::json!(2);
        record["errorMessage"] = serde_json::json!("no such file or directory");
    })?;

    let report = orchestrator(config(golden.path()))?.run_matrix(MatrixTarget::Stat)?;
    assert_eq!(report.discrepancies.len(), 1);
    let d = &report.discrepancies[0];
    assert_eq!(d.key.as_str(), "owner/000");
    assert_eq!(d.fields, vec!["error"]);
    assert!(d.render().contains("-  \"errorCode\": 2"), "{}", d.render());
    Ok(())
}

#[test]
fn operation_mismatch_can_be_a_warning() -> anyhow::Result<()> {
    init_tracing();
    let golden = tempdir()?;
    orchestrator(config(golden.path()))?.run_matrix(MatrixTarget::Mkdir)?;

    let file = GoldenOracle::file_path(golden.path(), "mkdir", Os::Linux);
    edit_record(&file, "other/555", |record| {
        record["operation"] = serde_json::json!("mkdirat");
    })?;

    let mut lenient = config(golden.path());
    lenient.compare.operation_mismatch = Severity::Warning;
    let report = orchestrator(lenient)?.run_matrix(MatrixTarget::Mkdir)?;
    assert!(report.is_clean(), "{:?}", report.discrepancies);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].fields, vec!["operation"]);

    let strict = orchestrator(config(golden.path()))?.run_matrix(MatrixTarget::Mkdir)?;
    assert_eq!(strict.discrepancies.len(), 1);
    Ok(())
}

#[test]
fn all_matrices_record_on_memfs() -> anyhow::Result<()> {
    init_tracing();
    let golden = tempdir()?;
    let reports = orchestrator(config(golden.path()))?.run_all_matrices()?;
    assert_eq!(reports.len(), MatrixTarget::ALL.len());
    for report in &reports {
        assert!(report.skipped.is_none(), "{} skipped", report.target);
        assert!(report.persisted, "{} not persisted", report.target);
        assert!(GoldenOracle::file_path(golden.path(), report.target.name(), Os::Linux).exists());
    }

    let replayed = orchestrator(config(golden.path()))?.run_all_matrices()?;
    for report in &replayed {
        assert!(report.is_clean(), "{}: {:?}", report.target, report.discrepancies);
    }
    Ok(())
}

#[test]
fn matrix_skipped_without_identity_management() -> anyhow::Result<()> {
    init_tracing();
    let golden = tempdir()?;
    let fs = Arc::new(MemFs::new(MemFsConfig::for_os(Os::Linux)));
    let ids = Arc::new(UnsupportedIdentity::new(IdentityContext::root()));
    let orch = Orchestrator::new(fs, ids, config(golden.path()))?;

    let report = orch.run_matrix(MatrixTarget::Chmod)?;
    assert!(report.skipped.is_some());
    assert_eq!(report.entries, 0);
    assert!(!GoldenOracle::file_path(golden.path(), "chmod", Os::Linux).exists());
    Ok(())
}
