//! Golden oracle store
//!
//! A golden file maps `<user>/<mode>` keys to the normalized outcome the
//! trusted backend produced. The first run against a missing file records;
//! every later run replays and compares. An existing file is ground truth
//! and is never rewritten.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use permfs_core::{ErrorIdentity, FailureKind, Mode, NormalizedFailure, Os};
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use tracing::{debug, info, warn};

use crate::error::GoldenError;

/// How seriously a mismatch is taken
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Error,
    Warning,
}

/// Which record fields a replay comparison checks.
///
/// The error identity is always compared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparePolicy {
    pub check_operation: bool,
    pub check_path: bool,
    pub operation_mismatch: Severity,
}

impl Default for ComparePolicy {
    fn default() -> Self {
        Self {
            check_operation: true,
            check_path: true,
            operation_mismatch: Severity::Error,
        }
    }
}

impl ComparePolicy {
    /// Compare error identities only.
    pub fn errors_only() -> Self {
        Self {
            check_operation: false,
            check_path: false,
            ..Self::default()
        }
    }
}

/// Key of one matrix cell: `<user>/<mode as three octal digits>`
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GoldenKey(String);

impl GoldenKey {
    pub fn new(user: &str, mode: Mode) -> Self {
        Self(format!("{}/{}", user, mode.octal()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GoldenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// On-disk form of a normalized failure
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoldenRecord {
    pub kind: FailureKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,
}

impl From<&NormalizedFailure> for GoldenRecord {
    fn from(failure: &NormalizedFailure) -> Self {
        let mut record = GoldenRecord {
            kind: failure.kind(),
            operation: failure.operation().unwrap_or_default().to_string(),
            path: None,
            old: None,
            new: None,
            error_message: String::new(),
            error_code: None,
        };
        if let Some(error) = failure.error() {
            record.error_message = error.message.clone();
            record.error_code = error.code;
        }
        match failure {
            NormalizedFailure::Path { path, .. } => record.path = Some(path.clone()),
            NormalizedFailure::Link { old, new, .. } => {
                record.old = Some(old.clone());
                record.new = Some(new.clone());
            }
            _ => {}
        }
        record
    }
}

impl GoldenRecord {
    /// Rebuild the normalized failure, checking that exactly the fields
    /// of its kind are present.
    pub fn to_failure(&self, key: &str) -> Result<NormalizedFailure, GoldenError> {
        let invalid = |reason: &str| GoldenError::InvalidRecord {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        let error = ErrorIdentity {
            code: self.error_code,
            message: self.error_message.clone(),
        };

        match self.kind {
            FailureKind::NoError => Ok(NormalizedFailure::None),
            FailureKind::StringError => Ok(NormalizedFailure::Opaque { error }),
            FailureKind::PathError => {
                if self.old.is_some() || self.new.is_some() {
                    return Err(invalid("PathError record carries old/new paths"));
                }
                let path = self.path.clone().ok_or_else(|| invalid("PathError record without path"))?;
                if self.operation.is_empty() {
                    return Err(invalid("PathError record without operation"));
                }
                Ok(NormalizedFailure::Path {
                    operation: self.operation.clone(),
                    path,
                    error,
                })
            }
            FailureKind::LinkError => {
                if self.path.is_some() {
                    return Err(invalid("LinkError record carries a single path"));
                }
                let (Some(old), Some(new)) = (self.old.clone(), self.new.clone()) else {
                    return Err(invalid("LinkError record without old and new paths"));
                };
                if self.operation.is_empty() {
                    return Err(invalid("LinkError record without operation"));
                }
                Ok(NormalizedFailure::Link {
                    operation: self.operation.clone(),
                    old,
                    new,
                    error,
                })
            }
        }
    }
}

/// Whether the oracle is building a baseline or checking against one
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OracleMode {
    Record,
    Replay,
}

/// A replayed outcome that differs from the recorded one
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Discrepancy {
    pub key: GoldenKey,
    pub expected: NormalizedFailure,
    pub actual: NormalizedFailure,
    /// Record fields that differ.
    pub fields: Vec<&'static str>,
    pub severity: Severity,
}

impl Discrepancy {
    /// Line diff between the expected and actual records.
    pub fn render(&self) -> String {
        let expected = record_json(&self.expected);
        let actual = record_json(&self.actual);
        let diff = TextDiff::from_lines(&expected, &actual);

        let mut out = format!("{} ({}):\n", self.key, self.fields.join(", "));
        for change in diff.iter_all_changes() {
            let sign = match change.tag() {
                ChangeTag::Delete => "-",
                ChangeTag::Insert => "+",
                ChangeTag::Equal => " ",
            };
            out.push_str(&format!("{}{}", sign, change));
        }
        out
    }
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn record_json(failure: &NormalizedFailure) -> String {
    serde_json::to_string_pretty(&GoldenRecord::from(failure)).unwrap_or_else(|_| failure.to_string())
}

/// Compare two outcomes field by field under `policy`.
pub fn compare_failures(
    key: &GoldenKey,
    expected: &NormalizedFailure,
    actual: &NormalizedFailure,
    policy: &ComparePolicy,
) -> Option<Discrepancy> {
    let mut fields = Vec::new();
    let mut severity = Severity::Warning;

    if expected.kind() != actual.kind() {
        fields.push("kind");
        severity = Severity::Error;
    }
    let errors_match = match (expected.error(), actual.error()) {
        (Some(e), Some(a)) => e.matches(a),
        (None, None) => true,
        _ => false,
    };
    if !errors_match {
        fields.push("error");
        severity = Severity::Error;
    }
    if policy.check_operation && expected.operation() != actual.operation() {
        fields.push("operation");
        if policy.operation_mismatch == Severity::Error {
            severity = Severity::Error;
        }
    }
    if policy.check_path
        && (expected.path() != actual.path() || expected.new_path() != actual.new_path())
    {
        fields.push("path");
        severity = Severity::Error;
    }

    if fields.is_empty() {
        return None;
    }
    Some(Discrepancy {
        key: key.clone(),
        expected: expected.clone(),
        actual: actual.clone(),
        fields,
        severity,
    })
}

/// Golden file for one operation on one platform
pub struct GoldenOracle {
    path: PathBuf,
    existed: bool,
    records: BTreeMap<GoldenKey, NormalizedFailure>,
}

impl GoldenOracle {
    /// Path of the golden file for `operation` on `os` under `dir`.
    pub fn file_path(dir: &Path, operation: &str, os: Os) -> PathBuf {
        dir.join(format!("{}_{}.json", operation, os.as_str()))
    }

    /// Load the golden file for `operation`, or start an empty recorder
    /// when none exists yet.
    pub fn load(dir: &Path, operation: &str, os: Os) -> Result<Self, GoldenError> {
        let path = Self::file_path(dir, operation, os);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no golden file, recording a new baseline");
                return Ok(Self {
                    path,
                    existed: false,
                    records: BTreeMap::new(),
                });
            }
            Err(source) => return Err(GoldenError::Io { path, source }),
        };

        let raw: BTreeMap<String, GoldenRecord> = serde_json::from_str(&text)
            .map_err(|source| GoldenError::Corrupt {
                path: path.clone(),
                source,
            })?;
        let mut records = BTreeMap::new();
        for (key, record) in raw {
            let failure = record.to_failure(&key)?;
            records.insert(GoldenKey(key), failure);
        }

        debug!(path = %path.display(), entries = records.len(), "loaded golden file");
        Ok(Self {
            path,
            existed: true,
            records,
        })
    }

    pub fn mode(&self) -> OracleMode {
        if self.existed {
            OracleMode::Replay
        } else {
            OracleMode::Record
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Store `failure` under `key` unless the key is already present.
    /// Returns whether it was stored.
    pub fn record_if_absent(&mut self, key: GoldenKey, failure: NormalizedFailure) -> bool {
        if self.records.contains_key(&key) {
            return false;
        }
        self.records.insert(key, failure);
        true
    }

    pub fn lookup(&self, key: &GoldenKey) -> Result<&NormalizedFailure, GoldenError> {
        self.records.get(key).ok_or_else(|| GoldenError::NoRecording {
            key: key.to_string(),
        })
    }

    /// Compare `actual` against the recording for `key`.
    pub fn compare(
        &self,
        key: &GoldenKey,
        actual: &NormalizedFailure,
        policy: &ComparePolicy,
    ) -> Result<Option<Discrepancy>, GoldenError> {
        let expected = self.lookup(key)?;
        Ok(compare_failures(key, expected, actual, policy))
    }

    /// Write the oracle to disk if the file did not exist when loaded.
    /// Returns whether anything was written.
    pub fn persist(&self) -> Result<bool, GoldenError> {
        if self.existed {
            debug!(path = %self.path.display(), "golden file pre-existed, not persisting");
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| GoldenError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let raw: BTreeMap<&str, GoldenRecord> = self
            .records
            .iter()
            .map(|(k, v)| (k.as_str(), GoldenRecord::from(v)))
            .collect();
        let mut text = serde_json::to_string_pretty(&raw).map_err(|source| GoldenError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        text.push('\n');
        fs::write(&self.path, text).map_err(|source| GoldenError::Io {
            path: self.path.clone(),
            source,
        })?;

        if self.records.is_empty() {
            warn!(path = %self.path.display(), "persisted an empty golden file");
        }
        info!(path = %self.path.display(), entries = self.records.len(), "persisted golden file");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn denied(op: &str, path: &str) -> NormalizedFailure {
        NormalizedFailure::Path {
            operation: op.to_string(),
            path: PathBuf::from(path),
            error: ErrorIdentity::new(13, "permission denied"),
        }
    }

    #[test]
    fn key_renders_three_octal_digits() {
        assert_eq!(GoldenKey::new("owner", Mode::new(0o7)).as_str(), "owner/007");
        assert_eq!(GoldenKey::new("other", Mode::new(0o755)).as_str(), "other/755");
    }

    #[test]
    fn missing_file_records_and_existing_file_replays() {
        let dir = tempdir().unwrap();
        let mut oracle = GoldenOracle::load(dir.path(), "chmod", Os::Linux).unwrap();
        assert_eq!(oracle.mode(), OracleMode::Record);

        let key = GoldenKey::new("owner", Mode::new(0));
        assert!(oracle.record_if_absent(key.clone(), denied("chmod", "owner/000")));
        assert!(!oracle.record_if_absent(key.clone(), NormalizedFailure::None));
        assert!(oracle.persist().unwrap());

        let replay = GoldenOracle::load(dir.path(), "chmod", Os::Linux).unwrap();
        assert_eq!(replay.mode(), OracleMode::Replay);
        assert_eq!(replay.lookup(&key).unwrap(), &denied("chmod", "owner/000"));
        assert!(!replay.persist().unwrap());
    }

    #[test]
    fn persisted_file_is_keyed_json() {
        let dir = tempdir().unwrap();
        let mut oracle = GoldenOracle::load(dir.path(), "rename", Os::Linux).unwrap();
        oracle.record_if_absent(
            GoldenKey::new("member", Mode::new(0o500)),
            NormalizedFailure::Link {
                operation: "rename".to_string(),
                old: PathBuf::from("member/500/entry"),
                new: PathBuf::from("member/500/renamed"),
                error: ErrorIdentity::new(13, "permission denied"),
            },
        );
        oracle.record_if_absent(GoldenKey::new("owner", Mode::new(0o700)), NormalizedFailure::None);
        oracle.persist().unwrap();

        let text = fs::read_to_string(dir.path().join("rename_linux.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["member/500"]["kind"], "LinkError");
        assert_eq!(value["member/500"]["errorMessage"], "permission denied");
        assert_eq!(value["member/500"]["errorCode"], 13);
        assert_eq!(value["owner/700"]["kind"], "NoError");
        assert!(value["owner/700"].get("path").is_none());
    }

    #[test]
    fn corrupt_file_is_fatal() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("mkdir_linux.json"), "{ not json").unwrap();
        let err = GoldenOracle::load(dir.path(), "mkdir", Os::Linux).err().unwrap();
        assert!(matches!(err, GoldenError::Corrupt { .. }));
    }

    #[test]
    fn record_with_wrong_shape_is_rejected() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("mkdir_linux.json"),
            r#"{ "owner/000": { "kind": "PathError", "operation": "mkdir", "errorMessage": "x" } }"#,
        )
        .unwrap();
        let err = GoldenOracle::load(dir.path(), "mkdir", Os::Linux).err().unwrap();
        assert!(matches!(err, GoldenError::InvalidRecord { .. }));
    }

    #[test]
    fn replay_without_recording_fails() {
        let dir = tempdir().unwrap();
        let oracle = GoldenOracle::load(dir.path(), "stat", Os::Linux).unwrap();
        let key = GoldenKey::new("other", Mode::new(0o1));
        let err = oracle
            .compare(&key, &NormalizedFailure::None, &ComparePolicy::default())
            .unwrap_err();
        assert!(matches!(err, GoldenError::NoRecording { .. }));
    }

    #[test]
    fn comparison_honours_policy() {
        let key = GoldenKey::new("owner", Mode::new(0));
        let expected = denied("chmod", "owner/000");
        let renamed_op = denied("fchmodat", "owner/000");
        let other_path = denied("chmod", "owner/001");

        let strict = ComparePolicy::default();
        let d = compare_failures(&key, &expected, &renamed_op, &strict).unwrap();
        assert_eq!(d.fields, vec!["operation"]);
        assert_eq!(d.severity, Severity::Error);

        let lenient = ComparePolicy {
            operation_mismatch: Severity::Warning,
            ..strict
        };
        let d = compare_failures(&key, &expected, &renamed_op, &lenient).unwrap();
        assert_eq!(d.severity, Severity::Warning);

        assert!(compare_failures(&key, &expected, &other_path, &ComparePolicy::errors_only()).is_none());
        assert!(compare_failures(&key, &expected, &other_path, &strict).is_some());

        let d = compare_failures(&key, &expected, &NormalizedFailure::None, &strict).unwrap();
        assert!(d.fields.contains(&"kind"));
        assert!(d.fields.contains(&"error"));
        assert_eq!(d.severity, Severity::Error);
    }

    #[test]
    fn error_identity_compares_codes_before_messages() {
        let key = GoldenKey::new("owner", Mode::new(0));
        let expected = denied("chmod", "p");
        let same_code = NormalizedFailure::Path {
            operation: "chmod".to_string(),
            path: PathBuf::from("p"),
            error: ErrorIdentity::new(13, "Permission denied"),
        };
        assert!(compare_failures(&key, &expected, &same_code, &ComparePolicy::default()).is_none());
    }

    #[test]
    fn discrepancy_renders_a_diff() {
        let key = GoldenKey::new("owner", Mode::new(0));
        let d = compare_failures(
            &key,
            &denied("chmod", "owner/000"),
            &NormalizedFailure::None,
            &ComparePolicy::default(),
        )
        .unwrap();
        let rendered = d.render();
        assert!(rendered.starts_with("owner/000"));
        assert!(rendered.contains("-  \"kind\": \"PathError\""));
        assert!(rendered.contains("+  \"kind\": \"NoError\""));
    }
}
