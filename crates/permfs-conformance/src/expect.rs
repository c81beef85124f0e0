//! Cross-platform assertions over normalized failures
//!
//! An [`Expectation`] is a list of [`Case`]s, each guarded by a
//! [`PlatformFilter`]. [`evaluate`] picks the first case whose filter
//! matches the running platform and checks the captured outcome against
//! it. When no case applies the verdict is [`Verdict::NotApplicable`].

use std::fmt;
use std::path::PathBuf;

use permfs_core::{
    ErrorIdentity, FailureKind, IdentityErrorKind, KnownError, NormalizedFailure, Os, Platform,
    VersionRange,
};

use crate::golden::Severity;

/// Platforms a case applies to. An empty OS list means any OS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformFilter {
    pub os: Vec<Os>,
    pub toolchain: VersionRange,
}

impl Default for PlatformFilter {
    fn default() -> Self {
        Self {
            os: Vec::new(),
            toolchain: VersionRange::any(),
        }
    }
}

impl PlatformFilter {
    pub fn matches(&self, platform: &Platform) -> bool {
        (self.os.is_empty() || self.os.contains(&platform.os))
            && self.toolchain.contains(platform.toolchain)
    }
}

/// An acceptable error, either exact or a logical class resolved against
/// the platform at evaluation time
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExpectedError {
    Exact(ErrorIdentity),
    Known(KnownError),
}

impl ExpectedError {
    fn accepts(&self, actual: &ErrorIdentity, os: Os) -> bool {
        match self {
            ExpectedError::Exact(id) => id.matches(actual),
            ExpectedError::Known(known) => known.acceptable(os).iter().any(|id| id.matches(actual)),
        }
    }
}

impl fmt::Display for ExpectedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedError::Exact(id) => match id.code {
                Some(code) => write!(f, "{} ({})", id.message, code),
                None => f.write_str(&id.message),
            },
            ExpectedError::Known(known) => write!(f, "{:?}", known),
        }
    }
}

/// What a case expects the outcome to be
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExpectedOutcome {
    NoFailure,
    Failure {
        kind: Option<FailureKind>,
        /// One of these operation names; empty accepts any.
        operations: Vec<String>,
        /// One of these errors; empty accepts any.
        errors: Vec<ExpectedError>,
        path: Option<PathBuf>,
    },
}

/// One platform-conditioned expectation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Case {
    pub filter: PlatformFilter,
    pub outcome: ExpectedOutcome,
    pub operation_mismatch: Severity,
}

impl Case {
    pub fn no_failure() -> Self {
        Self {
            filter: PlatformFilter::default(),
            outcome: ExpectedOutcome::NoFailure,
            operation_mismatch: Severity::Error,
        }
    }

    pub fn failure() -> Self {
        Self {
            filter: PlatformFilter::default(),
            outcome: ExpectedOutcome::Failure {
                kind: None,
                operations: Vec::new(),
                errors: Vec::new(),
                path: None,
            },
            operation_mismatch: Severity::Error,
        }
    }

    /// Restrict to `os` (repeat to allow several).
    pub fn on(mut self, os: Os) -> Self {
        self.filter.os.push(os);
        self
    }

    pub fn toolchain(mut self, range: VersionRange) -> Self {
        self.filter.toolchain = range;
        self
    }

    pub fn kind(mut self, kind: FailureKind) -> Self {
        if let ExpectedOutcome::Failure { kind: k, .. } = &mut self.outcome {
            *k = Some(kind);
        }
        self
    }

    pub fn operation(mut self, name: impl Into<String>) -> Self {
        if let ExpectedOutcome::Failure { operations, .. } = &mut self.outcome {
            operations.push(name.into());
        }
        self
    }

    pub fn operations<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().fold(self, |case, name| case.operation(name))
    }

    pub fn error(mut self, id: ErrorIdentity) -> Self {
        if let ExpectedOutcome::Failure { errors, .. } = &mut self.outcome {
            errors.push(ExpectedError::Exact(id));
        }
        self
    }

    /// Accept every identity the platform reports for `known`.
    pub fn known(mut self, known: KnownError) -> Self {
        if let ExpectedOutcome::Failure { errors, .. } = &mut self.outcome {
            errors.push(ExpectedError::Known(known));
        }
        self
    }

    pub fn identity_error(self, kind: IdentityErrorKind) -> Self {
        self.kind(FailureKind::StringError).error(kind.identity())
    }

    pub fn path(mut self, p: impl Into<PathBuf>) -> Self {
        if let ExpectedOutcome::Failure { path, .. } = &mut self.outcome {
            *path = Some(p.into());
        }
        self
    }

    pub fn operation_severity(mut self, severity: Severity) -> Self {
        self.operation_mismatch = severity;
        self
    }
}

/// An immutable set of cases, checked once by [`evaluate`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Expectation {
    cases: Vec<Case>,
}

impl Expectation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn case(mut self, case: Case) -> Self {
        self.cases.push(case);
        self
    }

    pub fn cases(&self) -> &[Case] {
        &self.cases
    }

    /// Success on every platform.
    pub fn no_failure() -> Self {
        Self::new().case(Case::no_failure())
    }

    /// `operation` failing with `known` on every platform.
    pub fn failure(operation: &str, known: KnownError) -> Self {
        Self::new().case(Case::failure().operation(operation).known(known))
    }

    /// An identity-management failure of the given kind.
    pub fn identity(kind: IdentityErrorKind) -> Self {
        Self::new().case(Case::failure().identity_error(kind))
    }
}

/// Outcome of checking an expectation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Pass { warnings: Vec<String> },
    NotApplicable,
    Fail { mismatches: Vec<String>, warnings: Vec<String> },
}

impl Verdict {
    pub fn pass() -> Self {
        Verdict::Pass { warnings: Vec::new() }
    }

    pub fn fail(mismatch: impl Into<String>) -> Self {
        Verdict::Fail {
            mismatches: vec![mismatch.into()],
            warnings: Vec::new(),
        }
    }

    /// Pass when `ok`, otherwise fail with `mismatch`.
    pub fn check(ok: bool, mismatch: impl Into<String>) -> Self {
        if ok {
            Self::pass()
        } else {
            Self::fail(mismatch)
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass { .. })
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Verdict::Fail { .. })
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            Verdict::Pass { warnings } | Verdict::Fail { warnings, .. } => warnings,
            Verdict::NotApplicable => &[],
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass { warnings } if warnings.is_empty() => f.write_str("pass"),
            Verdict::Pass { warnings } => write!(f, "pass ({})", warnings.join("; ")),
            Verdict::NotApplicable => f.write_str("not applicable"),
            Verdict::Fail { mismatches, .. } => write!(f, "fail: {}", mismatches.join("; ")),
        }
    }
}

fn join_display<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Check `actual` against the first case of `expectation` that applies
/// to `platform`.
pub fn evaluate(expectation: &Expectation, actual: &NormalizedFailure, platform: &Platform) -> Verdict {
    let Some(case) = expectation.cases.iter().find(|c| c.filter.matches(platform)) else {
        return Verdict::NotApplicable;
    };

    let mut mismatches = Vec::new();
    let mut warnings = Vec::new();

    match &case.outcome {
        ExpectedOutcome::NoFailure => {
            if actual.is_failure() {
                mismatches.push(format!("expected no failure, got {}", actual));
            }
        }
        ExpectedOutcome::Failure {
            kind,
            operations,
            errors,
            path,
        } => {
            if !actual.is_failure() {
                return Verdict::fail("expected a failure, got none");
            }
            if let Some(kind) = kind {
                if *kind != actual.kind() {
                    mismatches.push(format!("expected kind {}, got {}", kind, actual.kind()));
                }
            }
            if !operations.is_empty() {
                let op = actual.operation().unwrap_or_default();
                if !operations.iter().any(|o| o == op) {
                    let msg = format!("expected operation {}, got {:?}", operations.join(" | "), op);
                    match case.operation_mismatch {
                        Severity::Error => mismatches.push(msg),
                        Severity::Warning => warnings.push(msg),
                    }
                }
            }
            if !errors.is_empty() {
                let accepted = actual
                    .error()
                    .map_or(false, |id| errors.iter().any(|e| e.accepts(id, platform.os)));
                if !accepted {
                    let got = actual.error().map(|e| e.to_string()).unwrap_or_default();
                    mismatches.push(format!("expected error {}, got {:?}", join_display(errors), got));
                }
            }
            if let Some(path) = path {
                if actual.path() != Some(path.as_path()) {
                    mismatches.push(format!(
                        "expected path {}, got {:?}",
                        path.display(),
                        actual.path()
                    ));
                }
            }
        }
    }

    if mismatches.is_empty() {
        Verdict::Pass { warnings }
    } else {
        Verdict::Fail { mismatches, warnings }
    }
}
