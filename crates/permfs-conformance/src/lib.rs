//! Differential permission conformance for permfs backends
//!
//! Two complementary ways of checking a filesystem backend:
//!
//! - the golden oracle ([`golden`]) together with the matrix runner
//!   ([`matrix`]) records the normalized outcome of an operation for every
//!   role and permission value on a reference system, then replays the
//!   sweep elsewhere and reports field-level discrepancies;
//! - declarative expectations ([`expect`]) state per-platform outcomes for
//!   single calls and are checked by a pure evaluator.
//!
//! The [`orchestrator`] ties both to a backend pair and adds the fixed
//! scenarios and identity-management checks.

pub mod config;
pub mod error;
pub mod expect;
pub mod golden;
pub mod matrix;
pub mod orchestrator;
pub mod sample_tree;

pub use config::ConformanceConfig;
pub use error::{GoldenError, HarnessError, Result};
pub use expect::{evaluate, Case, ExpectedError, ExpectedOutcome, Expectation, PlatformFilter, Verdict};
pub use golden::{
    compare_failures, ComparePolicy, Discrepancy, GoldenKey, GoldenOracle, GoldenRecord, OracleMode,
    Severity,
};
pub use matrix::{MatrixReport, MatrixRunner, MatrixTarget, Role, Roster, RosterMember};
pub use orchestrator::{Orchestrator, SavedRoot, ScenarioCheck, ScenarioReport};
pub use sample_tree::{SampleKind, SampleNode, SampleSpec, SampleTree};
