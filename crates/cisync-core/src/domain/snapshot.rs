//! Normalized check snapshots and failure details.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classified kind of a failed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TestFailure,
    LintError,
    TypeError,
    BuildError,
    SecurityFinding,
    Timeout,
    Unknown,
}

impl ErrorKind {
    /// Critical failures stop the poll loop when fail-fast is enabled.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::TestFailure | Self::BuildError | Self::SecurityFinding
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TestFailure => "test_failure",
            Self::LintError => "lint_error",
            Self::TypeError => "type_error",
            Self::BuildError => "build_error",
            Self::SecurityFinding => "security_finding",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "test_failure" | "test" => Ok(Self::TestFailure),
            "lint_error" | "lint" => Ok(Self::LintError),
            "type_error" | "type" => Ok(Self::TypeError),
            "build_error" | "build" => Ok(Self::BuildError),
            "security_finding" | "security" => Ok(Self::SecurityFinding),
            "timeout" => Ok(Self::Timeout),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown error kind: {other}")),
        }
    }
}

/// Status of a single check within a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Passed,
    Failed,
    Pending,
    Skipped,
}

/// One named check and its state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub name: String,
    pub state: CheckState,
}

/// Structured diagnostics for one failed check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// Check identifier, unique within a snapshot.
    pub check_name: String,
    pub error_kind: ErrorKind,
    pub affected_files: BTreeSet<String>,
    pub summary: String,
    pub suggested_fix: Option<String>,
}

impl FailureDetail {
    pub fn new(check_name: impl Into<String>, error_kind: ErrorKind, summary: impl Into<String>) -> Self {
        Self {
            check_name: check_name.into(),
            error_kind,
            affected_files: BTreeSet::new(),
            summary: summary.into(),
            suggested_fix: None,
        }
    }

    /// Placeholder detail for a failed check nobody could diagnose.
    pub fn unknown(check_name: impl Into<String>) -> Self {
        let check_name = check_name.into();
        let summary = format!("check '{check_name}' failed");
        Self::new(check_name, ErrorKind::Unknown, summary)
    }

    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.affected_files.insert(path.into());
        self
    }

    pub fn with_suggested_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }
}

/// Immutable point-in-time view of every check for one revision.
///
/// Counts are derived from `checks` at construction and cannot drift;
/// `total == passed + failed + pending + skipped` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSnapshot {
    total: u32,
    passed: u32,
    failed: u32,
    pending: u32,
    skipped: u32,
    checks: Vec<CheckRun>,
    failure_details: Vec<FailureDetail>,
    observed_at: DateTime<Utc>,
}

impl CheckSnapshot {
    /// Build a snapshot from individual check states.
    ///
    /// A repeated check name keeps its position but takes the state of its
    /// last occurrence (re-runs supersede earlier attempts). Every failed
    /// check ends up with exactly one [`FailureDetail`]: details for checks
    /// that are not failed are dropped, and failed checks without one get
    /// [`FailureDetail::unknown`].
    pub fn new(
        checks: Vec<CheckRun>,
        failure_details: Vec<FailureDetail>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        let mut deduped: Vec<CheckRun> = Vec::with_capacity(checks.len());
        let mut index: HashMap<String, usize> = HashMap::new();
        for check in checks {
            match index.get(&check.name) {
                Some(&i) => deduped[i].state = check.state,
                None => {
                    index.insert(check.name.clone(), deduped.len());
                    deduped.push(check);
                }
            }
        }

        let mut by_name: HashMap<String, FailureDetail> = failure_details
            .into_iter()
            .map(|d| (d.check_name.clone(), d))
            .collect();

        let (mut passed, mut failed, mut pending, mut skipped) = (0u32, 0u32, 0u32, 0u32);
        let mut details = Vec::new();
        for check in &deduped {
            match check.state {
                CheckState::Passed => passed += 1,
                CheckState::Pending => pending += 1,
                CheckState::Skipped => skipped += 1,
                CheckState::Failed => {
                    failed += 1;
                    details.push(
                        by_name
                            .remove(&check.name)
                            .unwrap_or_else(|| FailureDetail::unknown(&check.name)),
                    );
                }
            }
        }

        Self {
            total: passed + failed + pending + skipped,
            passed,
            failed,
            pending,
            skipped,
            checks: deduped,
            failure_details: details,
            observed_at,
        }
    }

    /// Snapshot with no registered checks.
    pub fn empty(observed_at: DateTime<Utc>) -> Self {
        Self::new(Vec::new(), Vec::new(), observed_at)
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn passed(&self) -> u32 {
        self.passed
    }

    pub fn failed(&self) -> u32 {
        self.failed
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    pub fn checks(&self) -> &[CheckRun] {
        &self.checks
    }

    pub fn failure_details(&self) -> &[FailureDetail] {
        &self.failure_details
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    /// Names of checks currently in `state`.
    pub fn names_in(&self, state: CheckState) -> BTreeSet<&str> {
        self.checks
            .iter()
            .filter(|c| c.state == state)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Whether no check has been registered for the revision (yet).
    pub fn has_no_checks(&self) -> bool {
        self.total == 0
    }

    /// Fraction of checks still pending; `None` when there are no checks.
    pub fn pending_ratio(&self) -> Option<f64> {
        (self.total > 0).then(|| f64::from(self.pending) / f64::from(self.total))
    }
}

/// Fluent constructor for [`CheckSnapshot`], used by sources and tests.
#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    checks: Vec<CheckRun>,
    details: Vec<FailureDetail>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(mut self, name: impl Into<String>, state: CheckState) -> Self {
        self.checks.push(CheckRun {
            name: name.into(),
            state,
        });
        self
    }

    pub fn passed(self, name: impl Into<String>) -> Self {
        self.check(name, CheckState::Passed)
    }

    pub fn pending(self, name: impl Into<String>) -> Self {
        self.check(name, CheckState::Pending)
    }

    pub fn skipped(self, name: impl Into<String>) -> Self {
        self.check(name, CheckState::Skipped)
    }

    /// Add a failed check with a bare detail of the given kind.
    pub fn failed(self, name: impl Into<String>, kind: ErrorKind) -> Self {
        let name = name.into();
        let detail = FailureDetail::new(name.clone(), kind, format!("{kind} in '{name}'"));
        self.failed_with(detail)
    }

    /// Add a failed check described by a full [`FailureDetail`].
    pub fn failed_with(mut self, detail: FailureDetail) -> Self {
        self.checks.push(CheckRun {
            name: detail.check_name.clone(),
            state: CheckState::Failed,
        });
        self.details.push(detail);
        self
    }

    /// Add `count` checks named `{prefix}-{n}` in `state`.
    pub fn many(mut self, prefix: &str, count: usize, state: CheckState) -> Self {
        for n in 0..count {
            self = self.check(format!("{prefix}-{n}"), state);
        }
        self
    }

    pub fn build_at(self, observed_at: DateTime<Utc>) -> CheckSnapshot {
        CheckSnapshot::new(self.checks, self.details, observed_at)
    }

    pub fn build(self) -> CheckSnapshot {
        self.build_at(Utc::now())
    }
}
