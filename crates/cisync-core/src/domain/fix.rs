//! Remediation actions, attempts and session metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::snapshot::ErrorKind;

/// Command used to count errors of a failure class in the local tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckCommand {
    pub command: String,
    pub args: Vec<String>,
    /// Regex matched line-by-line against stdout and stderr; each matching
    /// line counts as one error.
    pub error_pattern: String,
}

/// A resolved remediation command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixAction {
    /// Short identifier, e.g. `rustfmt`.
    pub name: String,
    /// Tool whose presence gates this action.
    pub tool: String,
    pub command: String,
    pub args: Vec<String>,
    /// Arguments used to probe for the tool (`<command> <probe_args>`).
    pub probe_args: Vec<String>,
    /// Formatting-only fixes are safe; anything that may alter program
    /// behavior is not.
    pub safe: bool,
    pub check: CheckCommand,
    /// How to install the tool when it is missing.
    pub install_hint: String,
}

impl FixAction {
    /// `command arg1 arg2 ...` as a single display string.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Options for a single remediation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixOptions {
    pub dry_run: bool,
    pub interactive: bool,
    pub allow_unsafe: bool,
    /// Attempts per distinct failure before giving up.
    pub max_attempts: u32,
}

impl Default for FixOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            interactive: false,
            allow_unsafe: false,
            max_attempts: 2,
        }
    }
}

/// Why an attempt did not run its fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// No catalog entry for this ecosystem and error kind.
    NoCandidates { error_kind: ErrorKind },
    /// Every candidate's tool is missing.
    ToolUnavailable { tools: Vec<MissingTool> },
    /// Only behavior-changing fixes are available and they were not allowed.
    UnsafeNotAllowed { action: String },
    /// Dry-run: the action was resolved and printed, nothing ran.
    DryRun,
    /// An interactive operator declined the action.
    Declined,
}

/// A tool the catalog wanted but could not find.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingTool {
    pub tool: String,
    pub install_hint: String,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoCandidates { error_kind } => {
                write!(f, "no automated fix known for {error_kind}")
            }
            Self::ToolUnavailable { tools } => {
                let parts: Vec<String> = tools
                    .iter()
                    .map(|t| format!("{} (install: {})", t.tool, t.install_hint))
                    .collect();
                write!(f, "required tool not found: {}", parts.join(", "))
            }
            Self::UnsafeNotAllowed { action } => {
                write!(f, "'{action}' may change behavior; pass --allow-unsafe to run it")
            }
            Self::DryRun => write!(f, "dry run"),
            Self::Declined => write!(f, "declined by operator"),
        }
    }
}

/// Append-only record of one remediation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixAttempt {
    pub check_name: String,
    pub error_kind: ErrorKind,
    /// The resolved action, absent when nothing could be resolved.
    pub action: Option<FixAction>,
    pub safe: bool,
    pub errors_before: u32,
    pub errors_after: u32,
    pub applied: bool,
    pub rolled_back: bool,
    /// A restorable checkpoint of pre-existing changes was taken.
    pub checkpoint_taken: bool,
    /// Files whose content the fix changed.
    pub changed_files: Vec<String>,
    pub skip_reason: Option<SkipReason>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl FixAttempt {
    /// An attempt that never ran its fix.
    pub fn skipped(
        check_name: impl Into<String>,
        error_kind: ErrorKind,
        action: Option<FixAction>,
        reason: SkipReason,
    ) -> Self {
        let safe = action.as_ref().map(|a| a.safe).unwrap_or(false);
        Self {
            check_name: check_name.into(),
            error_kind,
            action,
            safe,
            errors_before: 0,
            errors_after: 0,
            applied: false,
            rolled_back: false,
            checkpoint_taken: false,
            changed_files: Vec::new(),
            skip_reason: Some(reason),
            duration_ms: 0,
            started_at: Utc::now(),
        }
    }

    /// Applied and kept: the workspace is no worse than before.
    pub fn succeeded(&self) -> bool {
        self.applied && !self.rolled_back
    }

    /// Regression guard: more errors after than before requires a rollback.
    pub fn upholds_no_regression(&self) -> bool {
        self.errors_after <= self.errors_before || self.rolled_back
    }
}

/// Per-engine accumulation of attempts. Never global.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemediationMetrics {
    pub total_attempts: u32,
    /// Errors eliminated across kept attempts.
    pub fixed: u32,
    /// Errors introduced by attempts (before their rollback).
    pub introduced: u32,
    pub rollbacks: u32,
    pub average_duration_ms: f64,
    pub history: Vec<FixAttempt>,
}

impl RemediationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attempt and update aggregates.
    pub fn record(&mut self, attempt: FixAttempt) {
        let n = f64::from(self.total_attempts);
        self.total_attempts += 1;
        self.average_duration_ms =
            (self.average_duration_ms * n + attempt.duration_ms as f64) / (n + 1.0);

        if attempt.errors_after > attempt.errors_before {
            self.introduced += attempt.errors_after - attempt.errors_before;
        } else if attempt.applied {
            self.fixed += attempt.errors_before - attempt.errors_after;
        }
        if attempt.rolled_back {
            self.rollbacks += 1;
        }
        self.history.push(attempt);
    }

    /// Attempts recorded for a given check.
    pub fn attempts_for(&self, check_name: &str) -> u32 {
        self.history
            .iter()
            .filter(|a| a.check_name == check_name)
            .count() as u32
    }
}
