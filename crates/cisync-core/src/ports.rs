//! Collaborator traits consumed by the engine.
//!
//! - `CheckStatusSource`: normalized check snapshots for a revision
//! - `WorkspaceSnapshot`: dirty detection, checkpoint/restore, diff of the working tree
//! - `ProcessRunner`: awaited subprocess execution
//! - `RevisionPublisher`: turns an applied fix into a new revision to poll
//! - `FixApprover`: operator confirmation for interactive remediation
//!
//! All traits are backend-agnostic. In-memory fakes live in `fakes`, behind
//! the `test-util` feature.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::domain::{CheckSnapshot, FailureDetail, FetchError, FixAction, FixAttempt, Result};

// ---------------------------------------------------------------------------
// CheckStatusSource
// ---------------------------------------------------------------------------

/// Yields a normalized snapshot of every check for a revision.
#[async_trait]
pub trait CheckStatusSource: Send + Sync {
    async fn fetch(&self, revision: &str) -> std::result::Result<CheckSnapshot, FetchError>;
}

// ---------------------------------------------------------------------------
// WorkspaceSnapshot
// ---------------------------------------------------------------------------

/// Handle to a restorable checkpoint of uncommitted changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointId {
    pub label: String,
    /// Backend-specific reference (e.g. a stash commit SHA).
    pub reference: String,
}

impl CheckpointId {
    const PRISTINE: &'static str = "HEAD";

    pub fn new(label: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            reference: reference.into(),
        }
    }

    /// The committed state with no local changes. Restoring it discards
    /// everything the working tree accumulated since.
    pub fn pristine() -> Self {
        Self::new("pristine", Self::PRISTINE)
    }

    pub fn is_pristine(&self) -> bool {
        self.reference == Self::PRISTINE
    }
}

impl std::fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.label, self.reference)
    }
}

/// The singly-owned working tree remediation operates on.
#[async_trait]
pub trait WorkspaceSnapshot: Send + Sync {
    /// Root directory subprocesses run in.
    fn root(&self) -> &Path;

    /// Whether the tree has uncommitted changes (tracked or untracked).
    async fn is_dirty(&self) -> Result<bool>;

    /// Record the current uncommitted state without altering the tree.
    async fn checkpoint(&self, label: &str) -> Result<CheckpointId>;

    /// Put the tree back exactly as it was at `id`.
    async fn restore(&self, id: &CheckpointId) -> Result<()>;

    /// Unified diff of the tree against the committed state.
    ///
    /// Each file's section starts with a `diff --git a/<path> b/<path>` line.
    async fn diff(&self) -> Result<String>;
}

// ---------------------------------------------------------------------------
// ProcessRunner
// ---------------------------------------------------------------------------

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutput {
    /// Exit code; `-1` when terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr lines in that order.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().chain(self.stderr.lines())
    }
}

/// Runs a subprocess to completion.
///
/// A command that cannot be spawned (e.g. not installed) is an `Err`;
/// a command that ran and exited non-zero is an `Ok` with that exit code.
///
/// When `cancel` fires, the runner terminates the child and everything it
/// spawned, waits for them to exit, and only then returns
/// `Err(EngineError::Cancelled)`. Callers may touch the working tree as
/// soon as the future resolves.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        command: &str,
        args: &[String],
        cwd: &Path,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput>;
}

// ---------------------------------------------------------------------------
// RevisionPublisher
// ---------------------------------------------------------------------------

/// Publishes applied fixes and returns the revision CI should verify next.
#[async_trait]
pub trait RevisionPublisher: Send + Sync {
    async fn publish(&self, revision: &str, applied: &[FixAttempt]) -> Result<String>;
}

/// Publisher that leaves the revision unchanged; the next cycle re-polls it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SameRevision;

#[async_trait]
impl RevisionPublisher for SameRevision {
    async fn publish(&self, revision: &str, _applied: &[FixAttempt]) -> Result<String> {
        Ok(revision.to_string())
    }
}

// ---------------------------------------------------------------------------
// FixApprover
// ---------------------------------------------------------------------------

/// Confirms a resolved action before it mutates the tree.
pub trait FixApprover: Send + Sync {
    fn approve(&self, action: &FixAction, failure: &FailureDetail) -> bool;
}

/// Approves everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl FixApprover for AutoApprove {
    fn approve(&self, _action: &FixAction, _failure: &FailureDetail) -> bool {
        true
    }
}
