//! The remediation engine: resolve a fix, apply it under a checkpoint,
//! verify it, and roll back on regression.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::{
    EngineError, FailureDetail, FixAction, FixAttempt, FixOptions, MissingTool,
    RemediationMetrics, Result, SkipReason,
};
use crate::obs;
use crate::ports::{
    AutoApprove, CheckpointId, FixApprover, ProcessOutput, ProcessRunner, WorkspaceSnapshot,
};

use super::catalog::FixCatalog;
use super::changes::changed_files;
use super::counter::{count_errors, error_regex};
use super::ecosystem::{detect_ecosystem, Ecosystem};

/// Outcome of resolving a failure against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Ready(FixAction),
    Unavailable(SkipReason),
}

impl Resolution {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Counts and diff captured around one fix execution.
struct Measured {
    diff_before: String,
    errors_before: u32,
    errors_after: u32,
}

/// Applies catalog fixes to one working tree and keeps the session metrics.
///
/// Subprocesses run one at a time; the engine never mutates the tree
/// outside [`RemediationEngine::attempt_fix`].
pub struct RemediationEngine {
    workspace: Arc<dyn WorkspaceSnapshot>,
    runner: Arc<dyn ProcessRunner>,
    approver: Arc<dyn FixApprover>,
    catalog: FixCatalog,
    cancel: CancellationToken,
    metrics: RemediationMetrics,
    /// Probe results keyed by probe command line.
    probes: HashMap<String, bool>,
}

impl RemediationEngine {
    pub fn new(workspace: Arc<dyn WorkspaceSnapshot>, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            workspace,
            runner,
            approver: Arc::new(AutoApprove),
            catalog: FixCatalog::standard(),
            cancel: CancellationToken::new(),
            metrics: RemediationMetrics::new(),
            probes: HashMap::new(),
        }
    }

    pub fn with_catalog(mut self, catalog: FixCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_approver(mut self, approver: Arc<dyn FixApprover>) -> Self {
        self.approver = approver;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn metrics(&self) -> &RemediationMetrics {
        &self.metrics
    }

    pub fn into_metrics(self) -> RemediationMetrics {
        self.metrics
    }

    /// Ecosystem from the failure's files, else from the tree's markers.
    pub fn ecosystem_for(&self, failure: &FailureDetail) -> Ecosystem {
        Ecosystem::from_files(&failure.affected_files)
            .unwrap_or_else(|| detect_ecosystem(self.workspace.root()))
    }

    /// Pick the first candidate whose tool is present and which `options`
    /// allow. Missing tools are a normal outcome, not an error.
    pub async fn resolve(&mut self, failure: &FailureDetail, options: &FixOptions) -> Result<Resolution> {
        let ecosystem = self.ecosystem_for(failure);
        let candidates = self
            .catalog
            .candidates(ecosystem, failure.error_kind)
            .to_vec();
        if candidates.is_empty() {
            return Ok(Resolution::Unavailable(SkipReason::NoCandidates {
                error_kind: failure.error_kind,
            }));
        }

        let mut missing = Vec::new();
        let mut blocked = None;
        for action in candidates {
            if !action.safe && !options.allow_unsafe {
                blocked.get_or_insert_with(|| action.name.clone());
                continue;
            }
            if self.tool_available(&action).await? {
                return Ok(Resolution::Ready(action));
            }
            missing.push(MissingTool {
                tool: action.tool.clone(),
                install_hint: action.install_hint.clone(),
            });
        }

        Ok(Resolution::Unavailable(match blocked {
            Some(action) if missing.is_empty() => SkipReason::UnsafeNotAllowed { action },
            _ => SkipReason::ToolUnavailable { tools: missing },
        }))
    }

    /// Attempt one fix for `failure`.
    ///
    /// Order: resolve, dry-run/approval gates, checkpoint a dirty tree,
    /// count errors, run the fix, count again. More errors after than
    /// before restores the checkpoint unconditionally. Any error or
    /// cancellation while the fix is in flight restores before propagating.
    /// Every attempt, skipped or not, is recorded in the session metrics.
    pub async fn attempt_fix(&mut self, failure: &FailureDetail, options: &FixOptions) -> Result<FixAttempt> {
        let started_at = Utc::now();
        let clock = std::time::Instant::now();

        let action = match self.resolve(failure, options).await? {
            Resolution::Ready(action) => action,
            Resolution::Unavailable(reason) => return Ok(self.skip(failure, None, reason)),
        };
        obs::emit_fix_resolved(&failure.check_name, &action);

        if options.dry_run {
            info!(check = %failure.check_name, command = %action.command_line(), "dry run: fix not executed");
            return Ok(self.skip(failure, Some(action), SkipReason::DryRun));
        }
        if options.interactive && !self.approver.approve(&action, failure) {
            return Ok(self.skip(failure, Some(action), SkipReason::Declined));
        }

        let pattern = error_regex(&action.check)?;
        let checkpoint = if self.workspace.is_dirty().await? {
            let label = checkpoint_label(&failure.check_name, started_at);
            Some(self.workspace.checkpoint(&label).await?)
        } else {
            None
        };
        let restore_point = checkpoint.clone().unwrap_or_else(CheckpointId::pristine);

        let measured = match self.apply_measured(&action, &pattern).await {
            Ok(measured) => measured,
            Err(err) => {
                warn!(check = %failure.check_name, error = %err, checkpoint = %restore_point, "fix interrupted; restoring");
                self.workspace.restore(&restore_point).await?;
                return Err(err);
            }
        };

        let mut attempt = FixAttempt {
            check_name: failure.check_name.clone(),
            error_kind: failure.error_kind,
            safe: action.safe,
            action: Some(action),
            errors_before: measured.errors_before,
            errors_after: measured.errors_after,
            applied: false,
            rolled_back: false,
            checkpoint_taken: checkpoint.is_some(),
            changed_files: Vec::new(),
            skip_reason: None,
            duration_ms: 0,
            started_at,
        };

        if measured.errors_after > measured.errors_before {
            self.workspace.restore(&restore_point).await?;
            attempt.rolled_back = true;
            attempt.duration_ms = clock.elapsed().as_millis() as u64;
            obs::emit_fix_rolled_back(&attempt);
        } else {
            let diff_after = self.workspace.diff().await?;
            attempt.applied = true;
            attempt.changed_files = changed_files(&measured.diff_before, &diff_after);
            attempt.duration_ms = clock.elapsed().as_millis() as u64;
            obs::emit_fix_applied(&attempt);
        }

        self.metrics.record(attempt.clone());
        Ok(attempt)
    }

    async fn apply_measured(&self, action: &FixAction, pattern: &Regex) -> Result<Measured> {
        let diff_before = self.workspace.diff().await?;
        let errors_before = self.count(action, pattern).await?;

        let output = self.run(&action.command, &action.args).await?;
        if !output.success() {
            warn!(
                action = %action.name,
                exit_code = output.exit_code,
                "fix command exited non-zero"
            );
        }

        let errors_after = self.count(action, pattern).await?;
        Ok(Measured {
            diff_before,
            errors_before,
            errors_after,
        })
    }

    async fn count(&self, action: &FixAction, pattern: &Regex) -> Result<u32> {
        let output = self.run(&action.check.command, &action.check.args).await?;
        Ok(count_errors(&output, pattern))
    }

    /// Run a subprocess in the workspace root. On cancellation the runner
    /// reaps the child before this returns, so a restore that follows
    /// cannot race a still-running fixer.
    async fn run(&self, command: &str, args: &[String]) -> Result<ProcessOutput> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        self.runner
            .run(command, args, self.workspace.root(), &self.cancel)
            .await
    }

    async fn tool_available(&mut self, action: &FixAction) -> Result<bool> {
        let key = std::iter::once(action.command.as_str())
            .chain(action.probe_args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        if let Some(&known) = self.probes.get(&key) {
            return Ok(known);
        }
        let available = match self.run(&action.command, &action.probe_args).await {
            Ok(out) => out.success(),
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(_) => false,
        };
        self.probes.insert(key, available);
        Ok(available)
    }

    fn skip(&mut self, failure: &FailureDetail, action: Option<FixAction>, reason: SkipReason) -> FixAttempt {
        obs::emit_fix_skipped(&failure.check_name, &reason);
        let attempt = FixAttempt::skipped(failure.check_name.clone(), failure.error_kind, action, reason);
        self.metrics.record(attempt.clone());
        attempt
    }
}

/// `cisync-<check>-<UTC timestamp>`, safe for use as a stash message or ref.
pub fn checkpoint_label(check_name: &str, at: DateTime<Utc>) -> String {
    let slug: String = check_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug.trim_matches('-');
    format!("cisync-{}-{}", slug, at.format("%Y%m%dT%H%M%SZ"))
}
