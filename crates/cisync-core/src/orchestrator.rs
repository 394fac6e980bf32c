//! Single entry point composing Poller, Classifier and RemediationEngine.
//!
//! State machine: `polling -> {succeeded, timed_out, failed, remediating}`,
//! `remediating -> {polling, failed}`. The poll timeout is the deadline for
//! the whole invocation, across every remediation cycle.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::{
    CheckSnapshot, CiOutcome, EngineError, EngineReport, EngineState, FailureDetail, FixAttempt,
    FixOptions, PollOutcome, Result, StateTransition,
};
use crate::lock::WorkspaceLock;
use crate::obs;
use crate::poller::{Poller, ProgressSender};
use crate::ports::{
    AutoApprove, CheckStatusSource, FixApprover, ProcessRunner, RevisionPublisher, SameRevision,
    WorkspaceSnapshot,
};
use crate::remediation::{FixCatalog, RemediationEngine, Resolution};

/// External collaborators the engine is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn CheckStatusSource>,
    pub workspace: Arc<dyn WorkspaceSnapshot>,
    pub runner: Arc<dyn ProcessRunner>,
    pub publisher: Arc<dyn RevisionPublisher>,
    pub approver: Arc<dyn FixApprover>,
}

impl Collaborators {
    /// Wire the required collaborators; publishing re-polls the same
    /// revision and every fix is auto-approved.
    pub fn new(
        source: Arc<dyn CheckStatusSource>,
        workspace: Arc<dyn WorkspaceSnapshot>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            source,
            workspace,
            runner,
            publisher: Arc::new(SameRevision),
            approver: Arc::new(AutoApprove),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn RevisionPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_approver(mut self, approver: Arc<dyn FixApprover>) -> Self {
        self.approver = approver;
        self
    }
}

/// Records legal state changes.
struct StateMachine {
    state: EngineState,
    transitions: Vec<StateTransition>,
}

impl StateMachine {
    fn new() -> Self {
        Self {
            state: EngineState::Polling,
            transitions: Vec::new(),
        }
    }

    fn transition(&mut self, to: EngineState, revision: &str) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(EngineError::Workspace(format!(
                "illegal engine transition {} -> {to}",
                self.state
            )));
        }
        obs::emit_transition(self.state, to, revision);
        self.transitions.push(StateTransition {
            from: self.state,
            to,
            revision: revision.to_string(),
            at: Utc::now(),
        });
        self.state = to;
        Ok(())
    }
}

/// Runs one revision through polling and, if enabled, remediation.
pub struct Orchestrator {
    collaborators: Collaborators,
    config: EngineConfig,
    catalog: FixCatalog,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Self {
        Self {
            collaborators,
            config,
            catalog: FixCatalog::standard(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_catalog(mut self, catalog: FixCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run to a terminal outcome.
    ///
    /// Only fatal fetch errors, exhausted retries, cancellation, a busy
    /// working tree and workspace failures surface as `Err`; every other
    /// ending is one of the three [`CiOutcome`] kinds.
    pub async fn run(&self, revision: &str, progress: Option<&ProgressSender>) -> Result<EngineReport> {
        self.config.validate()?;
        let run_id = Uuid::new_v4();
        let span = obs::EngineSpan::new(&run_id.to_string(), revision);
        self.run_locked(run_id, revision, progress)
            .instrument(span.span().clone())
            .await
    }

    async fn run_locked(
        &self,
        run_id: Uuid,
        revision: &str,
        progress: Option<&ProgressSender>,
    ) -> Result<EngineReport> {
        let workspace = &self.collaborators.workspace;
        let _lock = WorkspaceLock::acquire(workspace.root())?;

        let started_at = Utc::now();
        let deadline = Instant::now() + self.config.poll.timeout();
        let fix_options = self.config.remediation.fix_options();

        let mut engine = RemediationEngine::new(workspace.clone(), self.collaborators.runner.clone())
            .with_catalog(self.catalog.clone())
            .with_approver(self.collaborators.approver.clone())
            .with_cancellation(self.cancel.clone());
        let mut machine = StateMachine::new();
        let mut current = revision.to_string();
        let mut last_snapshot: Option<CheckSnapshot> = None;

        let outcome = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                machine.transition(EngineState::TimedOut, &current)?;
                break CiOutcome::TimedOut { last_snapshot };
            }

            let mut poll_options = self.config.poll.clone();
            poll_options.timeout_ms = (remaining.as_millis() as u64).max(1);
            let poller = Poller::new(self.collaborators.source.clone(), poll_options)
                .with_cancellation(self.cancel.clone());
            let polled = match progress {
                Some(tx) => poller.wait_for_checks_with_progress(&current, tx).await?,
                None => poller.wait_for_checks(&current).await?,
            };

            let snapshot = match polled {
                PollOutcome::Succeeded {
                    snapshot,
                    no_checks,
                } => {
                    machine.transition(EngineState::Succeeded, &current)?;
                    break CiOutcome::Succeeded {
                        snapshot,
                        no_checks,
                    };
                }
                PollOutcome::TimedOut { last_snapshot: last } => {
                    machine.transition(EngineState::TimedOut, &current)?;
                    break CiOutcome::TimedOut {
                        last_snapshot: last.or(last_snapshot),
                    };
                }
                PollOutcome::Failed { snapshot, .. } => snapshot,
            };
            last_snapshot = Some(snapshot.clone());

            if !self.remediable(&mut engine, &snapshot, &fix_options).await? {
                machine.transition(EngineState::Failed, &current)?;
                break CiOutcome::Failed {
                    snapshot,
                    remediation: engine.metrics().clone(),
                };
            }

            machine.transition(EngineState::Remediating, &current)?;
            let applied = self
                .remediate(&mut engine, snapshot.failure_details(), &fix_options)
                .await?;
            if applied.is_empty() {
                machine.transition(EngineState::Failed, &current)?;
                break CiOutcome::Failed {
                    snapshot,
                    remediation: engine.metrics().clone(),
                };
            }

            let next = self.collaborators.publisher.publish(&current, &applied).await?;
            info!(from = %current, to = %next, fixes = applied.len(), "published remediation");
            current = next;
            machine.transition(EngineState::Polling, &current)?;
        };

        let remediation = engine.into_metrics();
        let report = EngineReport {
            run_id,
            revision: revision.to_string(),
            final_revision: current,
            outcome,
            remediation,
            transitions: machine.transitions,
            started_at,
            finished_at: Utc::now(),
        };
        obs::emit_engine_finished(
            &run_id.to_string(),
            report.outcome.kind(),
            report.duration_ms(),
            report.remediation.total_attempts,
        );
        Ok(report)
    }

    /// Remediation is enabled and every failure resolves to an action with
    /// attempts left.
    async fn remediable(
        &self,
        engine: &mut RemediationEngine,
        snapshot: &CheckSnapshot,
        options: &FixOptions,
    ) -> Result<bool> {
        if !self.config.remediation.enabled || snapshot.failure_details().is_empty() {
            return Ok(false);
        }
        for failure in snapshot.failure_details() {
            if engine.metrics().attempts_for(&failure.check_name) >= options.max_attempts {
                return Ok(false);
            }
            if let Resolution::Unavailable(reason) = engine.resolve(failure, options).await? {
                info!(check = %failure.check_name, reason = %reason, "failure not remediable");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Try each failure up to `max_attempts`; returns the attempts kept.
    async fn remediate(
        &self,
        engine: &mut RemediationEngine,
        failures: &[FailureDetail],
        options: &FixOptions,
    ) -> Result<Vec<FixAttempt>> {
        let mut applied = Vec::new();
        for failure in failures {
            while engine.metrics().attempts_for(&failure.check_name) < options.max_attempts {
                let attempt = engine.attempt_fix(failure, options).await?;
                if attempt.succeeded() {
                    applied.push(attempt);
                    break;
                }
                // Skips (dry run, declined, missing tool) will not change on retry.
                if attempt.skip_reason.is_some() {
                    break;
                }
            }
        }
        Ok(applied)
    }
}
