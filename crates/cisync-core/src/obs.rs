//! Structured lifecycle events for engine runs.
//!
//! - `EngineSpan`: span tagging everything inside a run with `run_id` and
//!   `revision`
//! - `emit_*`: one function per lifecycle event, each logged with an
//!   `event` field (`poll.sampled`, `fix.applied`, ...)

use tracing::{debug, info, warn};

use crate::domain::{CheckSnapshot, EngineState, FixAction, FixAttempt, SkipReason};

/// Run-scoped span. Instrument async work with [`EngineSpan::span`];
/// [`EngineSpan::enter`] covers synchronous sections.
pub struct EngineSpan {
    span: tracing::Span,
}

impl EngineSpan {
    pub fn new(run_id: &str, revision: &str) -> Self {
        Self {
            span: tracing::info_span!("cisync.run", run_id = %run_id, revision = %revision),
        }
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Enter the span until the guard drops. Never hold across `.await`.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// One accepted poll sample.
pub fn emit_poll_sampled(revision: &str, sequence: u64, snapshot: &CheckSnapshot, changed: bool) {
    // Unchanged samples are noise at info level.
    if changed {
        info!(
            event = "poll.sampled",
            revision = %revision,
            sequence = sequence,
            total = snapshot.total(),
            passed = snapshot.passed(),
            failed = snapshot.failed(),
            pending = snapshot.pending(),
        );
    } else {
        debug!(
            event = "poll.sampled",
            revision = %revision,
            sequence = sequence,
            total = snapshot.total(),
            pending = snapshot.pending(),
        );
    }
}

/// A transient fetch error consumed one retry.
pub fn emit_poll_retry(revision: &str, retries_used: u32, error: &dyn std::fmt::Display) {
    warn!(event = "poll.retry", revision = %revision, retries_used = retries_used, error = %error);
}

/// The poll loop reached a terminal outcome.
pub fn emit_poll_finished(revision: &str, kind: &str, samples: u64, elapsed_ms: u64) {
    info!(
        event = "poll.finished",
        revision = %revision,
        outcome = %kind,
        samples = samples,
        elapsed_ms = elapsed_ms,
    );
}

pub fn emit_transition(from: EngineState, to: EngineState, revision: &str) {
    info!(event = "engine.transition", from = %from, to = %to, revision = %revision);
}

pub fn emit_fix_resolved(check_name: &str, action: &FixAction) {
    info!(
        event = "fix.resolved",
        check = %check_name,
        action = %action.name,
        command = %action.command_line(),
        safe = action.safe,
    );
}

pub fn emit_fix_applied(attempt: &FixAttempt) {
    info!(
        event = "fix.applied",
        check = %attempt.check_name,
        errors_before = attempt.errors_before,
        errors_after = attempt.errors_after,
        changed_files = attempt.changed_files.len(),
        duration_ms = attempt.duration_ms,
    );
}

/// A fix regressed the workspace and was undone.
pub fn emit_fix_rolled_back(attempt: &FixAttempt) {
    warn!(
        event = "fix.rolled_back",
        check = %attempt.check_name,
        errors_before = attempt.errors_before,
        errors_after = attempt.errors_after,
    );
}

pub fn emit_fix_skipped(check_name: &str, reason: &SkipReason) {
    info!(event = "fix.skipped", check = %check_name, reason = %reason);
}

pub fn emit_engine_finished(run_id: &str, outcome: &str, duration_ms: u64, attempts: u32) {
    info!(
        event = "engine.finished",
        run_id = %run_id,
        outcome = %outcome,
        duration_ms = duration_ms,
        fix_attempts = attempts,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_span_create() {
        let span = EngineSpan::new("run-1", "abc123");
        let _guard = span.enter();
    }
}
