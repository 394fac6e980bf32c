//! The sampling loop that waits for a revision's checks to settle.
//!
//! One [`Poller::wait_for_checks`] call owns its [`PollState`]; nothing is
//! shared between calls. Fetches are strictly sequential, each bounded by the
//! per-request timeout, and every wait is clamped to the remaining budget.

pub mod strategy;

use std::sync::Arc;

use futures::channel::mpsc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::classifier;
use crate::config::PollOptions;
use crate::domain::{
    CheckSnapshot, EngineError, FetchError, PollOutcome, ProgressEvent, Result,
};
use crate::obs;
use crate::ports::CheckStatusSource;

pub use strategy::IntervalSchedule;

/// Sending half of a progress stream.
pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;
/// Receiving half: a finite stream of [`ProgressEvent`], one per accepted sample.
pub type ProgressStream = mpsc::UnboundedReceiver<ProgressEvent>;

/// A fresh progress channel.
pub fn progress_channel() -> (ProgressSender, ProgressStream) {
    mpsc::unbounded()
}

/// Mutable state of one poll loop.
#[derive(Debug)]
pub struct PollState {
    pub previous: Option<CheckSnapshot>,
    pub started: Instant,
    pub deadline: Instant,
    /// Consecutive transient fetch errors.
    pub retries_used: u32,
    pub samples: u64,
    pub schedule: IntervalSchedule,
}

impl PollState {
    fn new(options: &PollOptions) -> Self {
        let started = Instant::now();
        Self {
            previous: None,
            started,
            deadline: started + options.timeout(),
            retries_used: 0,
            samples: 0,
            schedule: IntervalSchedule::new(options),
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    fn timed_out(&self) -> PollOutcome {
        PollOutcome::TimedOut {
            last_snapshot: self.previous.clone(),
        }
    }
}

/// What the loop does with one accepted sample.
enum Decision {
    Done(PollOutcome),
    Wait,
}

/// Drives `CheckStatusSource::fetch` until a terminal outcome.
pub struct Poller {
    source: Arc<dyn CheckStatusSource>,
    options: PollOptions,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(source: Arc<dyn CheckStatusSource>, options: PollOptions) -> Self {
        Self {
            source,
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &PollOptions {
        &self.options
    }

    /// Wait for `revision` without progress reporting.
    pub async fn wait_for_checks(&self, revision: &str) -> Result<PollOutcome> {
        self.run(revision, None).await
    }

    /// Wait for `revision`, sending one [`ProgressEvent`] per accepted sample.
    ///
    /// Events arrive in strictly increasing `observed_at` order. A dropped
    /// receiver does not stop the loop.
    pub async fn wait_for_checks_with_progress(
        &self,
        revision: &str,
        progress: &ProgressSender,
    ) -> Result<PollOutcome> {
        self.run(revision, Some(progress)).await
    }

    async fn run(&self, revision: &str, progress: Option<&ProgressSender>) -> Result<PollOutcome> {
        self.options.validate()?;
        let mut state = PollState::new(&self.options);

        let outcome = loop {
            if Instant::now() >= state.deadline {
                break state.timed_out();
            }

            let mut ratio = None;
            match self.fetch(revision, &state).await? {
                Ok(snapshot) => {
                    state.retries_used = 0;
                    if is_stale(state.previous.as_ref(), &snapshot) {
                        debug!(revision = %revision, "discarding stale snapshot");
                    } else {
                        ratio = snapshot.pending_ratio();
                        state.samples += 1;
                        self.report(revision, &state, &snapshot, progress);
                        let decision = self.decide(&state, &snapshot);
                        state.previous = Some(snapshot);
                        if let Decision::Done(outcome) = decision {
                            break outcome;
                        }
                    }
                }
                Err(err) if err.is_retryable() => {
                    state.retries_used += 1;
                    if state.retries_used > self.options.max_fetch_retries {
                        return Err(EngineError::RetriesExhausted {
                            attempts: state.retries_used,
                            last: err,
                        });
                    }
                    obs::emit_poll_retry(revision, state.retries_used, &err);
                }
                Err(err) => return Err(EngineError::FatalFetch(err)),
            }

            let interval = state.schedule.next(ratio);
            let remaining = state.remaining();
            if remaining.is_zero() {
                break state.timed_out();
            }
            let wait = interval.min(remaining);
            debug!(revision = %revision, wait_ms = wait.as_millis() as u64, "sleeping before next poll");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        };

        obs::emit_poll_finished(
            revision,
            outcome.kind(),
            state.samples,
            state.elapsed().as_millis() as u64,
        );
        Ok(outcome)
    }

    /// One fetch bounded by the request timeout and the remaining budget.
    ///
    /// The outer `Result` carries cancellation only.
    async fn fetch(
        &self,
        revision: &str,
        state: &PollState,
    ) -> Result<std::result::Result<CheckSnapshot, FetchError>> {
        let budget = self.options.request_timeout().min(state.remaining());
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
            res = tokio::time::timeout(budget, self.source.fetch(revision)) => Ok(match res {
                Ok(inner) => inner,
                Err(_) => Err(FetchError::timeout(format!(
                    "fetch exceeded {}ms",
                    budget.as_millis()
                ))),
            }),
        }
    }

    fn report(
        &self,
        revision: &str,
        state: &PollState,
        snapshot: &CheckSnapshot,
        progress: Option<&ProgressSender>,
    ) {
        let prev = state.previous.as_ref();
        let changed = classifier::has_status_changed(prev, snapshot);
        obs::emit_poll_sampled(revision, state.samples, snapshot, changed);

        if let Some(tx) = progress {
            let event = ProgressEvent {
                revision: revision.to_string(),
                sequence: state.samples,
                has_status_changed: changed,
                new_failures: classifier::get_new_failures(prev, snapshot),
                new_passes: classifier::get_new_passes(prev, snapshot),
                snapshot: snapshot.clone(),
            };
            tx.unbounded_send(event).ok();
        }
    }

    fn decide(&self, state: &PollState, snapshot: &CheckSnapshot) -> Decision {
        if snapshot.has_no_checks() {
            // Not yet registered and not configured look identical in one
            // sample; only the grace period tells them apart.
            if state.elapsed() >= self.options.no_checks_grace() {
                return Decision::Done(PollOutcome::Succeeded {
                    snapshot: snapshot.clone(),
                    no_checks: true,
                });
            }
            return Decision::Wait;
        }

        if self.options.fail_fast
            && snapshot.pending() > 0
            && classifier::has_critical_failure(snapshot)
        {
            return Decision::Done(PollOutcome::Failed {
                snapshot: snapshot.clone(),
                fail_fast: true,
            });
        }

        match (snapshot.pending(), snapshot.failed()) {
            (0, 0) => Decision::Done(PollOutcome::Succeeded {
                snapshot: snapshot.clone(),
                no_checks: false,
            }),
            (0, _) => Decision::Done(PollOutcome::Failed {
                snapshot: snapshot.clone(),
                fail_fast: false,
            }),
            _ => Decision::Wait,
        }
    }
}

fn is_stale(prev: Option<&CheckSnapshot>, curr: &CheckSnapshot) -> bool {
    prev.is_some_and(|p| curr.observed_at() <= p.observed_at())
}
