//! Terminal results, progress events and the engine report record.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::fix::RemediationMetrics;
use super::snapshot::CheckSnapshot;

/// Terminal outcome of one poll loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PollOutcome {
    Succeeded {
        snapshot: CheckSnapshot,
        /// No checks were ever registered within the grace period.
        no_checks: bool,
    },
    Failed {
        snapshot: CheckSnapshot,
        /// Returned early on a critical failure with checks still pending.
        fail_fast: bool,
    },
    TimedOut {
        last_snapshot: Option<CheckSnapshot>,
    },
}

impl PollOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::TimedOut { .. } => "timed_out",
        }
    }
}

/// The engine's terminal result, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CiOutcome {
    Succeeded {
        snapshot: CheckSnapshot,
        no_checks: bool,
    },
    Failed {
        snapshot: CheckSnapshot,
        remediation: RemediationMetrics,
    },
    TimedOut {
        last_snapshot: Option<CheckSnapshot>,
    },
}

impl CiOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::TimedOut { .. } => "timed_out",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Most recent snapshot, if any was observed.
    pub fn snapshot(&self) -> Option<&CheckSnapshot> {
        match self {
            Self::Succeeded { snapshot, .. } | Self::Failed { snapshot, .. } => Some(snapshot),
            Self::TimedOut { last_snapshot } => last_snapshot.as_ref(),
        }
    }
}

/// Orchestrator state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Polling,
    Remediating,
    Succeeded,
    Failed,
    TimedOut,
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: EngineState) -> bool {
        use EngineState::*;
        matches!(
            (self, next),
            (Polling, Succeeded)
                | (Polling, TimedOut)
                | (Polling, Remediating)
                | (Polling, Failed)
                | (Remediating, Polling)
                | (Remediating, Failed)
        )
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Polling => "polling",
            Self::Remediating => "remediating",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        };
        write!(f, "{s}")
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: EngineState,
    pub to: EngineState,
    pub revision: String,
    pub at: DateTime<Utc>,
}

/// Incremental progress for one accepted poll sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub revision: String,
    /// 1-based index of the sample within its poll loop.
    pub sequence: u64,
    pub has_status_changed: bool,
    pub new_failures: BTreeSet<String>,
    pub new_passes: BTreeSet<String>,
    pub snapshot: CheckSnapshot,
}

impl ProgressEvent {
    pub fn observed_at(&self) -> DateTime<Utc> {
        self.snapshot.observed_at()
    }
}

/// Full audit record of one orchestrator invocation.
///
/// Serializes to a single JSON object so callers can forward it verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineReport {
    pub run_id: Uuid,
    pub revision: String,
    /// Revision the final poll cycle observed (differs after published fixes).
    pub final_revision: String,
    pub outcome: CiOutcome,
    pub remediation: RemediationMetrics,
    pub transitions: Vec<StateTransition>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl EngineReport {
    /// Render as one compact JSON line (no trailing newline).
    pub fn to_json_line(&self) -> crate::domain::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}
