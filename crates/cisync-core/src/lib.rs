//! cisync core library
//!
//! Waits for a revision's CI checks to settle, classifies what failed, and
//! optionally repairs fixable failures in the local working tree before
//! re-verifying. Collaborators (check provider, git, subprocesses) are
//! consumed through the traits in [`ports`].

pub mod artifact;
pub mod classifier;
pub mod config;
pub mod diagnostics;
pub mod domain;
#[cfg(any(test, feature = "test-util"))]
pub mod fakes;
pub mod lock;
pub mod obs;
pub mod orchestrator;
pub mod poller;
pub mod ports;
pub mod remediation;
pub mod telemetry;

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use artifact::{read_report_artifact, write_report_artifact};
pub use classifier::{
    get_new_failures, get_new_passes, has_critical_failure, has_status_changed, is_retryable,
};
pub use config::{EngineConfig, PollOptions, PollStrategy, RemediationConfig};
pub use diagnostics::{
    extract_diagnostics, failure_detail_from_log, infer_error_kind, DiagnosticFragment,
    ExtractorRegistry,
};
pub use domain::{
    CheckCommand, CheckRun, CheckSnapshot, CheckState, CiOutcome, EngineError, EngineReport,
    EngineState, ErrorKind, FailureDetail, FetchError, FetchErrorKind, FixAction, FixAttempt,
    FixOptions, MissingTool, PollOutcome, ProgressEvent, RemediationMetrics, Result, SkipReason,
    SnapshotBuilder, StateTransition,
};
pub use lock::WorkspaceLock;
pub use orchestrator::{Collaborators, Orchestrator};
pub use poller::{progress_channel, Poller, ProgressSender, ProgressStream};
pub use ports::{
    AutoApprove, CheckStatusSource, CheckpointId, FixApprover, ProcessOutput, ProcessRunner,
    RevisionPublisher, SameRevision, WorkspaceSnapshot,
};
pub use remediation::{detect_ecosystem, Ecosystem, FixCatalog, RemediationEngine, Resolution};
pub use telemetry::init_tracing;
