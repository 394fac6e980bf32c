//! Domain model types for cisync.
//!
//! - `CheckSnapshot` / `FailureDetail`: normalized check status for a revision
//! - `FixAction` / `FixAttempt` / `RemediationMetrics`: remediation history
//! - `PollOutcome` / `CiOutcome` / `EngineReport`: terminal results
//! - `EngineError` / `FetchError`: error taxonomy

pub mod error;
pub mod fix;
pub mod outcome;
pub mod snapshot;

pub use error::{EngineError, FetchError, FetchErrorKind, Result};
pub use fix::{
    CheckCommand, FixAction, FixAttempt, FixOptions, MissingTool, RemediationMetrics, SkipReason,
};
pub use outcome::{
    CiOutcome, EngineReport, EngineState, PollOutcome, ProgressEvent, StateTransition,
};
pub use snapshot::{
    CheckRun, CheckSnapshot, CheckState, ErrorKind, FailureDetail, SnapshotBuilder,
};
