//! Error taxonomy for cisync.
//!
//! Fetch failures carry enough structure for the classifier to decide
//! whether they are transient. Everything that can terminate an engine
//! invocation abnormally is an [`EngineError`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Broad origin of a [`FetchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Network or process-level failure before a response was received.
    Transport,
    /// The provider answered with a non-success HTTP status.
    Http,
    /// The provider answered but the payload could not be normalized.
    Parse,
    /// The per-request timeout elapsed.
    Timeout,
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Transport => "transport",
            Self::Http => "http",
            Self::Parse => "parse",
            Self::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// Error returned by a [`crate::ports::CheckStatusSource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
    pub status: Option<u16>,
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} error (HTTP {status}): {}", self.kind, self.message),
            None => write!(f, "{} error: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Transport,
            message: message.into(),
            status: None,
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Http,
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Parse,
            message: message.into(),
            status: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Timeout,
            message: message.into(),
            status: None,
        }
    }

    /// Whether this error describes a transient condition worth retrying.
    pub fn is_retryable(&self) -> bool {
        crate::classifier::is_retryable(self)
    }
}

/// Errors that abort an engine invocation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("fatal fetch error: {0}")]
    FatalFetch(FetchError),

    #[error("transient fetch errors exceeded retry bound after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: u32, last: FetchError },

    #[error("operation cancelled")]
    Cancelled,

    #[error("working tree {path} is already in use by another cisync invocation")]
    WorkspaceBusy { path: PathBuf },

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for cisync engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
