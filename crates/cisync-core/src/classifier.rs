//! Pure classification over snapshots and fetch errors.
//!
//! Nothing here performs I/O. Diff helpers compare check names between two
//! snapshots; with no previous snapshot every entry counts as new.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::{CheckSnapshot, CheckState, FetchError, FetchErrorKind};

/// Message patterns that mark a fetch failure as transient.
static TRANSIENT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)timed?[\s_-]?out",
        r"(?i)rate[\s_-]?limit",
        r"(?i)too many requests",
        r"(?i)connection (reset|refused|closed|aborted)",
        r"(?i)temporarily unavailable",
        r"(?i)bad gateway|service unavailable|gateway timeout",
        r"(?i)\bHTTP 5\d\d\b",
        r"\b(ECONNRESET|ETIMEDOUT|ECONNREFUSED|EAI_AGAIN|EPIPE)\b",
        r"(?i)network is unreachable",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// True if any failure in the snapshot is critical.
pub fn has_critical_failure(snapshot: &CheckSnapshot) -> bool {
    snapshot
        .failure_details()
        .iter()
        .any(|d| d.error_kind.is_critical())
}

/// Whether a fetch error is transient (timeout, rate limit, 5xx).
///
/// Anything not matching the fixed transient list is fatal.
pub fn is_retryable(err: &FetchError) -> bool {
    if err.kind == FetchErrorKind::Timeout {
        return true;
    }
    if let Some(status) = err.status {
        if status == 408 || status == 429 || (500..600).contains(&status) {
            return true;
        }
        // GitHub reports secondary rate limits as 403.
        if status != 403 {
            return false;
        }
    }
    if err.kind == FetchErrorKind::Parse {
        return false;
    }
    TRANSIENT_PATTERNS.iter().any(|re| re.is_match(&err.message))
}

fn state_map(snapshot: &CheckSnapshot) -> HashMap<&str, CheckState> {
    snapshot
        .checks()
        .iter()
        .map(|c| (c.name.as_str(), c.state))
        .collect()
}

/// Whether any check appeared, disappeared or changed state.
pub fn has_status_changed(prev: Option<&CheckSnapshot>, curr: &CheckSnapshot) -> bool {
    match prev {
        None => true,
        Some(prev) => state_map(prev) != state_map(curr),
    }
}

fn newly_in(prev: Option<&CheckSnapshot>, curr: &CheckSnapshot, state: CheckState) -> BTreeSet<String> {
    let before = prev.map(|p| p.names_in(state)).unwrap_or_default();
    curr.names_in(state)
        .difference(&before)
        .map(|s| s.to_string())
        .collect()
}

/// Checks failed in `curr` that were not failed in `prev`.
pub fn get_new_failures(prev: Option<&CheckSnapshot>, curr: &CheckSnapshot) -> BTreeSet<String> {
    newly_in(prev, curr, CheckState::Failed)
}

/// Checks passed in `curr` that were not passed in `prev`.
pub fn get_new_passes(prev: Option<&CheckSnapshot>, curr: &CheckSnapshot) -> BTreeSet<String> {
    newly_in(prev, curr, CheckState::Passed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, SnapshotBuilder};

    #[test]
    fn test_has_critical_failure() {
        let lint_only = SnapshotBuilder::new()
            .failed("lint", ErrorKind::LintError)
            .pending("test")
            .build();
        assert!(!has_critical_failure(&lint_only));

        let with_build = SnapshotBuilder::new()
            .failed("lint", ErrorKind::LintError)
            .failed("build", ErrorKind::BuildError)
            .build();
        assert!(has_critical_failure(&with_build));
    }

    #[test]
    fn test_is_retryable_statuses() {
        assert!(is_retryable(&FetchError::http(502, "Bad Gateway")));
        assert!(is_retryable(&FetchError::http(503, "unavailable")));
        assert!(is_retryable(&FetchError::http(429, "slow down")));
        assert!(!is_retryable(&FetchError::http(401, "Bad credentials")));
        assert!(!is_retryable(&FetchError::http(404, "Not Found")));
        assert!(is_retryable(&FetchError::http(
            403,
            "You have exceeded a secondary rate limit"
        )));
        assert!(!is_retryable(&FetchError::http(403, "Resource not accessible")));
    }

    #[test]
    fn test_is_retryable_messages() {
        assert!(is_retryable(&FetchError::timeout("deadline")));
        assert!(is_retryable(&FetchError::transport(
            "dial tcp: i/o timeout"
        )));
        assert!(is_retryable(&FetchError::transport(
            "read: connection reset by peer"
        )));
        assert!(is_retryable(&FetchError::transport("ECONNRESET")));
        assert!(!is_retryable(&FetchError::transport(
            "gh: command not found"
        )));
        assert!(!is_retryable(&FetchError::parse("timed out mid-body")));
    }

    #[test]
    fn test_status_changed_identity_is_false() {
        let a = SnapshotBuilder::new()
            .passed("fmt")
            .failed("test", ErrorKind::TestFailure)
            .pending("build")
            .build();
        assert!(!has_status_changed(Some(&a), &a));
        assert!(has_status_changed(None, &a));
    }

    #[test]
    fn test_status_changed_on_transition() {
        let a = SnapshotBuilder::new().pending("build").build();
        let b = SnapshotBuilder::new().passed("build").build();
        assert!(has_status_changed(Some(&a), &b));

        let c = SnapshotBuilder::new().pending("build").pending("lint").build();
        assert!(has_status_changed(Some(&a), &c));
    }

    #[test]
    fn test_new_failures_is_set_difference() {
        let a = SnapshotBuilder::new()
            .failed("lint", ErrorKind::LintError)
            .pending("test")
            .pending("build")
            .build();
        let b = SnapshotBuilder::new()
            .failed("lint", ErrorKind::LintError)
            .failed("test", ErrorKind::TestFailure)
            .passed("build")
            .build();

        let failures = get_new_failures(Some(&a), &b);
        assert_eq!(failures, BTreeSet::from(["test".to_string()]));

        let passes = get_new_passes(Some(&a), &b);
        assert_eq!(passes, BTreeSet::from(["build".to_string()]));

        assert!(get_new_failures(Some(&b), &b).is_empty());
    }

    #[test]
    fn test_without_previous_everything_is_new() {
        let b = SnapshotBuilder::new()
            .failed("lint", ErrorKind::LintError)
            .passed("build")
            .build();
        assert_eq!(get_new_failures(None, &b).len(), 1);
        assert_eq!(get_new_passes(None, &b).len(), 1);
    }
}
