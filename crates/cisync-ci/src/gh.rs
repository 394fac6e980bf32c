//! GitHub check runs via the `gh` CLI.
//!
//! `gh api repos/<owner>/<repo>/commits/<rev>/check-runs` is mapped onto a
//! [`CheckSnapshot`]. Failed runs get a [`FailureDetail`] built from the
//! run's output (title, summary and text) by the diagnostic extractors.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cisync_core::{
    failure_detail_from_log, CheckRun, CheckSnapshot, CheckState, CheckStatusSource, EngineError,
    ErrorKind, FailureDetail, FetchError, ProcessRunner,
};
use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::runner::TokioProcessRunner;

static HTTP_STATUS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"HTTP (\d{3})").ok());

static REVISION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$").ok());

#[derive(Debug, Deserialize)]
struct CheckRunsPage {
    #[serde(default)]
    check_runs: Vec<CheckRunJson>,
}

#[derive(Debug, Deserialize)]
struct CheckRunJson {
    #[serde(default)]
    id: u64,
    name: String,
    status: String,
    conclusion: Option<String>,
    output: Option<CheckOutputJson>,
}

#[derive(Debug, Default, Deserialize)]
struct CheckOutputJson {
    title: Option<String>,
    summary: Option<String>,
    text: Option<String>,
}

impl CheckOutputJson {
    fn log(&self) -> String {
        [&self.title, &self.summary, &self.text]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn state_of(status: &str, conclusion: Option<&str>) -> CheckState {
    if status != "completed" {
        return CheckState::Pending;
    }
    match conclusion {
        Some("success") | Some("neutral") => CheckState::Passed,
        Some("skipped") => CheckState::Skipped,
        // failure, timed_out, cancelled, action_required, startup_failure, stale
        Some(_) => CheckState::Failed,
        None => CheckState::Pending,
    }
}

fn failure_detail(run: &CheckRunJson) -> FailureDetail {
    let log = run.output.as_ref().map(CheckOutputJson::log).unwrap_or_default();
    let mut detail = failure_detail_from_log(&run.name, &log);
    if run.conclusion.as_deref() == Some("timed_out") && detail.error_kind == ErrorKind::Unknown {
        detail.error_kind = ErrorKind::Timeout;
    }
    detail
}

/// Parse a `check-runs` response body into a snapshot.
///
/// Re-runs of the same check are ordered by run id so the newest wins.
pub fn parse_check_runs(body: &str, observed_at: DateTime<Utc>) -> Result<CheckSnapshot, FetchError> {
    let mut page: CheckRunsPage = serde_json::from_str(body)
        .map_err(|e| FetchError::parse(format!("invalid check-runs response: {e}")))?;
    page.check_runs.sort_by_key(|r| r.id);

    let mut checks = Vec::with_capacity(page.check_runs.len());
    let mut details = Vec::new();
    for run in &page.check_runs {
        let state = state_of(&run.status, run.conclusion.as_deref());
        if state == CheckState::Failed {
            details.push(failure_detail(run));
        }
        checks.push(CheckRun {
            name: run.name.clone(),
            state,
        });
    }
    Ok(CheckSnapshot::new(checks, details, observed_at))
}

/// Map `gh` stderr onto a fetch error, keeping the HTTP status if shown.
pub fn fetch_error_from_stderr(stderr: &str) -> FetchError {
    let message = stderr.trim().to_string();
    match HTTP_STATUS
        .as_ref()
        .and_then(|re| re.captures(&message))
        .and_then(|c| c[1].parse::<u16>().ok())
    {
        Some(status) => FetchError::http(status, message),
        None => FetchError::transport(message),
    }
}

/// `CheckStatusSource` backed by `gh api`.
pub struct GhCheckSource {
    repo: String,
    cwd: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

impl GhCheckSource {
    /// Poll `owner/repo` with `gh` run from `cwd` (for its auth context).
    pub fn new(repo: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            cwd: cwd.into(),
            runner: Arc::new(TokioProcessRunner::new()),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    fn endpoint(&self, revision: &str) -> String {
        format!(
            "repos/{}/commits/{}/check-runs?per_page=100",
            self.repo, revision
        )
    }
}

#[async_trait]
impl CheckStatusSource for GhCheckSource {
    async fn fetch(&self, revision: &str) -> Result<CheckSnapshot, FetchError> {
        let valid = REVISION.as_ref().is_some_and(|re| re.is_match(revision));
        if !valid || revision.contains("..") {
            return Err(FetchError::parse(format!("invalid revision '{revision}'")));
        }
        let args = vec!["api".to_string(), self.endpoint(revision)];
        let output = self
            .runner
            .run("gh", &args, &self.cwd, &CancellationToken::new())
            .await
            .map_err(|e| match e {
                EngineError::Process(msg) => FetchError::transport(msg),
                other => FetchError::transport(other.to_string()),
            })?;
        if !output.success() {
            return Err(fetch_error_from_stderr(&output.stderr));
        }
        let snapshot = parse_check_runs(&output.stdout, Utc::now())?;
        debug!(
            repo = %self.repo,
            revision = %revision,
            total = snapshot.total(),
            pending = snapshot.pending(),
            "fetched check runs"
        );
        Ok(snapshot)
    }
}
