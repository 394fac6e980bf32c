//! In-memory fakes for the collaborator traits. Compiled for this crate's
//! tests and, through the `test-util` feature, for downstream tests.
//!
//! - `ScriptedCheckSource`: replays a script of snapshots and fetch errors
//! - `FakeWorkspace`: a file map with checkpoints and a git-style diff
//! - `ScriptedProcessRunner`: canned outputs keyed by command line
//! - `RecordingPublisher` / `StaticApprover`: record what the engine asked for

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use crate::domain::{
    CheckSnapshot, EngineError, FailureDetail, FetchError, FixAction, FixAttempt, Result,
    SnapshotBuilder,
};
use crate::ports::{
    CheckStatusSource, CheckpointId, FixApprover, ProcessOutput, ProcessRunner, RevisionPublisher,
    WorkspaceSnapshot,
};

// ---------------------------------------------------------------------------
// ScriptedCheckSource
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Step {
    Snapshot(SnapshotBuilder),
    Error(FetchError),
}

/// Replays a fixed script; the last step repeats forever.
///
/// The n-th fetch (0-based) is stamped `base + n` seconds, so accepted
/// snapshots are strictly increasing in `observed_at`.
#[derive(Debug)]
pub struct ScriptedCheckSource {
    steps: Vec<Step>,
    base: DateTime<Utc>,
    fetches: Mutex<Vec<String>>,
}

impl Default for ScriptedCheckSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCheckSource {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            base: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now),
            fetches: Mutex::new(Vec::new()),
        }
    }

    /// Append a snapshot step.
    pub fn then(mut self, snapshot: SnapshotBuilder) -> Self {
        self.steps.push(Step::Snapshot(snapshot));
        self
    }

    /// Append `count` identical snapshot steps.
    pub fn then_repeat(mut self, snapshot: SnapshotBuilder, count: usize) -> Self {
        for _ in 0..count {
            self.steps.push(Step::Snapshot(snapshot.clone()));
        }
        self
    }

    /// Append a fetch-error step.
    pub fn fail(mut self, err: FetchError) -> Self {
        self.steps.push(Step::Error(err));
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    /// Revisions requested, in order.
    pub fn fetched_revisions(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckStatusSource for ScriptedCheckSource {
    async fn fetch(&self, revision: &str) -> std::result::Result<CheckSnapshot, FetchError> {
        let n = {
            let mut fetches = self.fetches.lock().unwrap();
            fetches.push(revision.to_string());
            fetches.len() - 1
        };
        let observed_at = self.base + ChronoDuration::seconds(n as i64);
        match self.steps.get(n).or_else(|| self.steps.last()) {
            Some(Step::Snapshot(builder)) => Ok(builder.clone().build_at(observed_at)),
            Some(Step::Error(err)) => Err(err.clone()),
            None => Ok(CheckSnapshot::empty(observed_at)),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeWorkspace
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct WorkspaceState {
    /// Committed content.
    baseline: BTreeMap<String, String>,
    /// Working-tree content.
    files: BTreeMap<String, String>,
    checkpoints: HashMap<String, BTreeMap<String, String>>,
    restores: Vec<CheckpointId>,
}

/// In-memory working tree.
#[derive(Debug, Clone)]
pub struct FakeWorkspace {
    root: PathBuf,
    state: Arc<Mutex<WorkspaceState>>,
}

impl FakeWorkspace {
    /// A clean tree whose committed content is `files`.
    pub fn new<I, K, V>(files: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let files: BTreeMap<String, String> = files
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            root: PathBuf::from("/workspace"),
            state: Arc::new(Mutex::new(WorkspaceState {
                baseline: files.clone(),
                files,
                ..Default::default()
            })),
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Modify the working tree (an uncommitted change).
    pub fn write(&self, path: &str, content: &str) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), content.to_string());
    }

    pub fn read(&self, path: &str) -> Option<String> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    /// Checkpoints restored so far, in order.
    pub fn restores(&self) -> Vec<CheckpointId> {
        self.state.lock().unwrap().restores.clone()
    }

    pub fn checkpoint_count(&self) -> usize {
        self.state.lock().unwrap().checkpoints.len()
    }
}

#[async_trait]
impl WorkspaceSnapshot for FakeWorkspace {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn is_dirty(&self) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.files != state.baseline)
    }

    async fn checkpoint(&self, label: &str) -> Result<CheckpointId> {
        let mut state = self.state.lock().unwrap();
        let reference = format!("ckpt-{}", state.checkpoints.len() + 1);
        let files = state.files.clone();
        state.checkpoints.insert(reference.clone(), files);
        Ok(CheckpointId::new(label, reference))
    }

    async fn restore(&self, id: &CheckpointId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let files = if id.is_pristine() {
            state.baseline.clone()
        } else {
            state
                .checkpoints
                .get(&id.reference)
                .cloned()
                .ok_or_else(|| EngineError::Workspace(format!("unknown checkpoint {id}")))?
        };
        state.files = files;
        state.restores.push(id.clone());
        Ok(())
    }

    async fn diff(&self) -> Result<String> {
        let state = self.state.lock().unwrap();
        let mut out = String::new();
        let paths: std::collections::BTreeSet<&String> =
            state.baseline.keys().chain(state.files.keys()).collect();
        for path in paths {
            let before = state.baseline.get(path);
            let after = state.files.get(path);
            if before == after {
                continue;
            }
            out.push_str(&format!("diff --git a/{path} b/{path}\n"));
            for line in before.map(|s| s.lines()).into_iter().flatten() {
                out.push_str(&format!("-{line}\n"));
            }
            for line in after.map(|s| s.lines()).into_iter().flatten() {
                out.push_str(&format!("+{line}\n"));
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// ScriptedProcessRunner
// ---------------------------------------------------------------------------

type SideEffect = Box<dyn Fn() + Send + Sync>;

struct Response {
    output: ProcessOutput,
    effect: Option<SideEffect>,
}

/// Canned process outputs keyed by the full command line
/// (`"cargo fmt --all"`).
///
/// Responses for a key are consumed in order; the last one repeats. A
/// command with no responses fails to spawn, which is how a missing tool
/// looks to the engine.
#[derive(Default)]
pub struct ScriptedProcessRunner {
    responses: Mutex<HashMap<String, VecDeque<Response>>>,
    calls: Mutex<Vec<String>>,
}

impl std::fmt::Debug for ScriptedProcessRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProcessRunner")
            .field("calls", &self.calls())
            .finish()
    }
}

impl ScriptedProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an output for `command_line`.
    pub fn respond(self, command_line: &str, output: ProcessOutput) -> Self {
        self.push(command_line, output, None);
        self
    }

    /// Queue an output for `command_line` that also runs `effect` (e.g. a
    /// fake formatter rewriting files).
    pub fn respond_with<F>(self, command_line: &str, output: ProcessOutput, effect: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.push(command_line, output, Some(Box::new(effect)));
        self
    }

    /// Make `tool --version` succeed.
    pub fn with_tool(self, tool: &str) -> Self {
        self.respond(
            &format!("{tool} --version"),
            ProcessOutput::new(0, format!("{tool} 1.0.0\n"), ""),
        )
    }

    fn push(&self, command_line: &str, output: ProcessOutput, effect: Option<SideEffect>) {
        self.responses
            .lock()
            .unwrap()
            .entry(command_line.to_string())
            .or_default()
            .push_back(Response { output, effect });
    }

    /// Every command line run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, command_line: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == command_line)
            .count()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedProcessRunner {
    async fn run(
        &self,
        command: &str,
        args: &[String],
        _cwd: &Path,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let line = std::iter::once(command)
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().unwrap().push(line.clone());

        let mut responses = self.responses.lock().unwrap();
        let queue = responses.get_mut(&line).filter(|q| !q.is_empty()).ok_or_else(|| {
            EngineError::Process(format!("failed to spawn `{line}`: No such file or directory"))
        })?;
        let popped = if queue.len() > 1 { queue.pop_front() } else { None };
        let response = match &popped {
            Some(r) => r,
            None => &queue[0],
        };
        if let Some(effect) = &response.effect {
            effect();
        }
        Ok(response.output.clone())
    }
}

// ---------------------------------------------------------------------------
// RecordingPublisher / StaticApprover
// ---------------------------------------------------------------------------

/// Publishes to `<revision>-fix<n>` and records every call.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, usize)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(revision, applied attempts)` per publish call.
    pub fn published(&self) -> Vec<(String, usize)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl RevisionPublisher for RecordingPublisher {
    async fn publish(&self, revision: &str, applied: &[FixAttempt]) -> Result<String> {
        let mut published = self.published.lock().unwrap();
        published.push((revision.to_string(), applied.len()));
        Ok(format!("{revision}-fix{}", published.len()))
    }
}

/// Answers every approval with a fixed value and counts the questions.
#[derive(Debug, Default)]
pub struct StaticApprover {
    answer: bool,
    asked: Mutex<Vec<String>>,
}

impl StaticApprover {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Names of actions the approver was asked about.
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

impl FixApprover for StaticApprover {
    fn approve(&self, action: &FixAction, _failure: &FailureDetail) -> bool {
        self.asked.lock().unwrap().push(action.name.clone());
        self.answer
    }
}
