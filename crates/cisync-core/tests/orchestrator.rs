use std::sync::Arc;

use cisync_core::fakes::{FakeWorkspace, RecordingPublisher, ScriptedCheckSource, ScriptedProcessRunner};
use cisync_core::{
    progress_channel, read_report_artifact, write_report_artifact, CheckState, CiOutcome,
    Collaborators, EngineConfig, EngineError, EngineState, ErrorKind, FailureDetail, Orchestrator,
    PollOptions, PollStrategy, ProcessOutput, RemediationConfig, SnapshotBuilder, WorkspaceLock,
};
use futures::StreamExt;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const FMT_CHECK: &str = "cargo fmt --all -- --check";
const FMT_FIX: &str = "cargo fmt --all";

fn config(remediation: bool) -> EngineConfig {
    EngineConfig {
        poll: PollOptions {
            timeout_ms: 60_000,
            initial_interval_ms: 100,
            max_interval_ms: 1_000,
            strategy: PollStrategy::Fixed,
            no_checks_grace_ms: 1_000,
            ..Default::default()
        },
        remediation: RemediationConfig {
            enabled: remediation,
            ..Default::default()
        },
    }
}

/// A fake working tree rooted in a real directory, so the lock file has
/// somewhere to live.
fn workspace() -> (TempDir, FakeWorkspace) {
    let dir = TempDir::new().unwrap();
    let ws = FakeWorkspace::new([("src/lib.rs", "fn a(){}\n")]).with_root(dir.path());
    (dir, ws)
}

fn fmt_failure() -> SnapshotBuilder {
    SnapshotBuilder::new().passed("test").failed_with(
        FailureDetail::new("fmt", ErrorKind::LintError, "Diff in src/lib.rs").with_file("src/lib.rs"),
    )
}

fn fixing_runner(ws: &FakeWorkspace) -> ScriptedProcessRunner {
    let target = ws.clone();
    ScriptedProcessRunner::new()
        .respond("cargo fmt --version", ProcessOutput::new(0, "rustfmt 1.7.0\n", ""))
        .respond(FMT_CHECK, ProcessOutput::new(1, "Diff in src/lib.rs at line 1:\n", ""))
        .respond(FMT_CHECK, ProcessOutput::new(0, "", ""))
        .respond_with(FMT_FIX, ProcessOutput::new(0, "", ""), move || {
            target.write("src/lib.rs", "fn a() {}\n")
        })
}

#[tokio::test(start_paused = true)]
async fn green_revision_succeeds_without_remediation() {
    let (_dir, ws) = workspace();
    let source = Arc::new(
        ScriptedCheckSource::new()
            .then(SnapshotBuilder::new().many("job", 2, CheckState::Pending))
            .then(SnapshotBuilder::new().many("job", 2, CheckState::Passed)),
    );
    let runner = Arc::new(ScriptedProcessRunner::new());
    let orchestrator = Orchestrator::new(
        Collaborators::new(source.clone(), Arc::new(ws), runner.clone()),
        config(true),
    );

    let report = orchestrator.run("rev", None).await.unwrap();

    assert!(report.outcome.is_success());
    assert_eq!(report.final_revision, "rev");
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.transitions[0].to, EngineState::Succeeded);
    assert_eq!(report.remediation.total_attempts, 0);
    assert!(runner.calls().is_empty());
    assert_eq!(source.fetch_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn failure_is_reported_when_remediation_disabled() {
    let (_dir, ws) = workspace();
    let source = Arc::new(ScriptedCheckSource::new().then(fmt_failure()));
    let runner = Arc::new(fixing_runner(&ws));
    let orchestrator = Orchestrator::new(
        Collaborators::new(source, Arc::new(ws.clone()), runner.clone()),
        config(false),
    );

    let report = orchestrator.run("rev", None).await.unwrap();

    match &report.outcome {
        CiOutcome::Failed {
            snapshot,
            remediation,
        } => {
            assert_eq!(snapshot.failure_details()[0].check_name, "fmt");
            assert_eq!(remediation.total_attempts, 0);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(runner.calls().is_empty());
    assert_eq!(ws.read("src/lib.rs").as_deref(), Some("fn a(){}\n"));
}

#[tokio::test(start_paused = true)]
async fn remediation_publishes_and_repolls_the_new_revision() {
    let (_dir, ws) = workspace();
    let source = Arc::new(
        ScriptedCheckSource::new()
            .then(fmt_failure())
            .then(SnapshotBuilder::new().passed("test").passed("fmt")),
    );
    let publisher = Arc::new(RecordingPublisher::new());
    let orchestrator = Orchestrator::new(
        Collaborators::new(source.clone(), Arc::new(ws.clone()), Arc::new(fixing_runner(&ws)))
            .with_publisher(publisher.clone()),
        config(true),
    );

    let report = orchestrator.run("rev", None).await.unwrap();

    assert!(report.outcome.is_success());
    assert_eq!(report.revision, "rev");
    assert_eq!(report.final_revision, "rev-fix1");
    assert_eq!(source.fetched_revisions(), vec!["rev", "rev-fix1"]);
    assert_eq!(publisher.published(), vec![("rev".to_string(), 1)]);

    let path: Vec<_> = report.transitions.iter().map(|t| (t.from, t.to)).collect();
    assert_eq!(
        path,
        vec![
            (EngineState::Polling, EngineState::Remediating),
            (EngineState::Remediating, EngineState::Polling),
            (EngineState::Polling, EngineState::Succeeded),
        ]
    );
    assert_eq!(report.transitions[1].revision, "rev-fix1");

    assert_eq!(report.remediation.total_attempts, 1);
    assert_eq!(report.remediation.fixed, 1);
    assert_eq!(
        report.remediation.history[0].changed_files,
        vec!["src/lib.rs".to_string()]
    );
    assert_eq!(ws.read("src/lib.rs").as_deref(), Some("fn a() {}\n"));
}

#[tokio::test(start_paused = true)]
async fn remediation_stops_after_max_attempts() {
    let (_dir, ws) = workspace();
    let source = Arc::new(ScriptedCheckSource::new().then(fmt_failure()));
    let publisher = Arc::new(RecordingPublisher::new());
    let orchestrator = Orchestrator::new(
        Collaborators::new(source, Arc::new(ws.clone()), Arc::new(fixing_runner(&ws)))
            .with_publisher(publisher.clone()),
        config(true),
    );

    let report = orchestrator.run("rev", None).await.unwrap();

    match &report.outcome {
        CiOutcome::Failed { remediation, .. } => {
            assert_eq!(remediation.attempts_for("fmt"), 2);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(publisher.published().len(), 2);
    assert_eq!(report.final_revision, "rev-fix1-fix2");
    assert_eq!(report.transitions.last().unwrap().to, EngineState::Failed);
}

#[tokio::test(start_paused = true)]
async fn unfixable_failure_fails_without_attempting() {
    let (_dir, ws) = workspace();
    let source = Arc::new(ScriptedCheckSource::new().then(
        SnapshotBuilder::new().failed_with(
            FailureDetail::new("audit", ErrorKind::SecurityFinding, "RUSTSEC-2024-0001")
                .with_file("Cargo.lock"),
        ),
    ));
    let runner = Arc::new(ScriptedProcessRunner::new());
    let orchestrator = Orchestrator::new(
        Collaborators::new(source, Arc::new(ws), runner.clone()),
        config(true),
    );

    let report = orchestrator.run("rev", None).await.unwrap();

    assert_eq!(report.outcome.kind(), "failed");
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.transitions[0].to, EngineState::Failed);
    assert!(runner.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn pending_checks_time_out() {
    let (_dir, ws) = workspace();
    let source = Arc::new(ScriptedCheckSource::new().then(SnapshotBuilder::new().pending("slow")));
    let mut config = config(true);
    config.poll.timeout_ms = 500;
    let orchestrator = Orchestrator::new(
        Collaborators::new(source, Arc::new(ws), Arc::new(ScriptedProcessRunner::new())),
        config,
    );

    let report = orchestrator.run("rev", None).await.unwrap();

    match &report.outcome {
        CiOutcome::TimedOut { last_snapshot } => {
            assert_eq!(last_snapshot.as_ref().unwrap().pending(), 1);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(report.transitions[0].to, EngineState::TimedOut);
}

#[tokio::test]
async fn busy_workspace_is_rejected() {
    let (dir, ws) = workspace();
    let _held = WorkspaceLock::acquire(dir.path()).unwrap();
    let source = Arc::new(ScriptedCheckSource::new().then(SnapshotBuilder::new().passed("ci")));
    let orchestrator = Orchestrator::new(
        Collaborators::new(source.clone(), Arc::new(ws), Arc::new(ScriptedProcessRunner::new())),
        config(true),
    );

    let err = orchestrator.run("rev", None).await.unwrap_err();

    assert!(matches!(err, EngineError::WorkspaceBusy { .. }));
    assert_eq!(source.fetch_count(), 0);
}

#[tokio::test]
async fn cancelled_run_returns_cancelled() {
    let (_dir, ws) = workspace();
    let source = Arc::new(ScriptedCheckSource::new().then(SnapshotBuilder::new().pending("ci")));
    let cancel = CancellationToken::new();
    cancel.cancel();
    let orchestrator = Orchestrator::new(
        Collaborators::new(source, Arc::new(ws), Arc::new(ScriptedProcessRunner::new())),
        config(true),
    )
    .with_cancellation(cancel);

    let err = orchestrator.run("rev", None).await.unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
}

#[tokio::test]
async fn invalid_config_is_rejected_before_polling() {
    let (_dir, ws) = workspace();
    let source = Arc::new(ScriptedCheckSource::new());
    let mut config = config(false);
    config.poll.initial_interval_ms = 0;
    let orchestrator = Orchestrator::new(
        Collaborators::new(source.clone(), Arc::new(ws), Arc::new(ScriptedProcessRunner::new())),
        config,
    );

    let err = orchestrator.run("rev", None).await.unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
    assert_eq!(source.fetch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn progress_spans_every_remediation_cycle() {
    let (_dir, ws) = workspace();
    let source = Arc::new(
        ScriptedCheckSource::new()
            .then(fmt_failure())
            .then(SnapshotBuilder::new().passed("test").passed("fmt")),
    );
    let orchestrator = Orchestrator::new(
        Collaborators::new(source, Arc::new(ws.clone()), Arc::new(fixing_runner(&ws)))
            .with_publisher(Arc::new(RecordingPublisher::new())),
        config(true),
    );

    let (tx, rx) = progress_channel();
    orchestrator.run("rev", Some(&tx)).await.unwrap();
    drop(tx);
    let events: Vec<_> = rx.collect().await;

    let revisions: Vec<_> = events.iter().map(|e| e.revision.as_str()).collect();
    assert_eq!(revisions, vec!["rev", "rev-fix1"]);
    assert!(events[0].new_failures.contains("fmt"));
}

#[tokio::test(start_paused = true)]
async fn report_serializes_and_round_trips_through_artifact() {
    let (dir, ws) = workspace();
    let source = Arc::new(ScriptedCheckSource::new().then(SnapshotBuilder::new().passed("ci")));
    let orchestrator = Orchestrator::new(
        Collaborators::new(source, Arc::new(ws), Arc::new(ScriptedProcessRunner::new())),
        config(false),
    );
    let report = orchestrator.run("rev", None).await.unwrap();

    let line = report.to_json_line().unwrap();
    assert!(!line.contains('\n'));
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["outcome"]["kind"], "succeeded");
    assert_eq!(value["revision"], "rev");

    let artifacts = dir.path().join("artifacts");
    write_report_artifact(&report, &artifacts).unwrap();
    let loaded = read_report_artifact(&report.run_id.to_string(), &artifacts).unwrap();
    assert_eq!(loaded.run_id, report.run_id);
    assert_eq!(loaded.outcome, report.outcome);
}
