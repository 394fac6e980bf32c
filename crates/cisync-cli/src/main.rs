//! cisync - wait on CI checks for a revision and repair what it safely can
//!
//! ## Commands
//!
//! - `wait`: poll a revision's checks to a terminal outcome, optionally
//!   remediating failures and re-polling the fixed revision
//! - `classify`: run the diagnostic extractors over a CI log file
//! - `fix`: attempt one local fix for a failure class
//!
//! Exit codes: 0 succeeded, 1 failed, 2 timed out, 3 engine error.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dialoguer::Confirm;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

use cisync_ci::{capture_head_sha, GhCheckSource, GitPublisher, GitWorkspace, TokioProcessRunner};
use cisync_core::{
    extract_diagnostics, failure_detail_from_log, progress_channel, write_report_artifact,
    CiOutcome, Collaborators, EngineConfig, EngineReport, ErrorKind, FailureDetail, FixAction,
    FixApprover, FixAttempt, Orchestrator, PollStrategy, ProgressEvent, RemediationEngine,
    WorkspaceLock, WorkspaceSnapshot,
};

const DEFAULT_CONFIG: &str = "cisync.toml";

#[derive(Parser)]
#[command(name = "cisync")]
#[command(author = "Stevedores Org")]
#[command(version = cisync_core::VERSION)]
#[command(about = "Wait on CI checks and remediate failures", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and a JSON report
    #[arg(long, global = true)]
    json: bool,

    /// Config file (default: ./cisync.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for a revision's checks to finish
    Wait(WaitArgs),

    /// Extract diagnostics from a CI log file
    Classify {
        /// Log file to classify ("-" for stdin)
        log_file: PathBuf,

        /// Check name, used to infer the error kind when the log is opaque
        #[arg(long)]
        check: Option<String>,
    },

    /// Attempt one fix against the local working tree
    Fix(FixArgs),
}

#[derive(Args, Debug, Default)]
struct WaitArgs {
    /// Revision to wait on (default: HEAD of the workspace)
    revision: Option<String>,

    /// GitHub repository as owner/repo (default: inferred by gh from the workspace)
    #[arg(long, default_value = "{owner}/{repo}")]
    repo: String,

    /// Working tree used for remediation
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Poll interval strategy: fixed, exponential or adaptive
    #[arg(long)]
    strategy: Option<PollStrategy>,

    /// Overall time budget in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Initial poll interval in seconds
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Keep polling after a critical failure until every check finishes
    #[arg(long)]
    no_fail_fast: bool,

    /// Remediate failures and re-poll
    #[arg(long)]
    fix: bool,

    /// Resolve fixes without running them
    #[arg(long)]
    dry_run: bool,

    /// Allow fixes that may change program behavior
    #[arg(long)]
    allow_unsafe: bool,

    /// Ask before running each fix
    #[arg(long)]
    interactive: bool,

    /// Commit applied fixes locally before re-polling
    #[arg(long)]
    commit: bool,

    /// Commit applied fixes and push HEAD to this remote
    #[arg(long, value_name = "REMOTE")]
    push: Option<String>,

    /// Persist the report under <dir>/<run_id>/
    #[arg(long)]
    artifacts_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct FixArgs {
    /// Failure class to fix
    #[arg(long)]
    kind: ErrorKind,

    /// Files the failure points at (selects the ecosystem)
    #[arg(long = "file")]
    files: Vec<String>,

    /// Check name to record the attempt under
    #[arg(long, default_value = "local")]
    check: String,

    /// Working tree to fix
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Resolve the fix without running it
    #[arg(long)]
    dry_run: bool,

    /// Allow fixes that may change program behavior
    #[arg(long)]
    allow_unsafe: bool,

    /// Ask before running the fix
    #[arg(long)]
    interactive: bool,
}

/// Terminal confirmation for interactive remediation.
///
/// The prompt blocks on stdin, so it runs under `block_in_place` to keep
/// the runtime's other tasks (the Ctrl-C watcher) moving. Requires the
/// multi-threaded runtime `main` starts.
struct PromptApprover;

fn confirm_prompt(action: &FixAction, failure: &FailureDetail) -> String {
    let safety = if action.safe { "safe" } else { "UNSAFE" };
    format!(
        "Run `{}` ({safety}) to fix '{}'?",
        action.command_line(),
        failure.check_name
    )
}

impl FixApprover for PromptApprover {
    fn approve(&self, action: &FixAction, failure: &FailureDetail) -> bool {
        let prompt = confirm_prompt(action, failure);
        tokio::task::block_in_place(|| {
            Confirm::new()
                .with_prompt(prompt)
                .default(action.safe)
                .interact()
                .unwrap_or(false)
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    cisync_core::init_tracing(cli.json, level);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = match cli.command {
        Commands::Wait(args) => cmd_wait(cli.config.as_deref(), cli.json, args, cancel).await,
        Commands::Classify { log_file, check } => cmd_classify(&log_file, check.as_deref(), cli.json),
        Commands::Fix(args) => cmd_fix(cli.config.as_deref(), cli.json, args, cancel).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(3)
        }
    }
}

/// `--config`, else `./cisync.toml` when present, else defaults.
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None if Path::new(DEFAULT_CONFIG).exists() => PathBuf::from(DEFAULT_CONFIG),
        None => return Ok(EngineConfig::default()),
    };
    EngineConfig::load(&path).with_context(|| format!("Failed to load config {}", path.display()))
}

/// Command-line flags win over file values.
fn apply_wait_overrides(config: &mut EngineConfig, args: &WaitArgs) {
    if let Some(strategy) = args.strategy {
        config.poll.strategy = strategy;
    }
    if let Some(secs) = args.timeout_secs {
        config.poll.timeout_ms = secs.saturating_mul(1000);
    }
    if let Some(secs) = args.interval_secs {
        config.poll.initial_interval_ms = secs.saturating_mul(1000);
        config.poll.max_interval_ms = config.poll.max_interval_ms.max(config.poll.initial_interval_ms);
    }
    if args.no_fail_fast {
        config.poll.fail_fast = false;
    }
    let remediation = &mut config.remediation;
    remediation.enabled |= args.fix;
    remediation.dry_run |= args.dry_run;
    remediation.allow_unsafe |= args.allow_unsafe;
    remediation.interactive |= args.interactive;
}

fn exit_code(outcome: &CiOutcome) -> u8 {
    match outcome {
        CiOutcome::Succeeded { .. } => 0,
        CiOutcome::Failed { .. } => 1,
        CiOutcome::TimedOut { .. } => 2,
    }
}

fn render_progress(event: &ProgressEvent) -> String {
    let s = &event.snapshot;
    let mut line = format!(
        "[{}] {}/{} passed, {} failed, {} pending",
        event.sequence,
        s.passed(),
        s.total(),
        s.failed(),
        s.pending()
    );
    if !event.new_failures.is_empty() {
        let names: Vec<&str> = event.new_failures.iter().map(String::as_str).collect();
        line.push_str(&format!("; failed: {}", names.join(", ")));
    }
    if !event.new_passes.is_empty() {
        let names: Vec<&str> = event.new_passes.iter().map(String::as_str).collect();
        line.push_str(&format!("; passed: {}", names.join(", ")));
    }
    line
}

fn print_failures(failures: &[FailureDetail]) {
    for failure in failures {
        println!("  ✗ {} [{}] {}", failure.check_name, failure.error_kind, failure.summary);
        for file in &failure.affected_files {
            println!("      {file}");
        }
        if let Some(fix) = &failure.suggested_fix {
            println!("      fix: {fix}");
        }
    }
}

fn print_attempt(attempt: &FixAttempt) {
    let action = attempt
        .action
        .as_ref()
        .map(|a| a.name.as_str())
        .unwrap_or("-");
    let status = match (&attempt.skip_reason, attempt.applied, attempt.rolled_back) {
        (Some(reason), _, _) => format!("skipped ({reason})"),
        (None, true, _) => "applied".to_string(),
        (None, _, true) => "rolled back".to_string(),
        _ => "not applied".to_string(),
    };
    println!(
        "  {} via {action}: {status}, errors {} -> {}",
        attempt.check_name, attempt.errors_before, attempt.errors_after
    );
    if !attempt.changed_files.is_empty() {
        println!("      changed: {}", attempt.changed_files.join(", "));
    }
}

fn print_report(report: &EngineReport) {
    println!("Run ID: {}", report.run_id);
    println!("Revision: {}", report.revision);
    if report.final_revision != report.revision {
        println!("Final revision: {}", report.final_revision);
    }
    println!("Duration: {}ms", report.duration_ms());

    match &report.outcome {
        CiOutcome::Succeeded { snapshot, no_checks } => {
            if *no_checks {
                println!("Status: ✓ SUCCEEDED (no checks configured)");
            } else {
                println!("Status: ✓ SUCCEEDED ({} checks)", snapshot.total());
            }
        }
        CiOutcome::Failed { snapshot, .. } => {
            println!(
                "Status: ✗ FAILED ({}/{} checks failed)",
                snapshot.failed(),
                snapshot.total()
            );
            print_failures(snapshot.failure_details());
        }
        CiOutcome::TimedOut { last_snapshot } => {
            println!("Status: ⏱ TIMED OUT");
            if let Some(s) = last_snapshot {
                println!("  last seen: {}/{} passed, {} pending", s.passed(), s.total(), s.pending());
            }
        }
    }

    let metrics = &report.remediation;
    if metrics.total_attempts > 0 {
        println!();
        println!(
            "Remediation: {} attempt(s), {} error(s) fixed, {} rollback(s)",
            metrics.total_attempts, metrics.fixed, metrics.rollbacks
        );
        for attempt in &metrics.history {
            print_attempt(attempt);
        }
    }
}

async fn cmd_wait(
    config_path: Option<&Path>,
    json: bool,
    args: WaitArgs,
    cancel: CancellationToken,
) -> Result<u8> {
    let mut config = load_config(config_path)?;
    apply_wait_overrides(&mut config, &args);

    let workspace = GitWorkspace::open(&args.workspace)
        .await
        .with_context(|| format!("Failed to open workspace {}", args.workspace.display()))?;
    let revision = match &args.revision {
        Some(rev) => rev.clone(),
        None => capture_head_sha(workspace.root())
            .await
            .context("Failed to resolve HEAD")?,
    };

    let source = GhCheckSource::new(args.repo.clone(), workspace.root());
    let mut collaborators = Collaborators::new(
        Arc::new(source),
        Arc::new(workspace.clone()),
        Arc::new(TokioProcessRunner::new()),
    );
    if let Some(remote) = &args.push {
        collaborators = collaborators
            .with_publisher(Arc::new(GitPublisher::new(workspace.root()).with_push(remote)));
    } else if args.commit {
        collaborators = collaborators.with_publisher(Arc::new(GitPublisher::new(workspace.root())));
    }
    if config.remediation.interactive {
        collaborators = collaborators.with_approver(Arc::new(PromptApprover));
    }

    let orchestrator = Orchestrator::new(collaborators, config).with_cancellation(cancel);
    info!(revision = %revision, repo = %args.repo, "waiting for checks");

    let (tx, mut rx) = progress_channel();
    let run = async {
        let tx = tx;
        orchestrator.run(&revision, Some(&tx)).await
    };
    let render = async {
        while let Some(event) = rx.next().await {
            if !json && event.has_status_changed {
                println!("{} {}", event.revision, render_progress(&event));
            }
        }
    };
    let (report, ()) = tokio::join!(run, render);
    let report = report.context("CI wait failed")?;

    if let Some(dir) = &args.artifacts_dir {
        let path = write_report_artifact(&report, dir)
            .with_context(|| format!("Failed to write report artifact to {}", dir.display()))?;
        info!(path = %path.display(), "report artifact written");
    }

    if json {
        println!("{}", report.to_json_line()?);
    } else {
        println!();
        print_report(&report);
    }
    Ok(exit_code(&report.outcome))
}

fn cmd_classify(log_file: &Path, check: Option<&str>, json: bool) -> Result<u8> {
    let raw = if log_file == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("Failed to read log from stdin")?
    } else {
        std::fs::read_to_string(log_file)
            .with_context(|| format!("Failed to read log file {}", log_file.display()))?
    };

    match check {
        Some(name) => {
            let detail = failure_detail_from_log(name, &raw);
            if json {
                println!("{}", serde_json::to_string(&detail)?);
            } else {
                print_failures(std::slice::from_ref(&detail));
            }
        }
        None => {
            let fragment = extract_diagnostics(&raw);
            if json {
                println!("{}", serde_json::to_string(&fragment)?);
            } else {
                println!("Kind: {}", fragment.error_kind);
                println!("Extractor: {}", fragment.extractor);
                println!("Summary: {}", fragment.summary);
                for file in &fragment.affected_files {
                    println!("  {file}");
                }
                if let Some(fix) = &fragment.suggested_fix {
                    println!("Suggested fix: {fix}");
                }
            }
        }
    }
    Ok(0)
}

async fn cmd_fix(
    config_path: Option<&Path>,
    json: bool,
    args: FixArgs,
    cancel: CancellationToken,
) -> Result<u8> {
    let config = load_config(config_path)?;
    let mut options = config.remediation.fix_options();
    options.dry_run |= args.dry_run;
    options.allow_unsafe |= args.allow_unsafe;
    options.interactive |= args.interactive;

    let workspace = GitWorkspace::open(&args.workspace)
        .await
        .with_context(|| format!("Failed to open workspace {}", args.workspace.display()))?;
    let _lock = WorkspaceLock::acquire(workspace.root()).context("Workspace is busy")?;

    let mut failure = FailureDetail::new(&args.check, args.kind, format!("local {} fix", args.kind));
    for file in &args.files {
        failure = failure.with_file(file);
    }

    let mut engine = RemediationEngine::new(Arc::new(workspace), Arc::new(TokioProcessRunner::new()))
        .with_cancellation(cancel);
    if options.interactive {
        engine = engine.with_approver(Arc::new(PromptApprover));
    }
    info!(check = %failure.check_name, kind = %failure.error_kind, ecosystem = %engine.ecosystem_for(&failure), "attempting fix");

    let attempt = engine
        .attempt_fix(&failure, &options)
        .await
        .context("Fix attempt failed")?;

    if json {
        println!("{}", serde_json::to_string(&attempt)?);
    } else {
        print_attempt(&attempt);
    }
    Ok(if attempt.succeeded() || (options.dry_run && attempt.skip_reason.is_some()) {
        0
    } else {
        1
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cisync_core::SnapshotBuilder;

    #[test]
    fn cli_parses_wait_flags() {
        let cli = Cli::try_parse_from([
            "cisync",
            "--json",
            "wait",
            "abc123",
            "--strategy",
            "exponential",
            "--timeout-secs",
            "90",
            "--fix",
            "--push",
            "origin",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Wait(args) => {
                assert_eq!(args.revision.as_deref(), Some("abc123"));
                assert_eq!(args.strategy, Some(PollStrategy::Exponential));
                assert_eq!(args.timeout_secs, Some(90));
                assert!(args.fix);
                assert_eq!(args.push.as_deref(), Some("origin"));
                assert_eq!(args.repo, "{owner}/{repo}");
            }
            _ => panic!("expected wait"),
        }
    }

    #[test]
    fn cli_parses_fix_kind() {
        let cli = Cli::try_parse_from([
            "cisync", "fix", "--kind", "lint_error", "--file", "src/lib.rs", "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Commands::Fix(args) => {
                assert_eq!(args.kind, ErrorKind::LintError);
                assert_eq!(args.files, vec!["src/lib.rs".to_string()]);
                assert!(args.dry_run);
            }
            _ => panic!("expected fix"),
        }
        assert!(Cli::try_parse_from(["cisync", "fix", "--kind", "nonsense"]).is_err());
    }

    #[test]
    fn flags_override_config() {
        let mut config = EngineConfig::default();
        let args = WaitArgs {
            timeout_secs: Some(120),
            interval_secs: Some(90),
            no_fail_fast: true,
            fix: true,
            ..Default::default()
        };
        apply_wait_overrides(&mut config, &args);

        assert_eq!(config.poll.timeout_ms, 120_000);
        assert_eq!(config.poll.initial_interval_ms, 90_000);
        assert!(config.poll.max_interval_ms >= 90_000);
        assert!(!config.poll.fail_fast);
        assert!(config.remediation.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cisync.toml");
        std::fs::write(&path, "[poll]\nstrategy = \"fixed\"\n[remediation]\nenabled = true\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.poll.strategy, PollStrategy::Fixed);
        assert!(config.remediation.enabled);

        assert!(load_config(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn exit_codes_follow_outcome() {
        let snapshot = SnapshotBuilder::new().build();
        assert_eq!(
            exit_code(&CiOutcome::Succeeded {
                snapshot: snapshot.clone(),
                no_checks: true
            }),
            0
        );
        assert_eq!(
            exit_code(&CiOutcome::Failed {
                snapshot,
                remediation: Default::default()
            }),
            1
        );
        assert_eq!(exit_code(&CiOutcome::TimedOut { last_snapshot: None }), 2);
    }

    #[test]
    fn progress_line_names_changes() {
        let snapshot = SnapshotBuilder::new()
            .passed("build")
            .failed("test", ErrorKind::TestFailure)
            .pending("lint")
            .build();
        let event = ProgressEvent {
            revision: "abc".to_string(),
            sequence: 3,
            has_status_changed: true,
            new_failures: ["test".to_string()].into_iter().collect(),
            new_passes: ["build".to_string()].into_iter().collect(),
            snapshot,
        };
        assert_eq!(
            render_progress(&event),
            "[3] 1/3 passed, 1 failed, 1 pending; failed: test; passed: build"
        );
    }

    #[test]
    fn confirm_prompt_names_command_and_safety() {
        let catalog = cisync_core::FixCatalog::standard();
        let candidates = catalog.candidates(cisync_core::Ecosystem::Rust, ErrorKind::LintError);
        let failure = FailureDetail::new("fmt", ErrorKind::LintError, "Diff in src/lib.rs");

        let safe = &candidates[0];
        assert_eq!(
            confirm_prompt(safe, &failure),
            format!("Run `{}` (safe) to fix 'fmt'?", safe.command_line())
        );
        let unsafe_fix = candidates.iter().find(|a| !a.safe).unwrap();
        assert!(confirm_prompt(unsafe_fix, &failure).contains("(UNSAFE)"));
    }
}
