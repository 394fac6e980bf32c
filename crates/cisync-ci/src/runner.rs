//! Subprocess execution on tokio.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cisync_core::{EngineError, ProcessOutput, ProcessRunner, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs commands as child processes with piped output.
///
/// On unix each child leads its own process group. Cancellation and
/// timeouts kill the whole group (so `cargo fmt` takes its `rustfmt`
/// children with it) and reap the leader before `run` returns.
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner {
    timeout: Option<Duration>,
}

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail runs that take longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

pub(crate) fn command_line(command: &str, args: &[String]) -> String {
    std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

enum Finished {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    TimedOut(Duration),
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    })
}

/// Kill the child's process group, then wait for the leader to exit.
async fn terminate(child: &mut Child, line: &str) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: killpg only sends a signal. The group id is the pid of
            // a child we spawned as group leader and have not reaped yet.
            unsafe {
                libc::killpg(pid as libc::pid_t, libc::SIGKILL);
            }
        }
    }
    let _ = child.start_kill();
    if let Err(e) = child.wait().await {
        warn!(command = %line, error = %e, "failed to reap terminated process");
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        command: &str,
        args: &[String],
        cwd: &Path,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        let start = Instant::now();
        let line = command_line(command, args);
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let mut cmd = Command::new(command);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::Process(format!("failed to spawn `{line}`: {e}")))?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let limit = self.timeout;
        let expired = async move {
            match limit {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };
        let finished = tokio::select! {
            status = child.wait() => Finished::Exited(status),
            _ = cancel.cancelled() => Finished::Cancelled,
            limit = expired => Finished::TimedOut(limit),
        };

        let status = match finished {
            Finished::Exited(status) => status?,
            Finished::Cancelled => {
                terminate(&mut child, &line).await;
                debug!(command = %line, "process cancelled");
                return Err(EngineError::Cancelled);
            }
            Finished::TimedOut(limit) => {
                terminate(&mut child, &line).await;
                return Err(EngineError::Process(format!(
                    "`{line}` timed out after {}ms",
                    limit.as_millis()
                )));
            }
        };
        let stdout = stdout.await.unwrap_or_default();
        let stderr = stderr.await.unwrap_or_default();

        let exit_code = status.code().unwrap_or(-1);
        debug!(
            command = %line,
            exit_code = exit_code,
            duration_ms = start.elapsed().as_millis() as u64,
            "process finished"
        );

        Ok(ProcessOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let runner = TokioProcessRunner::new();
        let out = runner
            .run("echo", &args(&["hello"]), Path::new("."), &CancellationToken::new())
            .await
            .expect("execute failed");
        assert!(out.success());
        assert!(out.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let runner = TokioProcessRunner::new();
        let out = runner.run("false", &[], Path::new("."), &CancellationToken::new()).await.unwrap();
        assert!(!out.success());
        assert_ne!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let runner = TokioProcessRunner::new();
        let err = runner
            .run("cisync-definitely-not-installed", &args(&["--version"]), Path::new("."), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            EngineError::Process(msg) => assert!(msg.contains("failed to spawn")),
            other => panic!("expected process error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_runs_in_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let out = TokioProcessRunner::new()
            .run("ls", &[], dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.stdout.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_timeout_kills_slow_command() {
        let runner = TokioProcessRunner::new().with_timeout(Duration::from_millis(100));
        let err = runner
            .run("sleep", &args(&["5"]), Path::new("."), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Process(ref m) if m.contains("timed out")));
    }

    /// A shell that backgrounds a delayed writer, the way `cargo fmt`
    /// leaves `rustfmt` running underneath it.
    fn delayed_writer() -> Vec<String> {
        args(&["-c", "(sleep 1; echo late > late.txt) & sleep 5"])
    }

    #[tokio::test]
    async fn test_cancel_kills_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = TokioProcessRunner::new()
            .run("sh", &delayed_writer(), dir.path(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.path().join("late.txt").exists());
    }

    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let err = TokioProcessRunner::new()
            .with_timeout(Duration::from_millis(200))
            .run("sh", &delayed_writer(), dir.path(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Process(ref m) if m.contains("timed out")));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.path().join("late.txt").exists());
    }

    #[tokio::test]
    async fn test_already_cancelled_does_not_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = TokioProcessRunner::new()
            .run("touch", &args(&["spawned.txt"]), dir.path(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert!(!dir.path().join("spawned.txt").exists());
    }

    #[test]
    fn test_command_line() {
        assert_eq!(command_line("cargo", &args(&["fmt", "--all"])), "cargo fmt --all");
        assert_eq!(command_line("ls", &[]), "ls");
    }
}
