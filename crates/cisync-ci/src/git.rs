//! Git-backed working tree: dirty detection, stash checkpoints, diffs.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use cisync_core::{CheckpointId, EngineError, Result, WorkspaceSnapshot};
use tokio::process::Command;
use tracing::{debug, info};

/// Untracked lock file left by `WorkspaceLock` when `.git` is not a
/// directory (worktrees, submodules).
pub(crate) const LOCK_FILE: &str = ".cisync.lock";

/// Thin async wrapper over the `git` binary, rooted at one directory.
#[derive(Debug, Clone)]
pub struct Git {
    root: PathBuf,
}

impl Git {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run git and return its raw output, whatever the exit status.
    pub async fn output(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EngineError::Workspace(format!("failed to run git: {e}")))
    }

    /// Run git and return trimmed stdout; a non-zero exit is an error.
    pub async fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.output(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Workspace(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}

/// Capture the HEAD commit SHA of the repository at `repo_dir`.
pub async fn capture_head_sha(repo_dir: &Path) -> Result<String> {
    let sha = Git::new(repo_dir).run(&["rev-parse", "HEAD"]).await?;
    if sha.is_empty() {
        return Err(EngineError::Workspace(
            "git rev-parse HEAD returned empty output".to_string(),
        ));
    }
    Ok(sha)
}

/// Check whether a directory is inside a git work tree.
pub async fn is_git_repo(dir: &Path) -> bool {
    Git::new(dir)
        .output(&["rev-parse", "--is-inside-work-tree"])
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// The working tree of a git repository.
///
/// Checkpoints are stash commits: `checkpoint` stashes everything
/// (including untracked files) and immediately re-applies it, leaving the
/// tree as it was and the stash as a recoverable record. `restore` hard
/// resets to HEAD, removes untracked files, and re-applies the stash.
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    git: Git,
}

impl GitWorkspace {
    /// Open the work tree containing `dir`, rooted at its top level.
    pub async fn open(dir: &Path) -> Result<Self> {
        if !is_git_repo(dir).await {
            return Err(EngineError::Workspace(format!(
                "{} is not inside a git work tree",
                dir.display()
            )));
        }
        let top = Git::new(dir).run(&["rev-parse", "--show-toplevel"]).await?;
        Ok(Self {
            git: Git::new(PathBuf::from(top)),
        })
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    async fn status(&self) -> Result<Vec<String>> {
        let out = self
            .git
            .run(&["status", "--porcelain", "--untracked-files=all"])
            .await?;
        Ok(out
            .lines()
            .filter(|l| l.get(3..) != Some(LOCK_FILE))
            .map(str::to_string)
            .collect())
    }

    async fn untracked(&self) -> Result<Vec<String>> {
        let out = self
            .git
            .run(&["ls-files", "--others", "--exclude-standard"])
            .await?;
        Ok(out
            .lines()
            .filter(|l| !l.is_empty() && *l != LOCK_FILE)
            .map(str::to_string)
            .collect())
    }

    async fn untracked_section(&self, path: &str) -> Result<String> {
        let bytes = tokio::fs::read(self.git.root().join(path)).await?;
        let content = String::from_utf8_lossy(&bytes);
        let mut section = format!("diff --git a/{path} b/{path}\nnew file\n--- /dev/null\n+++ b/{path}\n");
        for line in content.lines() {
            section.push('+');
            section.push_str(line);
            section.push('\n');
        }
        Ok(section)
    }
}

#[async_trait]
impl WorkspaceSnapshot for GitWorkspace {
    fn root(&self) -> &Path {
        self.git.root()
    }

    async fn is_dirty(&self) -> Result<bool> {
        Ok(!self.status().await?.is_empty())
    }

    async fn checkpoint(&self, label: &str) -> Result<CheckpointId> {
        if !self.is_dirty().await? {
            return Ok(CheckpointId::pristine());
        }
        self.git
            .run(&["stash", "push", "--include-untracked", "-m", label, "--", ".", &format!(":!{LOCK_FILE}")])
            .await?;
        let sha = self.git.run(&["rev-parse", "stash@{0}"]).await?;
        self.git.run(&["stash", "apply", "--index", &sha]).await?;
        info!(label = %label, stash = %sha, "workspace checkpoint recorded");
        Ok(CheckpointId::new(label, sha))
    }

    async fn restore(&self, id: &CheckpointId) -> Result<()> {
        self.git.run(&["reset", "--hard", "HEAD"]).await?;
        self.git.run(&["clean", "-fd", "-e", LOCK_FILE]).await?;
        if !id.is_pristine() {
            self.git
                .run(&["stash", "apply", "--index", &id.reference])
                .await?;
        }
        info!(checkpoint = %id, "workspace restored");
        Ok(())
    }

    async fn diff(&self) -> Result<String> {
        let mut out = self.git.run(&["diff", "--no-color", "HEAD"]).await?;
        if !out.is_empty() {
            out.push('\n');
        }
        for path in self.untracked().await? {
            out.push_str(&self.untracked_section(&path).await?);
        }
        debug!(bytes = out.len(), "workspace diff captured");
        Ok(out)
    }
}
