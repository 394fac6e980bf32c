//! Commit (and optionally push) applied fixes as a new revision.

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use cisync_core::{FixAttempt, Result, RevisionPublisher};
use tracing::info;

use crate::git::{capture_head_sha, Git, LOCK_FILE};

/// Publishes by committing the fixed files; returns the new HEAD.
#[derive(Debug, Clone)]
pub struct GitPublisher {
    git: Git,
    push: Option<String>,
}

impl GitPublisher {
    pub fn new(root: &Path) -> Self {
        Self {
            git: Git::new(root),
            push: None,
        }
    }

    /// Push `HEAD` to `remote` after committing, so CI runs on it.
    pub fn with_push(mut self, remote: impl Into<String>) -> Self {
        self.push = Some(remote.into());
        self
    }
}

/// Commit message naming every kept fix.
pub fn commit_message(applied: &[FixAttempt]) -> String {
    let actions: Vec<&str> = applied
        .iter()
        .filter_map(|a| a.action.as_ref().map(|x| x.name.as_str()))
        .collect();
    let mut message = format!("cisync: apply {}\n\n", actions.join(", "));
    for attempt in applied {
        message.push_str(&format!(
            "- {}: {} -> {} errors",
            attempt.check_name, attempt.errors_before, attempt.errors_after
        ));
        if !attempt.changed_files.is_empty() {
            message.push_str(&format!(" ({})", attempt.changed_files.join(", ")));
        }
        message.push('\n');
    }
    message
}

/// Union of the files the kept fixes changed, in first-seen order.
pub fn fixed_paths(applied: &[FixAttempt]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    applied
        .iter()
        .flat_map(|a| a.changed_files.iter())
        .filter(|path| path.as_str() != LOCK_FILE && seen.insert(path.as_str()))
        .cloned()
        .collect()
}

#[async_trait]
impl RevisionPublisher for GitPublisher {
    /// Stages and commits only the files the fixes touched; other
    /// uncommitted work stays out of the commit. Fixes that changed
    /// nothing publish nothing and leave `revision` as is.
    async fn publish(&self, revision: &str, applied: &[FixAttempt]) -> Result<String> {
        let paths = fixed_paths(applied);
        if paths.is_empty() {
            info!(revision = %revision, "fixes changed no files; nothing to publish");
            return Ok(revision.to_string());
        }

        let mut add = vec!["add", "--all", "--"];
        add.extend(paths.iter().map(String::as_str));
        self.git.run(&add).await?;

        let mut staged = vec!["diff", "--cached", "--quiet", "--"];
        staged.extend(paths.iter().map(String::as_str));
        if self.git.output(&staged).await?.status.success() {
            info!(revision = %revision, files = paths.len(), "fixed files match HEAD; nothing to publish");
            return Ok(revision.to_string());
        }

        let message = commit_message(applied);
        let mut commit = vec!["commit", "--no-verify", "--only", "-m", message.as_str(), "--"];
        commit.extend(paths.iter().map(String::as_str));
        self.git.run(&commit).await?;

        if let Some(remote) = &self.push {
            self.git.run(&["push", remote, "HEAD"]).await?;
        }
        let head = capture_head_sha(self.git.root()).await?;
        info!(from = %revision, to = %head, files = paths.len(), pushed = self.push.is_some(), "published fixes");
        Ok(head)
    }
}
