//! cisync CI - concrete collaborators for the cisync engine
//!
//! Provides:
//! - A tokio subprocess `ProcessRunner`
//! - A git-backed `WorkspaceSnapshot` (stash checkpoints)
//! - A `gh`-CLI-backed `CheckStatusSource`
//! - A git commit/push `RevisionPublisher`

pub mod gh;
pub mod git;
pub mod publish;
pub mod runner;

// Re-export key types
pub use gh::{fetch_error_from_stderr, parse_check_runs, GhCheckSource};
pub use git::{capture_head_sha, is_git_repo, Git, GitWorkspace};
pub use publish::{commit_message, fixed_paths, GitPublisher};
pub use runner::TokioProcessRunner;
