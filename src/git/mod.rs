pub mod branch_name;
pub mod operations;
pub mod repo_manager;
pub mod worktree;

pub use operations::CommitOutcome;
pub use repo_manager::WorkspaceManager;
pub use worktree::{CleanupOptions, Worktree};

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

/// Network-facing git operations get two minutes before they are killed.
pub(crate) const GIT_NETWORK_TIMEOUT: Duration = Duration::from_secs(120);

/// Commit author identity for everything the pipeline lands.
pub const BOT_NAME: &str = "gitfix-bot";
pub const BOT_EMAIL: &str = "bot@gitfix.dev";

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("git {command} failed: {stderr}")]
    Command { command: String, stderr: String },
    #[error("git {command} timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },
    #[error("default branch undetectable")]
    DefaultBranchUndetectable,
    #[error(transparent)]
    Git2(#[from] git2::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("github: {0}")]
    GitHub(#[from] crate::github::GitHubError),
}

impl WorkspaceError {
    /// Network-level failures worth a bounded retry (push, fetch).
    pub fn is_transient(&self) -> bool {
        match self {
            WorkspaceError::Timeout { .. } => true,
            WorkspaceError::Command { stderr, .. } => {
                let s = stderr.to_lowercase();
                s.contains("could not resolve host")
                    || s.contains("connection reset")
                    || s.contains("connection timed out")
                    || s.contains("early eof")
                    || s.contains("the remote end hung up")
            }
            _ => false,
        }
    }
}

/// Run a git subcommand, capturing stdout. Stderr is surfaced in the error.
pub(crate) async fn run_git(
    cwd: &Path,
    args: &[&str],
    timeout: Duration,
) -> Result<String, WorkspaceError> {
    let mut command = tokio::process::Command::new("git");
    command
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let described = format!("git {}", args.join(" "));
    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| WorkspaceError::Timeout {
            command: described.clone(),
            seconds: timeout.as_secs(),
        })??;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(WorkspaceError::Command {
            command: described,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Like [`run_git`], but success/failure only.
pub(crate) async fn git_succeeds(cwd: &Path, args: &[&str], timeout: Duration) -> bool {
    run_git(cwd, args, timeout).await.is_ok()
}
