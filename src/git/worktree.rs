use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RetentionStrategy;

use super::repo_manager::WorkspaceManager;
use super::{branch_name, git_succeeds, run_git, WorkspaceError, GIT_NETWORK_TIMEOUT};

const RETENTION_FILE: &str = ".retention-info.json";

/// An isolated checkout for one task, on its own branch.
#[derive(Debug, Clone)]
pub struct Worktree {
    pub local_repo_path: PathBuf,
    pub worktree_path: PathBuf,
    pub branch_name: String,
    pub base_branch: String,
}

/// How to dispose of a worktree at terminal state.
#[derive(Debug, Clone)]
pub struct CleanupOptions {
    pub delete_branch: bool,
    pub success: bool,
    pub strategy: RetentionStrategy,
    pub retention_hours: u64,
}

/// Marker dropped into a retained worktree so the expiry sweep can finish the
/// job later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionInfo {
    pub local_repo_path: PathBuf,
    pub branch_name: String,
    pub delete_branch: bool,
    pub retained_at: DateTime<Utc>,
    /// `None` means "keep until the age-based sweep".
    pub scheduled_cleanup: Option<DateTime<Utc>>,
    pub reason: String,
}

impl WorkspaceManager {
    fn worktree_path(&self, owner: &str, repo: &str, issue_number: u64) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        self.env
            .worktrees_base
            .join(owner)
            .join(repo)
            .join(format!("issue-{issue_number}-{stamp}"))
    }

    /// Create a worktree on a fresh `ai-fix/…` branch off `origin/<base>`.
    /// Caller must hold the repo lock.
    pub async fn create_worktree(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        title: &str,
        base_branch: &str,
        model: Option<&str>,
    ) -> Result<Worktree, WorkspaceError> {
        let local = self.clone_path(owner, repo);

        let mut branch = branch_name::generate(issue_number, title, Utc::now(), model);
        // A stale remote branch with the same name would make the eventual
        // push ambiguous; re-roll the suffix until the name is free.
        for _ in 0..5 {
            if !self.remote_branch_exists(&local, &branch).await {
                break;
            }
            branch = branch_name::regenerate_suffix(&branch);
        }

        self.prepare_branch_slot(&local, &branch).await?;

        let worktree_path = self.worktree_path(owner, repo, issue_number);
        if let Some(parent) = worktree_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let base = format!("origin/{base_branch}");
        let path_str = worktree_path.to_string_lossy().to_string();
        run_git(
            &local,
            &["worktree", "add", "-b", &branch, &path_str, &base],
            GIT_NETWORK_TIMEOUT,
        )
        .await?;

        info!(
            branch,
            path = %worktree_path.display(),
            base = base_branch,
            "worktree created"
        );

        Ok(Worktree {
            local_repo_path: local,
            worktree_path,
            branch_name: branch,
            base_branch: base_branch.to_string(),
        })
    }

    /// Worktree for follow-up work on an existing PR head branch.
    /// Caller must hold the repo lock.
    pub async fn create_worktree_from_branch(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        branch: &str,
        base_branch: &str,
    ) -> Result<Worktree, WorkspaceError> {
        let local = self.clone_path(owner, repo);
        self.prepare_branch_slot(&local, branch).await?;

        let worktree_path = self.worktree_path(owner, repo, issue_number);
        if let Some(parent) = worktree_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let origin_branch = format!("origin/{branch}");
        let path_str = worktree_path.to_string_lossy().to_string();
        run_git(
            &local,
            &["worktree", "add", "-b", branch, &path_str, &origin_branch],
            GIT_NETWORK_TIMEOUT,
        )
        .await?;

        Ok(Worktree {
            local_repo_path: local,
            worktree_path,
            branch_name: branch.to_string(),
            base_branch: base_branch.to_string(),
        })
    }

    /// Patch text of the worktree's latest commit. Uses `show` rather than
    /// `diff HEAD~1`: shallow clones may lack the parent commit.
    pub async fn diff_latest(&self, worktree_path: &Path) -> Result<String, WorkspaceError> {
        run_git(
            worktree_path,
            &["show", "--format=", "--patch", "HEAD"],
            GIT_NETWORK_TIMEOUT,
        )
        .await
    }

    async fn remote_branch_exists(&self, local: &Path, branch: &str) -> bool {
        match run_git(
            local,
            &["ls-remote", "--heads", "origin", branch],
            GIT_NETWORK_TIMEOUT,
        )
        .await
        {
            Ok(output) => !output.trim().is_empty(),
            Err(e) => {
                warn!(branch, error = %e, "remote branch probe failed, assuming free");
                false
            }
        }
    }

    /// Make `branch` creatable: prune stale worktrees, force-remove any
    /// worktree still pinning it, and delete the local branch.
    async fn prepare_branch_slot(&self, local: &Path, branch: &str) -> Result<(), WorkspaceError> {
        run_git(local, &["worktree", "prune"], GIT_NETWORK_TIMEOUT).await?;

        let branch_exists =
            git_succeeds(local, &["rev-parse", "--verify", branch], GIT_NETWORK_TIMEOUT).await;
        if !branch_exists {
            return Ok(());
        }

        if let Ok(listing) = run_git(local, &["worktree", "list", "--porcelain"], GIT_NETWORK_TIMEOUT).await {
            let mut current_path: Option<String> = None;
            for line in listing.lines() {
                if let Some(path) = line.strip_prefix("worktree ") {
                    current_path = Some(path.to_string());
                } else if let Some(branch_ref) = line.strip_prefix("branch ") {
                    let is_ours = branch_ref == format!("refs/heads/{branch}");
                    if let (true, Some(path)) = (is_ours, current_path.as_deref()) {
                        let _ = run_git(
                            local,
                            &["worktree", "remove", "--force", path],
                            GIT_NETWORK_TIMEOUT,
                        )
                        .await;
                    }
                }
            }
        }

        let _ = run_git(local, &["branch", "-D", branch], GIT_NETWORK_TIMEOUT).await;
        Ok(())
    }

    /// Dispose of a worktree at terminal state.
    ///
    /// Successful tasks always drop the worktree (the branch is the PR's
    /// head and is preserved). Failed tasks follow the retention strategy;
    /// retained directories get a `.retention-info.json` marker for the sweep.
    pub async fn cleanup(
        &self,
        worktree: &Worktree,
        options: &CleanupOptions,
    ) -> Result<(), WorkspaceError> {
        let retain = match options.strategy {
            RetentionStrategy::AlwaysDelete => false,
            RetentionStrategy::KeepOnFailure => !options.success,
            RetentionStrategy::KeepForHours => !options.success,
        };

        if retain {
            let scheduled = match options.strategy {
                RetentionStrategy::KeepForHours => Some(
                    Utc::now() + chrono::Duration::hours(options.retention_hours as i64),
                ),
                _ => None,
            };
            let info = RetentionInfo {
                local_repo_path: worktree.local_repo_path.clone(),
                branch_name: worktree.branch_name.clone(),
                delete_branch: options.delete_branch,
                retained_at: Utc::now(),
                scheduled_cleanup: scheduled,
                reason: if options.success {
                    "retained".to_string()
                } else {
                    "task failed".to_string()
                },
            };
            let payload = serde_json::to_vec_pretty(&info)
                .map_err(|e| WorkspaceError::Io(std::io::Error::other(e)))?;
            tokio::fs::write(worktree.worktree_path.join(RETENTION_FILE), payload).await?;
            info!(
                path = %worktree.worktree_path.display(),
                scheduled = ?info.scheduled_cleanup,
                "worktree retained"
            );
            return Ok(());
        }

        self.remove_worktree(
            &worktree.local_repo_path,
            &worktree.worktree_path,
            &worktree.branch_name,
            options.delete_branch,
        )
        .await
    }

    async fn remove_worktree(
        &self,
        local: &Path,
        worktree_path: &Path,
        branch: &str,
        delete_branch: bool,
    ) -> Result<(), WorkspaceError> {
        let path_str = worktree_path.to_string_lossy().to_string();
        if run_git(
            local,
            &["worktree", "remove", "--force", &path_str],
            GIT_NETWORK_TIMEOUT,
        )
        .await
        .is_err()
            && worktree_path.exists()
        {
            // The worktree may be unregistered already; fall back to rm.
            tokio::fs::remove_dir_all(worktree_path).await?;
        }

        if delete_branch {
            let _ = run_git(local, &["branch", "-D", branch], GIT_NETWORK_TIMEOUT).await;
        }
        run_git(local, &["worktree", "prune"], GIT_NETWORK_TIMEOUT).await?;
        info!(path = %worktree_path.display(), branch, delete_branch, "worktree removed");
        Ok(())
    }

    /// Sweep the worktrees base: remove retained directories whose schedule
    /// elapsed and anything older than `WORKTREE_MAX_AGE_HOURS`.
    pub async fn cleanup_expired(&self) -> Result<usize, WorkspaceError> {
        let base = self.env.worktrees_base.clone();
        if !base.exists() {
            return Ok(0);
        }

        let mut removed = 0usize;
        let now = Utc::now();
        let max_age = chrono::Duration::hours(self.env.worktree_max_age_hours as i64);

        for dir in collect_worktree_dirs(&base).await? {
            let marker = dir.join(RETENTION_FILE);
            if marker.exists() {
                let info: Option<RetentionInfo> = tokio::fs::read(&marker)
                    .await
                    .ok()
                    .and_then(|bytes| serde_json::from_slice(&bytes).ok());
                match info {
                    Some(info) => {
                        let due = info.scheduled_cleanup.map(|t| t <= now).unwrap_or(false);
                        let aged = now - info.retained_at >= max_age;
                        if due || aged {
                            if self
                                .remove_worktree(
                                    &info.local_repo_path,
                                    &dir,
                                    &info.branch_name,
                                    info.delete_branch,
                                )
                                .await
                                .is_ok()
                            {
                                removed += 1;
                            }
                        }
                    }
                    None => {
                        warn!(path = %dir.display(), "unreadable retention marker, removing directory");
                        if tokio::fs::remove_dir_all(&dir).await.is_ok() {
                            removed += 1;
                        }
                    }
                }
                continue;
            }

            // Unmarked leftovers (crash before cleanup ran): age-based only.
            if let Ok(meta) = tokio::fs::metadata(&dir).await {
                if let Ok(modified) = meta.modified() {
                    let modified: DateTime<Utc> = modified.into();
                    if now - modified >= max_age {
                        if tokio::fs::remove_dir_all(&dir).await.is_ok() {
                            removed += 1;
                        }
                    }
                }
            }
        }

        if removed > 0 {
            info!(removed, "expired worktrees swept");
        }
        Ok(removed)
    }
}

/// Worktree directories live at `<base>/<owner>/<repo>/<dir>`.
async fn collect_worktree_dirs(base: &Path) -> Result<Vec<PathBuf>, WorkspaceError> {
    let mut dirs = Vec::new();
    let mut owners = tokio::fs::read_dir(base).await?;
    while let Some(owner) = owners.next_entry().await? {
        if !owner.file_type().await?.is_dir() {
            continue;
        }
        let mut repos = tokio::fs::read_dir(owner.path()).await?;
        while let Some(repo) = repos.next_entry().await? {
            if !repo.file_type().await?.is_dir() {
                continue;
            }
            let mut worktrees = tokio::fs::read_dir(repo.path()).await?;
            while let Some(wt) = worktrees.next_entry().await? {
                if wt.file_type().await?.is_dir() {
                    dirs.push(wt.path());
                }
            }
        }
    }
    Ok(dirs)
}
