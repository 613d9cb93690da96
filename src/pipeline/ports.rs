//! Capability seams between the pipeline and its collaborators.
//!
//! The pipeline owns task-scoped resources (worktree, agent process) and
//! reaches the long-lived singletons only through these traits, which keeps
//! the dependency graph acyclic and the state machine testable with mocks.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::agent::{AgentAdapter, AgentError, AgentEvent, AgentOutcome, AgentRequest};
use crate::config::{ConfigLoader, Settings};
use crate::git::{CleanupOptions, CommitOutcome, WorkspaceError, WorkspaceManager, Worktree};
use crate::github::{
    BranchView, CreatedPr, GitHubClient, GitHubError, InstallationToken, IssueView,
    PullRequestView,
};
use crate::queue::TaskQueue;
use crate::store::{
    ExecutionDetailKind, ExecutionRecord, LiveDetails, StoreError, TaskRecord, TaskState,
    TaskStateStore,
};

#[async_trait]
pub trait GithubPort: Send + Sync {
    async fn get_issue(&self, owner: &str, repo: &str, number: u64)
        -> Result<IssueView, GitHubError>;
    async fn get_pr(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequestView, GitHubError>;
    async fn add_label(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), GitHubError>;
    async fn remove_label(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), GitHubError>;
    async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<u64, GitHubError>;
    async fn create_pr(
        &self,
        owner: &str,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedPr, GitHubError>;
    async fn list_prs_with_head(
        &self,
        owner: &str,
        repo: &str,
        head: &str,
    ) -> Result<Vec<PullRequestView>, GitHubError>;
    async fn get_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<BranchView, GitHubError>;
    async fn installation_token(&self) -> Result<InstallationToken, GitHubError>;
}

#[async_trait]
impl GithubPort for GitHubClient {
    async fn get_issue(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<IssueView, GitHubError> {
        GitHubClient::get_issue(self, owner, repo, number).await
    }

    async fn get_pr(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequestView, GitHubError> {
        GitHubClient::get_pr(self, owner, repo, number).await
    }

    async fn add_label(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), GitHubError> {
        GitHubClient::add_label(self, owner, repo, number, label).await
    }

    async fn remove_label(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), GitHubError> {
        GitHubClient::remove_label(self, owner, repo, number, label).await
    }

    async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<u64, GitHubError> {
        GitHubClient::create_comment(self, owner, repo, number, body).await
    }

    async fn create_pr(
        &self,
        owner: &str,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedPr, GitHubError> {
        GitHubClient::create_pr(self, owner, repo, head, base, title, body).await
    }

    async fn list_prs_with_head(
        &self,
        owner: &str,
        repo: &str,
        head: &str,
    ) -> Result<Vec<PullRequestView>, GitHubError> {
        GitHubClient::list_prs_with_head(self, owner, repo, head).await
    }

    async fn get_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<BranchView, GitHubError> {
        GitHubClient::get_branch(self, owner, repo, branch).await
    }

    async fn installation_token(&self) -> Result<InstallationToken, GitHubError> {
        GitHubClient::installation_token(self).await
    }
}

#[async_trait]
pub trait WorkspacePort: Send + Sync {
    /// Clone/fetch, detect the base branch, and add a fresh-branch worktree.
    /// Holds the per-repo lock for the whole sequence.
    async fn prepare_issue_worktree(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        title: &str,
        model: Option<String>,
    ) -> Result<Worktree, WorkspaceError>;

    /// Worktree checked out on an existing PR head branch.
    async fn prepare_branch_worktree(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        branch: &str,
        base: &str,
    ) -> Result<Worktree, WorkspaceError>;

    async fn commit_all(
        &self,
        worktree: &Worktree,
        message: &str,
    ) -> Result<CommitOutcome, WorkspaceError>;
    async fn push_branch(&self, worktree: &Worktree) -> Result<(), WorkspaceError>;
    /// Patch text of the worktree's latest commit.
    async fn diff_latest(&self, worktree: &Worktree) -> Result<String, WorkspaceError>;
    async fn cleanup(
        &self,
        worktree: &Worktree,
        options: &CleanupOptions,
    ) -> Result<(), WorkspaceError>;
}

#[async_trait]
impl WorkspacePort for WorkspaceManager {
    async fn prepare_issue_worktree(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        title: &str,
        model: Option<String>,
    ) -> Result<Worktree, WorkspaceError> {
        let guard = self.lock_repo(owner, repo).await?;
        self.ensure_cloned(owner, repo).await?;
        let base = self.detect_default_branch(owner, repo).await?;
        let worktree = self
            .create_worktree(owner, repo, issue_number, title, &base, model.as_deref())
            .await?;
        drop(guard);
        Ok(worktree)
    }

    async fn prepare_branch_worktree(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        branch: &str,
        base: &str,
    ) -> Result<Worktree, WorkspaceError> {
        let guard = self.lock_repo(owner, repo).await?;
        self.ensure_cloned(owner, repo).await?;
        let worktree = self
            .create_worktree_from_branch(owner, repo, number, branch, base)
            .await?;
        drop(guard);
        Ok(worktree)
    }

    async fn commit_all(
        &self,
        worktree: &Worktree,
        message: &str,
    ) -> Result<CommitOutcome, WorkspaceError> {
        let path = worktree.worktree_path.clone();
        let message = message.to_string();
        tokio::task::spawn_blocking(move || crate::git::operations::commit_all(&path, &message))
            .await
            .map_err(|e| WorkspaceError::Io(std::io::Error::other(e)))?
    }

    async fn push_branch(&self, worktree: &Worktree) -> Result<(), WorkspaceError> {
        WorkspaceManager::push_branch(self, &worktree.worktree_path, &worktree.branch_name).await
    }

    async fn diff_latest(&self, worktree: &Worktree) -> Result<String, WorkspaceError> {
        WorkspaceManager::diff_latest(self, &worktree.worktree_path).await
    }

    async fn cleanup(
        &self,
        worktree: &Worktree,
        options: &CleanupOptions,
    ) -> Result<(), WorkspaceError> {
        WorkspaceManager::cleanup(self, worktree, options).await
    }
}

#[async_trait]
pub trait AgentPort: Send + Sync {
    async fn run(
        &self,
        request: &AgentRequest,
        events: Option<mpsc::UnboundedSender<AgentEvent>>,
    ) -> Result<AgentOutcome, AgentError>;
}

#[async_trait]
impl AgentPort for AgentAdapter {
    async fn run(
        &self,
        request: &AgentRequest,
        events: Option<mpsc::UnboundedSender<AgentEvent>>,
    ) -> Result<AgentOutcome, AgentError> {
        AgentAdapter::run(self, request, events).await
    }
}

#[allow(clippy::too_many_arguments)]
#[async_trait]
pub trait StatePort: Send + Sync {
    async fn create_task(&self, record: &TaskRecord) -> Result<bool, StoreError>;
    async fn append_event(
        &self,
        task_id: &str,
        state: TaskState,
        reason: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<u64, StoreError>;
    async fn record_execution_start(&self, record: &ExecutionRecord) -> Result<(), StoreError>;
    async fn record_execution_end(&self, record: &ExecutionRecord) -> Result<(), StoreError>;
    async fn append_execution_detail(
        &self,
        task_id: &str,
        execution_id: &Uuid,
        kind: ExecutionDetailKind,
        content: Option<String>,
        tool_name: Option<String>,
        tool_input: Option<serde_json::Value>,
        result: Option<String>,
        is_error: bool,
    ) -> Result<u64, StoreError>;
    async fn set_live_details(
        &self,
        task_id: &str,
        details: &LiveDetails,
    ) -> Result<(), StoreError>;
    async fn save_output(&self, task_id: &str, output: &str) -> Result<(), StoreError>;
    async fn save_diff(&self, task_id: &str, diff: &str) -> Result<(), StoreError>;
    async fn append_log(&self, task_id: &str, line: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl StatePort for TaskStateStore {
    async fn create_task(&self, record: &TaskRecord) -> Result<bool, StoreError> {
        TaskStateStore::create_task(self, record).await
    }

    async fn append_event(
        &self,
        task_id: &str,
        state: TaskState,
        reason: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<u64, StoreError> {
        TaskStateStore::append_event(self, task_id, state, reason, metadata).await
    }

    async fn record_execution_start(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        TaskStateStore::record_execution_start(self, record).await
    }

    async fn record_execution_end(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        TaskStateStore::record_execution_end(self, record).await
    }

    async fn append_execution_detail(
        &self,
        task_id: &str,
        execution_id: &Uuid,
        kind: ExecutionDetailKind,
        content: Option<String>,
        tool_name: Option<String>,
        tool_input: Option<serde_json::Value>,
        result: Option<String>,
        is_error: bool,
    ) -> Result<u64, StoreError> {
        TaskStateStore::append_execution_detail(
            self, task_id, execution_id, kind, content, tool_name, tool_input, result, is_error,
        )
        .await
    }

    async fn set_live_details(
        &self,
        task_id: &str,
        details: &LiveDetails,
    ) -> Result<(), StoreError> {
        TaskStateStore::set_live_details(self, task_id, details).await
    }

    async fn save_output(&self, task_id: &str, output: &str) -> Result<(), StoreError> {
        TaskStateStore::save_output(self, task_id, output).await
    }

    async fn save_diff(&self, task_id: &str, diff: &str) -> Result<(), StoreError> {
        TaskStateStore::save_diff(self, task_id, diff).await
    }

    async fn append_log(&self, task_id: &str, line: &str) -> Result<(), StoreError> {
        TaskStateStore::append_log(self, task_id, line).await
    }
}

/// Milestone progress reporting back to the job queue. Best-effort.
#[async_trait]
pub trait ProgressPort: Send + Sync {
    async fn update_progress(&self, job_id: &str, progress: u8);
}

#[async_trait]
impl ProgressPort for TaskQueue {
    async fn update_progress(&self, job_id: &str, progress: u8) {
        if let Err(e) = TaskQueue::update_progress(self, job_id, progress).await {
            tracing::warn!(job_id, error = %e, "progress update dropped");
        }
    }
}

/// Current settings snapshot, copy-on-read.
pub trait SettingsSource: Send + Sync {
    fn current(&self) -> Settings;
}

impl SettingsSource for ConfigLoader {
    fn current(&self) -> Settings {
        self.load_all().settings.clone()
    }
}
