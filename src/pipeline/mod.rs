pub mod ports;
pub mod prompts;

pub use ports::{AgentPort, GithubPort, ProgressPort, SettingsSource, StatePort, WorkspacePort};

use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::agent::{AgentError, AgentEvent, AgentOutcome, AgentRequest};
use crate::config::{EnvConfig, RetentionStrategy, Settings};
use crate::git::{operations, CleanupOptions, CommitOutcome, WorkspaceError, Worktree};
use crate::github::{IssueRef, IssueView};
use crate::queue::{Job, JobHandler, JobPayload};
use crate::store::{
    ExecutionDetailKind, ExecutionRecord, LiveDetails, TaskRecord, TaskState, TaskType, TodoStatus,
};
use crate::telemetry;

/// Worktree disposal knobs, copied from the environment at startup.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub retention_strategy: RetentionStrategy,
    pub retention_hours: u64,
}

impl PipelineOptions {
    pub fn from_env(env: &EnvConfig) -> Self {
        Self {
            retention_strategy: env.retention_strategy,
            retention_hours: env.retention_hours,
        }
    }
}

/// Outcome of probing for the PR after commit+push.
enum PrProbe {
    Found { number: u64, url: String },
    /// Push landed (branch exists on the remote) but no PR references it.
    PrMissing,
    /// The branch never made it to the remote.
    BranchMissing,
}

/// The per-task state machine:
/// `QUEUED → PROCESSING → CLAUDE_EXECUTION → POST_PROCESSING → terminal`.
///
/// Collaborators are injected as capability traits; the pipeline owns only
/// task-scoped resources (the worktree and the agent process) and always
/// releases them on the way out.
pub struct TaskPipeline {
    github: Arc<dyn GithubPort>,
    workspace: Arc<dyn WorkspacePort>,
    store: Arc<dyn StatePort>,
    agent: Arc<dyn AgentPort>,
    progress: Arc<dyn ProgressPort>,
    settings: Arc<dyn SettingsSource>,
    options: PipelineOptions,
}

#[async_trait]
impl JobHandler for TaskPipeline {
    async fn handle(&self, job: Job) -> anyhow::Result<()> {
        let issue_ref = job.payload.issue_ref().clone();
        let task_id = job.payload.task_id();
        let span = telemetry::task_span(&task_id, &issue_ref.repository(), &issue_ref.correlation_id);
        async {
            match &job.payload {
                JobPayload::Issue { .. } => self.run_issue_job(&job).await,
                JobPayload::PrCommentsBatch { .. } => self.run_followup_job(&job).await,
            }
        }
        .instrument(span)
        .await
    }
}

impl TaskPipeline {
    pub fn new(
        github: Arc<dyn GithubPort>,
        workspace: Arc<dyn WorkspacePort>,
        store: Arc<dyn StatePort>,
        agent: Arc<dyn AgentPort>,
        progress: Arc<dyn ProgressPort>,
        settings: Arc<dyn SettingsSource>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            github,
            workspace,
            store,
            agent,
            progress,
            settings,
            options,
        }
    }

    // ---- issue-fix jobs -------------------------------------------------

    async fn run_issue_job(&self, job: &Job) -> anyhow::Result<()> {
        let JobPayload::Issue {
            issue_ref,
            primary_label,
            model,
        } = &job.payload
        else {
            bail!("issue handler received a non-issue payload");
        };
        let settings = self.settings.current();
        let task_id = job.payload.task_id();
        let (owner, repo) = (issue_ref.repo_owner.as_str(), issue_ref.repo_name.as_str());
        let number = issue_ref.number;

        self.ensure_task_record(job).await;
        self.store
            .append_event(&task_id, TaskState::Processing, Some("job dequeued".into()), None)
            .await?;

        // Revalidation against the live issue. The poll that enqueued this
        // job may be minutes stale.
        let issue = match self.github.get_issue(owner, repo, number).await {
            Ok(issue) => issue,
            Err(e) => {
                return self
                    .infra_failure(job, &task_id, anyhow!(e).context("revalidating issue"))
                    .await
            }
        };
        if !issue.has_label(primary_label) {
            return self.skip(job, &task_id, "primary tag missing").await;
        }
        if issue.has_label(&settings.done_label(primary_label)) {
            return self.skip(job, &task_id, "already done").await;
        }

        let processing_label = settings.processing_label(primary_label);
        if let Err(e) = self
            .github
            .add_label(owner, repo, number, &processing_label)
            .await
        {
            return self
                .infra_failure(job, &task_id, anyhow!(e).context("adding processing label"))
                .await;
        }
        if let Err(e) = self
            .github
            .create_comment(
                owner,
                repo,
                number,
                &prompts::started_comment(&issue_ref.correlation_id),
            )
            .await
        {
            warn!(error = %e, "started comment dropped");
        }
        self.milestone(job, 25).await;

        let worktree = match self
            .workspace
            .prepare_issue_worktree(owner, repo, number, &issue.title, model.clone())
            .await
        {
            Ok(worktree) => worktree,
            Err(WorkspaceError::DefaultBranchUndetectable) => {
                // Deterministic: retrying cannot help.
                self.store
                    .append_event(
                        &task_id,
                        TaskState::Failed,
                        Some("default branch undetectable".into()),
                        None,
                    )
                    .await?;
                let _ = self
                    .github
                    .remove_label(owner, repo, number, &processing_label)
                    .await;
                return Ok(());
            }
            Err(e) => {
                return self
                    .infra_failure(job, &task_id, anyhow!(e).context("preparing worktree"))
                    .await
            }
        };
        self.store
            .append_event(
                &task_id,
                TaskState::Processing,
                Some("worktree created".into()),
                Some(json!({
                    "branch": worktree.branch_name,
                    "path": worktree.worktree_path,
                    "base": worktree.base_branch,
                })),
            )
            .await?;
        self.milestone(job, 50).await;

        let result = self
            .execute_issue(job, issue_ref, &issue, &settings, primary_label, &worktree)
            .await;

        let success = matches!(result, Ok(true));
        let cleanup = CleanupOptions {
            delete_branch: !success,
            success,
            strategy: self.options.retention_strategy,
            retention_hours: self.options.retention_hours,
        };
        if let Err(e) = self.workspace.cleanup(&worktree, &cleanup).await {
            warn!(error = %e, "worktree cleanup failed");
        }

        match result {
            Ok(_) => Ok(()),
            Err(e) => self.infra_failure(job, &task_id, e).await,
        }
    }

    /// Everything between worktree creation and the terminal event. Errors
    /// bubble out for queue-level retry; business failures terminate the task
    /// in here and return `Ok(false)`.
    async fn execute_issue(
        &self,
        job: &Job,
        issue_ref: &IssueRef,
        issue: &IssueView,
        settings: &Settings,
        primary_label: &str,
        worktree: &Worktree,
    ) -> anyhow::Result<bool> {
        let task_id = job.payload.task_id();
        let (owner, repo) = (issue_ref.repo_owner.as_str(), issue_ref.repo_name.as_str());
        let number = issue_ref.number;

        self.store
            .append_event(
                &task_id,
                TaskState::ClaudeExecution,
                Some("agent started".into()),
                None,
            )
            .await?;
        let token = self
            .github
            .installation_token()
            .await
            .context("obtaining installation token for agent")?;
        let request = AgentRequest {
            prompt: prompts::issue_prompt(issue_ref, issue, worktree),
            worktree_path: worktree.worktree_path.clone(),
            repo_owner: owner.to_string(),
            repo_name: repo.to_string(),
            issue_number: number,
            github_token: token.value,
        };

        let agent_run = self.run_agent(&task_id, &request).await;
        self.milestone(job, 75).await;
        self.store
            .append_event(&task_id, TaskState::PostProcessing, None, None)
            .await?;

        let outcome = match agent_run {
            Ok(outcome) if outcome.final_result.success => outcome,
            Ok(outcome) => {
                let error = outcome
                    .final_result
                    .error
                    .clone()
                    .unwrap_or_else(|| "agent reported failure".to_string());
                self.finish_agent_failure(issue_ref, settings, primary_label, &task_id, &error)
                    .await?;
                return Ok(false);
            }
            Err(e) => {
                self.finish_agent_failure(
                    issue_ref,
                    settings,
                    primary_label,
                    &task_id,
                    &e.to_string(),
                )
                .await?;
                return Ok(false);
            }
        };

        if outcome.modified_files.is_empty() {
            self.finish_no_changes(issue_ref, settings, primary_label, &task_id)
                .await?;
            self.milestone(job, 100).await;
            return Ok(true);
        }

        let message = outcome
            .final_result
            .suggested_commit_message
            .clone()
            .unwrap_or_else(|| operations::default_commit_message(number, &issue.title));
        match self
            .workspace
            .commit_all(worktree, &message)
            .await
            .context("committing agent changes")?
        {
            CommitOutcome::NoChanges => {
                self.finish_no_changes(issue_ref, settings, primary_label, &task_id)
                    .await?;
                self.milestone(job, 100).await;
                return Ok(true);
            }
            CommitOutcome::Committed { commit_id } => {
                info!(commit = %commit_id, branch = %worktree.branch_name, "changes committed");
            }
        }
        self.workspace
            .push_branch(worktree)
            .await
            .context("pushing branch")?;
        match self.workspace.diff_latest(worktree).await {
            Ok(diff) => {
                if let Err(e) = self.store.save_diff(&task_id, &diff).await {
                    warn!(error = %e, "diff not persisted");
                }
            }
            Err(e) => warn!(error = %e, "diff capture failed"),
        }
        self.milestone(job, 80).await;

        let title = prompts::pr_title(number, &issue.title);
        let body = prompts::pr_body(number, &outcome.final_result);
        let expected = match self
            .github
            .create_pr(
                owner,
                repo,
                &worktree.branch_name,
                &worktree.base_branch,
                &title,
                &body,
            )
            .await
        {
            Ok(pr) => {
                info!(pr = pr.number, "pull request created");
                Some(pr.number)
            }
            Err(e) => {
                warn!(error = %e, "create_pr failed, falling back to validation probes");
                None
            }
        };

        let mut probe = self.validate_pr(issue_ref, worktree, expected).await?;
        if matches!(probe, PrProbe::BranchMissing) {
            bail!("push did not land: branch missing on remote after push");
        }
        if matches!(probe, PrProbe::PrMissing) {
            // Emergency retry: the code is committed and pushed; ask the
            // agent to create the PR and nothing else.
            self.store
                .append_event(
                    &task_id,
                    TaskState::PostProcessing,
                    Some("pr validation failed, running emergency retry".into()),
                    Some(json!({"sub_event": "POST_PROCESSING_RETRY"})),
                )
                .await?;
            let retry_request = AgentRequest {
                prompt: prompts::emergency_pr_prompt(issue_ref, worktree),
                ..request
            };
            if let Err(e) = self.run_agent(&task_id, &retry_request).await {
                warn!(error = %e, "emergency retry agent run failed");
            }
            probe = self.validate_pr(issue_ref, worktree, expected).await?;
        }
        self.milestone(job, 95).await;

        match probe {
            PrProbe::Found { number: pr_number, url } => {
                self.swap_labels(
                    issue_ref,
                    &settings.processing_label(primary_label),
                    &settings.done_label(primary_label),
                )
                .await;
                if let Err(e) = self
                    .github
                    .create_comment(
                        owner,
                        repo,
                        number,
                        &prompts::completion_comment(&url, &outcome.final_result),
                    )
                    .await
                {
                    warn!(error = %e, "completion comment dropped");
                }
                self.store
                    .append_event(
                        &task_id,
                        TaskState::Completed,
                        None,
                        Some(json!({"pr": {"number": pr_number, "url": url}})),
                    )
                    .await?;
                self.milestone(job, 100).await;
                Ok(true)
            }
            _ => {
                let failure_label = settings.failed_post_processing_label(primary_label);
                self.swap_labels(
                    issue_ref,
                    &settings.processing_label(primary_label),
                    &failure_label,
                )
                .await;
                let error = "pull request missing after emergency retry";
                if let Err(e) = self
                    .github
                    .create_comment(
                        owner,
                        repo,
                        number,
                        &prompts::post_processing_failure_comment(error, &worktree.branch_name),
                    )
                    .await
                {
                    warn!(error = %e, "failure comment dropped");
                }
                self.store
                    .append_event(
                        &task_id,
                        TaskState::Failed,
                        Some(error.to_string()),
                        Some(json!({"stage": "post_processing"})),
                    )
                    .await?;
                Ok(false)
            }
        }
    }

    /// Probe for the PR in three fallback steps: expected number, open PRs by
    /// head, then the branch itself.
    async fn validate_pr(
        &self,
        issue_ref: &IssueRef,
        worktree: &Worktree,
        expected: Option<u64>,
    ) -> anyhow::Result<PrProbe> {
        let (owner, repo) = (issue_ref.repo_owner.as_str(), issue_ref.repo_name.as_str());
        let branch = worktree.branch_name.as_str();

        if let Some(number) = expected {
            match self.github.get_pr(owner, repo, number).await {
                Ok(pr) if pr.head_ref == branch => {
                    return Ok(PrProbe::Found {
                        number: pr.number,
                        url: pr.html_url,
                    })
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(anyhow!(e).context("probing expected PR number")),
            }
        }

        let head = format!("{owner}:{branch}");
        match self.github.list_prs_with_head(owner, repo, &head).await {
            Ok(prs) => {
                if let Some(pr) = prs.into_iter().next() {
                    return Ok(PrProbe::Found {
                        number: pr.number,
                        url: pr.html_url,
                    });
                }
            }
            Err(e) => return Err(anyhow!(e).context("listing PRs by head")),
        }

        match self.github.get_branch(owner, repo, branch).await {
            Ok(_) => Ok(PrProbe::PrMissing),
            Err(e) if e.is_not_found() => Ok(PrProbe::BranchMissing),
            Err(e) => Err(anyhow!(e).context("probing remote branch")),
        }
    }

    // ---- pr follow-up batch jobs ----------------------------------------

    async fn run_followup_job(&self, job: &Job) -> anyhow::Result<()> {
        let JobPayload::PrCommentsBatch {
            issue_ref,
            pr_branch,
            base_branch,
            comments,
            ..
        } = &job.payload
        else {
            bail!("follow-up handler received a non-batch payload");
        };
        let task_id = job.payload.task_id();
        let (owner, repo) = (issue_ref.repo_owner.as_str(), issue_ref.repo_name.as_str());
        let number = issue_ref.number;

        self.ensure_task_record(job).await;
        self.store
            .append_event(
                &task_id,
                TaskState::Processing,
                Some("follow-up batch dequeued".into()),
                Some(json!({"comments": comments.len()})),
            )
            .await?;

        let pr = match self.github.get_pr(owner, repo, number).await {
            Ok(pr) => pr,
            Err(e) if e.is_not_found() => {
                return self.skip(job, &task_id, "pull request no longer exists").await
            }
            Err(e) => {
                return self
                    .infra_failure(job, &task_id, anyhow!(e).context("fetching PR"))
                    .await
            }
        };
        if !pr.open {
            return self.skip(job, &task_id, "pull request closed").await;
        }
        let branch = if pr.head_ref.is_empty() {
            pr_branch.clone()
        } else {
            pr.head_ref.clone()
        };
        self.milestone(job, 25).await;

        let worktree = match self
            .workspace
            .prepare_branch_worktree(owner, repo, number, &branch, base_branch)
            .await
        {
            Ok(worktree) => worktree,
            Err(e) => {
                return self
                    .infra_failure(job, &task_id, anyhow!(e).context("preparing PR worktree"))
                    .await
            }
        };
        self.milestone(job, 50).await;

        let result = self
            .execute_followup(job, issue_ref, &pr.title, comments, &worktree)
            .await;

        // The branch is the PR's head; never delete it here.
        let cleanup = CleanupOptions {
            delete_branch: false,
            success: matches!(result, Ok(true)),
            strategy: self.options.retention_strategy,
            retention_hours: self.options.retention_hours,
        };
        if let Err(e) = self.workspace.cleanup(&worktree, &cleanup).await {
            warn!(error = %e, "worktree cleanup failed");
        }

        match result {
            Ok(_) => Ok(()),
            Err(e) => self.infra_failure(job, &task_id, e).await,
        }
    }

    async fn execute_followup(
        &self,
        job: &Job,
        issue_ref: &IssueRef,
        pr_title: &str,
        comments: &[crate::github::CommentView],
        worktree: &Worktree,
    ) -> anyhow::Result<bool> {
        let task_id = job.payload.task_id();
        let (owner, repo) = (issue_ref.repo_owner.as_str(), issue_ref.repo_name.as_str());
        let number = issue_ref.number;

        self.store
            .append_event(
                &task_id,
                TaskState::ClaudeExecution,
                Some("agent started".into()),
                None,
            )
            .await?;
        let token = self
            .github
            .installation_token()
            .await
            .context("obtaining installation token for agent")?;
        let request = AgentRequest {
            prompt: prompts::followup_prompt(issue_ref, pr_title, worktree, comments),
            worktree_path: worktree.worktree_path.clone(),
            repo_owner: owner.to_string(),
            repo_name: repo.to_string(),
            issue_number: number,
            github_token: token.value,
        };

        let agent_run = self.run_agent(&task_id, &request).await;
        self.milestone(job, 75).await;
        self.store
            .append_event(&task_id, TaskState::PostProcessing, None, None)
            .await?;

        let outcome = match agent_run {
            Ok(outcome) if outcome.final_result.success => outcome,
            Ok(outcome) => {
                let error = outcome
                    .final_result
                    .error
                    .clone()
                    .unwrap_or_else(|| "agent reported failure".to_string());
                self.finish_followup_failure(issue_ref, &task_id, &error).await?;
                return Ok(false);
            }
            Err(e) => {
                self.finish_followup_failure(issue_ref, &task_id, &e.to_string())
                    .await?;
                return Ok(false);
            }
        };

        let mut pushed = false;
        if !outcome.modified_files.is_empty() {
            let message = outcome
                .final_result
                .suggested_commit_message
                .clone()
                .unwrap_or_else(|| format!("chore: address follow-up feedback on #{number}"));
            if let CommitOutcome::Committed { .. } = self
                .workspace
                .commit_all(worktree, &message)
                .await
                .context("committing follow-up changes")?
            {
                self.workspace
                    .push_branch(worktree)
                    .await
                    .context("pushing follow-up changes")?;
                pushed = true;
                match self.workspace.diff_latest(worktree).await {
                    Ok(diff) => {
                        if let Err(e) = self.store.save_diff(&task_id, &diff).await {
                            warn!(error = %e, "diff not persisted");
                        }
                    }
                    Err(e) => warn!(error = %e, "diff capture failed"),
                }
            }
        }
        self.milestone(job, 80).await;

        if let Err(e) = self
            .github
            .create_comment(
                owner,
                repo,
                number,
                &prompts::followup_summary_comment(&outcome.final_result, pushed),
            )
            .await
        {
            warn!(error = %e, "follow-up summary comment dropped");
        }
        self.store
            .append_event(
                &task_id,
                TaskState::Completed,
                None,
                Some(json!({"pushed": pushed})),
            )
            .await?;
        self.milestone(job, 100).await;
        Ok(true)
    }

    // ---- agent execution bookkeeping ------------------------------------

    /// Run the agent while mirroring its event stream into the state store:
    /// execution details in order, todo/live snapshots as they change.
    async fn run_agent(
        &self,
        task_id: &str,
        request: &AgentRequest,
    ) -> Result<AgentOutcome, AgentError> {
        let execution_id = Uuid::new_v4();
        let mut record = ExecutionRecord {
            execution_id,
            task_id: task_id.to_string(),
            history_id: None,
            session_id: None,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            model: "default".to_string(),
            success: false,
            num_turns: None,
            cost_usd: None,
            error: None,
        };
        if let Err(e) = self.store.record_execution_start(&record).await {
            warn!(error = %e, "execution start record dropped");
        }

        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<AgentEvent>();
        let store = Arc::clone(&self.store);
        let forwarder_task_id = task_id.to_string();
        let forwarder = tokio::spawn(async move {
            let mut live = LiveDetails::default();
            while let Some(event) = events_rx.recv().await {
                forward_event(&*store, &forwarder_task_id, &execution_id, &event, &mut live).await;
            }
        });

        let outcome = self.agent.run(request, Some(events_tx)).await;
        let _ = forwarder.await;

        let end_time = Utc::now();
        record.end_time = Some(end_time);
        record.duration_ms = Some((end_time - record.start_time).num_milliseconds().max(0) as u64);
        match &outcome {
            Ok(outcome) => {
                record.success = outcome.final_result.success;
                record.session_id = outcome.final_result.session_id.clone();
                record.num_turns = outcome.final_result.num_turns;
                record.cost_usd = outcome.final_result.cost_usd;
                record.error = outcome.final_result.error.clone();
                if let Some(model) = &outcome.final_result.model {
                    record.model = model.clone();
                }
                if let Err(e) = self.store.save_output(task_id, &outcome.raw_output).await {
                    warn!(error = %e, "raw agent output not persisted");
                }
            }
            Err(e) => record.error = Some(e.to_string()),
        }
        if let Err(e) = self.store.record_execution_end(&record).await {
            warn!(error = %e, "execution end record dropped");
        }
        outcome
    }

    // ---- terminal helpers ------------------------------------------------

    async fn skip(&self, job: &Job, task_id: &str, reason: &str) -> anyhow::Result<()> {
        info!(task_id, reason, "task skipped");
        self.store
            .append_event(task_id, TaskState::Skipped, Some(reason.to_string()), None)
            .await?;
        self.milestone(job, 100).await;
        Ok(())
    }

    async fn finish_no_changes(
        &self,
        issue_ref: &IssueRef,
        settings: &Settings,
        primary_label: &str,
        task_id: &str,
    ) -> anyhow::Result<()> {
        self.swap_labels(
            issue_ref,
            &settings.processing_label(primary_label),
            &settings.done_label(primary_label),
        )
        .await;
        if let Err(e) = self
            .github
            .create_comment(
                &issue_ref.repo_owner,
                &issue_ref.repo_name,
                issue_ref.number,
                &prompts::no_changes_comment(),
            )
            .await
        {
            warn!(error = %e, "no-changes comment dropped");
        }
        self.store
            .append_event(
                task_id,
                TaskState::Completed,
                Some("no changes needed".into()),
                None,
            )
            .await?;
        Ok(())
    }

    async fn finish_agent_failure(
        &self,
        issue_ref: &IssueRef,
        settings: &Settings,
        primary_label: &str,
        task_id: &str,
        error: &str,
    ) -> anyhow::Result<()> {
        self.swap_labels(
            issue_ref,
            &settings.processing_label(primary_label),
            &settings.failed_claude_label(primary_label),
        )
        .await;
        if let Err(e) = self
            .github
            .create_comment(
                &issue_ref.repo_owner,
                &issue_ref.repo_name,
                issue_ref.number,
                &prompts::agent_failure_comment(error, &issue_ref.correlation_id),
            )
            .await
        {
            warn!(error = %e, "failure comment dropped");
        }
        self.store
            .append_event(
                task_id,
                TaskState::Failed,
                Some(error.to_string()),
                Some(json!({"stage": "claude_execution"})),
            )
            .await?;
        Ok(())
    }

    async fn finish_followup_failure(
        &self,
        issue_ref: &IssueRef,
        task_id: &str,
        error: &str,
    ) -> anyhow::Result<()> {
        if let Err(e) = self
            .github
            .create_comment(
                &issue_ref.repo_owner,
                &issue_ref.repo_name,
                issue_ref.number,
                &prompts::agent_failure_comment(error, &issue_ref.correlation_id),
            )
            .await
        {
            warn!(error = %e, "failure comment dropped");
        }
        self.store
            .append_event(
                task_id,
                TaskState::Failed,
                Some(error.to_string()),
                Some(json!({"stage": "pr_followup"})),
            )
            .await?;
        Ok(())
    }

    /// Infrastructure failure: let the queue retry while attempts remain; on
    /// the final delivery, record the terminal FAILED event so the history
    /// closes. The processing label stays on the issue so the daemon does not
    /// immediately re-discover it; an operator resolves from there.
    async fn infra_failure(
        &self,
        job: &Job,
        task_id: &str,
        error: anyhow::Error,
    ) -> anyhow::Result<()> {
        if job.final_attempt() {
            let reason = format!("{error:#}");
            if let Err(e) = self
                .store
                .append_event(
                    task_id,
                    TaskState::Failed,
                    Some(reason.clone()),
                    Some(json!({"stage": "infrastructure", "attempts": job.attempts_made + 1})),
                )
                .await
            {
                warn!(error = %e, "terminal failure event dropped");
            }
            let issue_ref = job.payload.issue_ref();
            if let Err(e) = self
                .github
                .create_comment(
                    &issue_ref.repo_owner,
                    &issue_ref.repo_name,
                    issue_ref.number,
                    &prompts::agent_failure_comment(&reason, &issue_ref.correlation_id),
                )
                .await
            {
                warn!(error = %e, "failure comment dropped");
            }
        }
        Err(error)
    }

    /// Label transition; both halves are idempotent and best-effort.
    async fn swap_labels(&self, issue_ref: &IssueRef, remove: &str, add: &str) {
        let (owner, repo) = (issue_ref.repo_owner.as_str(), issue_ref.repo_name.as_str());
        if let Err(e) = self
            .github
            .remove_label(owner, repo, issue_ref.number, remove)
            .await
        {
            warn!(label = remove, error = %e, "label removal failed");
        }
        if let Err(e) = self
            .github
            .add_label(owner, repo, issue_ref.number, add)
            .await
        {
            warn!(label = add, error = %e, "label addition failed");
        }
    }

    async fn ensure_task_record(&self, job: &Job) {
        let issue_ref = job.payload.issue_ref();
        let record = TaskRecord {
            task_id: job.payload.task_id(),
            job_id: job.id.clone(),
            correlation_id: issue_ref.correlation_id,
            repository: issue_ref.repository(),
            issue_number: issue_ref.number,
            task_type: match job.payload {
                JobPayload::Issue { .. } => TaskType::Issue,
                JobPayload::PrCommentsBatch { .. } => TaskType::PrCommentsBatch,
            },
            model_name: match &job.payload {
                JobPayload::Issue { model, .. } => model.clone(),
                JobPayload::PrCommentsBatch { .. } => None,
            },
            created_at: Utc::now(),
            initial_job_data: serde_json::to_value(&job.payload).unwrap_or_default(),
        };
        if let Err(e) = self.store.create_task(&record).await {
            warn!(error = %e, "task record creation failed");
        }
    }

    async fn milestone(&self, job: &Job, progress: u8) {
        self.progress.update_progress(&job.id, progress).await;
    }
}

/// Mirror one agent event into the durable detail stream and the live view.
async fn forward_event(
    store: &dyn StatePort,
    task_id: &str,
    execution_id: &Uuid,
    event: &AgentEvent,
    live: &mut LiveDetails,
) {
    let detail = match event {
        AgentEvent::Thought { content } => Some((
            ExecutionDetailKind::Thought,
            Some(content.clone()),
            None,
            None,
            None,
            false,
        )),
        AgentEvent::ToolUse {
            tool_name,
            tool_input,
        } => Some((
            ExecutionDetailKind::ToolUse,
            None,
            Some(tool_name.clone()),
            Some(tool_input.clone()),
            None,
            false,
        )),
        AgentEvent::ToolResult { result, is_error } => Some((
            ExecutionDetailKind::ToolResult,
            None,
            None,
            None,
            result.clone(),
            *is_error,
        )),
        AgentEvent::TodoUpdate { todos } => {
            live.todos = todos.clone();
            live.current_task = todos
                .iter()
                .find(|t| t.status == TodoStatus::InProgress)
                .map(|t| t.content.clone());
            None
        }
        AgentEvent::Final(_) => None,
    };

    if let Some((kind, content, tool_name, tool_input, result, is_error)) = detail {
        if let Err(e) = store
            .append_execution_detail(
                task_id, execution_id, kind, content, tool_name, tool_input, result, is_error,
            )
            .await
        {
            warn!(error = %e, "execution detail dropped");
        }
    }

    if let Ok(line) = serde_json::to_string(event) {
        if let Err(e) = store.append_log(task_id, &line).await {
            warn!(error = %e, "log line dropped");
        }
        if live.events.len() < 500 {
            if let Ok(value) = serde_json::to_value(event) {
                live.events.push(value);
            }
        }
    }
    if let Err(e) = store.set_live_details(task_id, live).await {
        warn!(error = %e, "live details update dropped");
    }
}
