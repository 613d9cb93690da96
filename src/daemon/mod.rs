pub mod keywords;

pub use keywords::{CommentFilter, KeywordMatcher};

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigLoader, EnvConfig, GitfixConfig};
use crate::github::{GitHubClient, IssueRef, WorkItemKind};
use crate::queue::{AddOptions, AddOutcome, JobPayload, QueueCounts, TaskQueue};
use crate::shutdown::ShutdownSignal;
use crate::store::{TaskRecord, TaskState, TaskStateStore, TaskType};
use crate::telemetry;

/// Follow-up scans re-read PRs updated up to this long before the last poll,
/// so a comment landing mid-poll is never missed.
fn poll_overlap() -> ChronoDuration {
    ChronoDuration::minutes(2)
}

/// Floor for the per-PR comment window.
fn comment_lookback() -> ChronoDuration {
    ChronoDuration::hours(24)
}

#[derive(Debug, Serialize)]
struct Heartbeat<'a> {
    daemon_id: &'a str,
    pid: u32,
    uptime_secs: u64,
    timestamp: DateTime<Utc>,
    status: &'a str,
    repos: Vec<String>,
    queue: QueueCounts,
}

/// Single-process polling loop that discovers eligible work and enqueues it.
/// It never runs jobs itself.
pub struct DiscoveryDaemon {
    config: Arc<ConfigLoader>,
    env: EnvConfig,
    github: Arc<GitHubClient>,
    queue: Arc<TaskQueue>,
    store: Arc<TaskStateStore>,
    daemon_id: String,
    started_at: Instant,
    last_poll: Mutex<Option<DateTime<Utc>>>,
}

impl DiscoveryDaemon {
    pub fn new(
        config: Arc<ConfigLoader>,
        env: EnvConfig,
        github: Arc<GitHubClient>,
        queue: Arc<TaskQueue>,
        store: Arc<TaskStateStore>,
    ) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown-host".to_string());
        let daemon_id = format!("{host}-{}", std::process::id());
        Self {
            config,
            env,
            github,
            queue,
            store,
            daemon_id,
            started_at: Instant::now(),
            last_poll: Mutex::new(None),
        }
    }

    /// Poll until shutdown. On SIGINT/SIGTERM the loop stops, the heartbeat
    /// is removed, and the call returns cleanly.
    pub async fn run(&self, mut shutdown: ShutdownSignal) -> anyhow::Result<()> {
        info!(
            daemon_id = %self.daemon_id,
            interval_ms = self.env.polling_interval.as_millis() as u64,
            "discovery daemon started"
        );
        let mut interval = tokio::time::interval(self.env.polling_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!(error = %format!("{e:#}"), "poll iteration failed");
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        if let Err(e) = self.store.remove_heartbeat(&self.daemon_id).await {
            warn!(error = %e, "heartbeat removal failed");
        }
        info!(daemon_id = %self.daemon_id, "discovery daemon stopped");
        Ok(())
    }

    async fn poll_once(&self) -> anyhow::Result<()> {
        let snapshot = self.config.load_all();
        self.beat(&snapshot).await;

        let poll_started = Utc::now();
        let previous_poll = *self.last_poll.lock().await;

        for repo in snapshot.enabled_repos() {
            let (owner, name) = repo.split();
            if let Err(e) = self.discover_issues(&snapshot, owner, name).await {
                warn!(repo = %repo.name, error = %format!("{e:#}"), "issue discovery failed");
            }
            if let Err(e) = self
                .discover_followups(&snapshot, owner, name, previous_poll)
                .await
            {
                warn!(repo = %repo.name, error = %format!("{e:#}"), "follow-up discovery failed");
            }
        }

        *self.last_poll.lock().await = Some(poll_started);
        Ok(())
    }

    async fn beat(&self, snapshot: &GitfixConfig) {
        let heartbeat = Heartbeat {
            daemon_id: &self.daemon_id,
            pid: std::process::id(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            timestamp: Utc::now(),
            status: "active",
            repos: snapshot.enabled_repos().map(|r| r.name.clone()).collect(),
            queue: self.queue.counts().await.unwrap_or_default(),
        };
        let ttl = self.env.polling_interval * 2;
        if let Err(e) = self.store.heartbeat(&self.daemon_id, &heartbeat, ttl).await {
            warn!(error = %e, "heartbeat write failed");
        }
    }

    /// One search per (repo, primary label); each hit becomes an issue-fix
    /// job. Search results arrive newest-created first, so enqueue order
    /// within a poll follows `created desc`.
    async fn discover_issues(
        &self,
        snapshot: &GitfixConfig,
        owner: &str,
        repo: &str,
    ) -> anyhow::Result<()> {
        for primary in &snapshot.settings.primary_labels {
            let issues = self
                .github
                .search_eligible_issues(
                    owner,
                    repo,
                    primary,
                    &snapshot.settings.processing_label(primary),
                    &snapshot.settings.done_label(primary),
                )
                .await?;

            for issue in issues {
                let payload = JobPayload::Issue {
                    issue_ref: IssueRef {
                        repo_owner: owner.to_string(),
                        repo_name: repo.to_string(),
                        number: issue.number,
                        kind: WorkItemKind::Issue,
                        correlation_id: telemetry::generate_correlation_id(),
                    },
                    primary_label: primary.clone(),
                    model: None,
                };
                self.enqueue(payload).await?;
            }
        }
        Ok(())
    }

    /// Scan labeled PRs for fresh whitelisted keyword comments and batch them
    /// into one follow-up job per PR.
    async fn discover_followups(
        &self,
        snapshot: &GitfixConfig,
        owner: &str,
        repo: &str,
        previous_poll: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        let settings = &snapshot.settings;
        if settings.followup_keywords.is_empty() {
            return Ok(());
        }
        let filter = CommentFilter::new(
            &settings.user_whitelist,
            &settings.bot_username,
            &settings.followup_keywords,
        );

        let prs = self
            .github
            .list_open_prs_with_label(owner, repo, &settings.pr_label)
            .await?;
        let updated_floor = previous_poll.map(|t| t - poll_overlap());

        for pr in prs {
            if let (Some(floor), Some(updated_at)) = (updated_floor, pr.updated_at) {
                if updated_at < floor {
                    continue;
                }
            }

            let lookback_floor = Utc::now() - comment_lookback();
            let since = match self
                .store
                .last_handled_comment_at(owner, repo, pr.number)
                .await?
            {
                Some(last) if last > lookback_floor => last,
                _ => lookback_floor,
            };

            let comments = self
                .github
                .list_new_comments(owner, repo, pr.number, since)
                .await?;
            let actionable: Vec<_> = comments
                .into_iter()
                .filter(|c| filter.is_actionable(c))
                .collect();
            if actionable.is_empty() {
                continue;
            }

            let newest = actionable
                .iter()
                .map(|c| c.created_at)
                .max()
                .unwrap_or(since);
            let payload = JobPayload::PrCommentsBatch {
                issue_ref: IssueRef {
                    repo_owner: owner.to_string(),
                    repo_name: repo.to_string(),
                    number: pr.number,
                    kind: WorkItemKind::PrComment,
                    correlation_id: telemetry::generate_correlation_id(),
                },
                pr_branch: pr.head_ref.clone(),
                base_branch: pr.base_ref.clone(),
                comments: actionable,
                window_start: since.timestamp(),
            };
            if self.enqueue(payload).await? == AddOutcome::Added {
                self.store
                    .set_last_handled_comment_at(owner, repo, pr.number, newest)
                    .await?;
            }
        }
        Ok(())
    }

    /// Enqueue plus the matching task row and QUEUED history event. Duplicate
    /// job ids are dropped by the queue and create nothing.
    async fn enqueue(&self, payload: JobPayload) -> anyhow::Result<AddOutcome> {
        let outcome = self.queue.add(&payload, AddOptions::default()).await?;
        if outcome == AddOutcome::Duplicate {
            debug!(job_id = %payload.job_id(), "already queued");
            return Ok(outcome);
        }

        let issue_ref = payload.issue_ref();
        let record = TaskRecord {
            task_id: payload.task_id(),
            job_id: payload.job_id(),
            correlation_id: issue_ref.correlation_id,
            repository: issue_ref.repository(),
            issue_number: issue_ref.number,
            task_type: match payload {
                JobPayload::Issue { .. } => TaskType::Issue,
                JobPayload::PrCommentsBatch { .. } => TaskType::PrCommentsBatch,
            },
            model_name: match &payload {
                JobPayload::Issue { model, .. } => model.clone(),
                JobPayload::PrCommentsBatch { .. } => None,
            },
            created_at: Utc::now(),
            initial_job_data: serde_json::to_value(&payload)?,
        };
        self.store.create_task(&record).await?;
        self.store
            .append_event(&record.task_id, TaskState::Queued, None, None)
            .await?;
        info!(job_id = %record.job_id, task_id = %record.task_id, "work item enqueued");
        Ok(outcome)
    }

    /// `--reset-labels`: strip every `<L>-processing` label in every enabled
    /// repo, then return so the normal loop can start.
    pub async fn reset_processing_labels(&self) -> anyhow::Result<()> {
        let snapshot = self.config.load_all();
        for repo in snapshot.enabled_repos() {
            let (owner, name) = repo.split();
            for primary in &snapshot.settings.primary_labels {
                let processing = snapshot.settings.processing_label(primary);
                let issues = self
                    .github
                    .search_issues_with_label(owner, name, &processing)
                    .await?;
                for issue in issues {
                    self.github
                        .remove_label(owner, name, issue.number, &processing)
                        .await?;
                    info!(repo = %repo.name, issue = issue.number, label = %processing, "processing label removed");
                }
            }
        }
        Ok(())
    }
}
