use serde::{Deserialize, Serialize};

use crate::github::{CommentView, IssueRef};

/// Payload of one queued work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum JobPayload {
    /// Resolve a labeled issue end to end.
    Issue {
        issue_ref: IssueRef,
        primary_label: String,
        model: Option<String>,
    },
    /// Apply a batch of follow-up comments to an existing PR's head branch.
    PrCommentsBatch {
        issue_ref: IssueRef,
        pr_branch: String,
        base_branch: String,
        comments: Vec<CommentView>,
        window_start: i64,
    },
}

impl JobPayload {
    /// Stable idempotency key for queue insertion.
    pub fn job_id(&self) -> String {
        match self {
            JobPayload::Issue {
                issue_ref,
                primary_label,
                ..
            } => format!(
                "issue-{}-{}-{}-{}",
                issue_ref.repo_owner, issue_ref.repo_name, issue_ref.number, primary_label
            ),
            JobPayload::PrCommentsBatch {
                issue_ref,
                window_start,
                ..
            } => format!(
                "pr-comments-batch-{}-{}-{}-{}",
                issue_ref.repo_owner, issue_ref.repo_name, issue_ref.number, window_start
            ),
        }
    }

    pub fn task_id(&self) -> String {
        match self {
            JobPayload::Issue { issue_ref, .. } => issue_ref.task_id(None),
            JobPayload::PrCommentsBatch {
                issue_ref,
                window_start,
                ..
            } => issue_ref.task_id(Some(*window_start)),
        }
    }

    pub fn issue_ref(&self) -> &IssueRef {
        match self {
            JobPayload::Issue { issue_ref, .. } => issue_ref,
            JobPayload::PrCommentsBatch { issue_ref, .. } => issue_ref,
        }
    }
}

/// A dequeued job with its retry bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub payload: JobPayload,
    pub attempts_made: u32,
    pub max_attempts: u32,
}

impl Job {
    /// True when this is the last delivery the queue will make.
    pub fn final_attempt(&self) -> bool {
        self.attempts_made + 1 >= self.max_attempts
    }
}
