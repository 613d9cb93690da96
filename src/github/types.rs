use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of work item a job represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkItemKind {
    Issue,
    PrComment,
}

/// Unique identity of a work item, threaded from discovery to terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRef {
    pub repo_owner: String,
    pub repo_name: String,
    pub number: u64,
    pub kind: WorkItemKind,
    /// Assigned at enqueue; every log record and history event for the task
    /// carries it.
    pub correlation_id: Uuid,
}

impl IssueRef {
    pub fn repository(&self) -> String {
        format!("{}/{}", self.repo_owner, self.repo_name)
    }

    /// Stable task id. Follow-up batches embed the comment window start so a
    /// new window yields a new task.
    pub fn task_id(&self, window: Option<i64>) -> String {
        match self.kind {
            WorkItemKind::Issue => {
                format!("{}-{}-{}", self.repo_owner, self.repo_name, self.number)
            }
            WorkItemKind::PrComment => format!(
                "pr-comments-batch-{}-{}-{}-{}",
                self.repo_owner,
                self.repo_name,
                self.number,
                window.unwrap_or_default()
            ),
        }
    }

    pub fn issue_url(&self) -> String {
        format!(
            "https://github.com/{}/{}/issues/{}",
            self.repo_owner, self.repo_name, self.number
        )
    }
}

/// Issue payload trimmed to the fields the core consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueView {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub labels: Vec<String>,
    pub author: String,
    pub html_url: String,
    pub created_at: DateTime<Utc>,
}

impl IssueView {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

impl From<octocrab::models::issues::Issue> for IssueView {
    fn from(issue: octocrab::models::issues::Issue) -> Self {
        Self {
            number: issue.number,
            title: issue.title,
            body: issue.body,
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
            author: issue.user.login,
            html_url: issue.html_url.to_string(),
            created_at: issue.created_at,
        }
    }
}

/// Pull request payload trimmed to the fields the core consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestView {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub labels: Vec<String>,
    pub head_ref: String,
    pub head_sha: String,
    pub base_ref: String,
    pub html_url: String,
    pub open: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PullRequestView {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

impl From<octocrab::models::pulls::PullRequest> for PullRequestView {
    fn from(pr: octocrab::models::pulls::PullRequest) -> Self {
        Self {
            number: pr.number,
            title: pr.title.unwrap_or_default(),
            body: pr.body,
            labels: pr
                .labels
                .unwrap_or_default()
                .into_iter()
                .map(|l| l.name)
                .collect(),
            head_ref: pr.head.ref_field,
            head_sha: pr.head.sha,
            base_ref: pr.base.ref_field,
            html_url: pr.html_url.map(|u| u.to_string()).unwrap_or_default(),
            open: matches!(pr.state, Some(octocrab::models::IssueState::Open)),
            updated_at: pr.updated_at,
        }
    }
}

/// An issue or PR comment as seen by the follow-up scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentView {
    pub id: u64,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl From<octocrab::models::issues::Comment> for CommentView {
    fn from(comment: octocrab::models::issues::Comment) -> Self {
        Self {
            id: comment.id.0,
            author: comment.user.login,
            body: comment.body.unwrap_or_default(),
            created_at: comment.created_at,
        }
    }
}

/// Result of `create_pr`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedPr {
    pub number: u64,
    pub url: String,
    pub html_url: String,
}

/// A remote branch probe result.
#[derive(Debug, Clone)]
pub struct BranchView {
    pub name: String,
    pub sha: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue_ref(kind: WorkItemKind) -> IssueRef {
        IssueRef {
            repo_owner: "acme".into(),
            repo_name: "web".into(),
            number: 42,
            kind,
            correlation_id: Uuid::nil(),
        }
    }

    #[test]
    fn issue_task_id_is_owner_repo_number() {
        assert_eq!(issue_ref(WorkItemKind::Issue).task_id(None), "acme-web-42");
    }

    #[test]
    fn followup_task_id_embeds_window() {
        assert_eq!(
            issue_ref(WorkItemKind::PrComment).task_id(Some(1_700_000_000)),
            "pr-comments-batch-acme-web-42-1700000000"
        );
    }
}
