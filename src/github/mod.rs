pub mod client;
pub mod comments;
pub mod errors;
pub mod issues;
pub mod pulls;
pub mod retry;
pub mod types;

pub use client::{GitHubClient, InstallationToken};
pub use errors::GitHubError;
pub use types::{BranchView, CommentView, CreatedPr, IssueRef, IssueView, PullRequestView, WorkItemKind};
