use chrono::{DateTime, Utc};

use super::client::GitHubClient;
use super::errors::GitHubError;
use super::types::CommentView;

const PAGE_SIZE: u8 = 100;

impl GitHubClient {
    /// Create a comment on an issue or PR, returning its id.
    pub async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<u64, GitHubError> {
        let comment = self
            .execute("create_comment", |octocrab| {
                let (owner, repo) = (owner.to_string(), repo.to_string());
                let body = body.to_string();
                async move {
                    octocrab
                        .issues(owner, repo)
                        .create_comment(number, body)
                        .await
                }
            })
            .await?;
        Ok(comment.id.0)
    }

    /// Comments on an issue or PR created strictly after `since`.
    pub async fn list_new_comments(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        since: DateTime<Utc>,
    ) -> Result<Vec<CommentView>, GitHubError> {
        let mut collected = Vec::new();
        let mut page_no: u32 = 1;
        loop {
            let page = self
                .execute("list_new_comments", |octocrab| {
                    let (owner, repo) = (owner.to_string(), repo.to_string());
                    async move {
                        octocrab
                            .issues(owner, repo)
                            .list_comments(number)
                            .since(since)
                            .per_page(PAGE_SIZE)
                            .page(page_no)
                            .send()
                            .await
                    }
                })
                .await?;

            let count = page.items.len();
            collected.extend(
                page.items
                    .into_iter()
                    .map(CommentView::from)
                    // `since` is inclusive on the API side.
                    .filter(|c| c.created_at > since),
            );
            if count < PAGE_SIZE as usize {
                break;
            }
            page_no += 1;
        }
        Ok(collected)
    }
}
