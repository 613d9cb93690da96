use octocrab::params::repos::Reference;
use octocrab::params::State;

use super::client::GitHubClient;
use super::errors::GitHubError;
use super::types::{BranchView, CreatedPr, PullRequestView};

const PAGE_SIZE: u8 = 100;

impl GitHubClient {
    /// Open PRs in the repository carrying `label`.
    pub async fn list_open_prs_with_label(
        &self,
        owner: &str,
        repo: &str,
        label: &str,
    ) -> Result<Vec<PullRequestView>, GitHubError> {
        let prs = self.list_open_prs(owner, repo, None).await?;
        Ok(prs.into_iter().filter(|pr| pr.has_label(label)).collect())
    }

    /// Open PRs whose head is `head` (formatted `owner:branch`).
    pub async fn list_prs_with_head(
        &self,
        owner: &str,
        repo: &str,
        head: &str,
    ) -> Result<Vec<PullRequestView>, GitHubError> {
        self.list_open_prs(owner, repo, Some(head)).await
    }

    async fn list_open_prs(
        &self,
        owner: &str,
        repo: &str,
        head: Option<&str>,
    ) -> Result<Vec<PullRequestView>, GitHubError> {
        let mut collected = Vec::new();
        let mut page_no: u32 = 1;
        loop {
            let page = self
                .execute("list_open_prs", |octocrab| {
                    let (owner, repo) = (owner.to_string(), repo.to_string());
                    let head = head.map(str::to_string);
                    async move {
                        let pulls_handler = octocrab.pulls(owner, repo);
                        let mut builder = pulls_handler
                            .list()
                            .state(State::Open)
                            .per_page(PAGE_SIZE)
                            .page(page_no);
                        if let Some(head) = head {
                            builder = builder.head(head);
                        }
                        builder.send().await
                    }
                })
                .await?;

            let count = page.items.len();
            collected.extend(page.items.into_iter().map(PullRequestView::from));
            if count < PAGE_SIZE as usize {
                break;
            }
            page_no += 1;
        }
        Ok(collected)
    }

    pub async fn get_pr(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequestView, GitHubError> {
        let pr = self
            .execute("get_pr", |octocrab| {
                let (owner, repo) = (owner.to_string(), repo.to_string());
                async move { octocrab.pulls(owner, repo).get(number).await }
            })
            .await?;
        Ok(pr.into())
    }

    pub async fn create_pr(
        &self,
        owner: &str,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedPr, GitHubError> {
        let pr = self
            .execute("create_pr", |octocrab| {
                let (owner, repo) = (owner.to_string(), repo.to_string());
                let (head, base) = (head.to_string(), base.to_string());
                let (title, body) = (title.to_string(), body.to_string());
                async move {
                    octocrab
                        .pulls(owner, repo)
                        .create(title, head, base)
                        .body(body)
                        .send()
                        .await
                }
            })
            .await?;

        Ok(CreatedPr {
            number: pr.number,
            url: pr.url,
            html_url: pr.html_url.map(|u| u.to_string()).unwrap_or_default(),
        })
    }

    /// Probe a remote branch. `NotFound` signals the branch is missing.
    pub async fn get_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<BranchView, GitHubError> {
        let reference = self
            .execute("get_branch", |octocrab| {
                let (owner, repo) = (owner.to_string(), repo.to_string());
                let branch = branch.to_string();
                async move {
                    octocrab
                        .repos(owner, repo)
                        .get_ref(&Reference::Branch(branch))
                        .await
                }
            })
            .await?;

        let sha = match reference.object {
            octocrab::models::repos::Object::Commit { sha, .. } => sha,
            octocrab::models::repos::Object::Tag { sha, .. } => sha,
            _ => String::new(),
        };
        Ok(BranchView {
            name: branch.to_string(),
            sha,
        })
    }

    /// Default branch reported by the repository metadata, when set.
    pub async fn repo_default_branch(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Option<String>, GitHubError> {
        let repository = self
            .execute("get_repo", |octocrab| {
                let (owner, repo) = (owner.to_string(), repo.to_string());
                async move { octocrab.repos(owner, repo).get().await }
            })
            .await?;
        Ok(repository.default_branch)
    }
}
