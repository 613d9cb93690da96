use tracing::debug;

use super::client::GitHubClient;
use super::errors::GitHubError;
use super::types::IssueView;

const PAGE_SIZE: u8 = 100;

impl GitHubClient {
    /// Search open issues carrying `primary` but neither of its state labels.
    /// Results are page-collected (handles well past 100 matches) and ordered
    /// newest-created first.
    pub async fn search_eligible_issues(
        &self,
        owner: &str,
        repo: &str,
        primary: &str,
        processing_label: &str,
        done_label: &str,
    ) -> Result<Vec<IssueView>, GitHubError> {
        let query = format!(
            "repo:{owner}/{repo} is:issue is:open label:\"{primary}\" -label:\"{processing_label}\" -label:\"{done_label}\""
        );
        self.search_issues(&query).await
    }

    /// Search issues (any state) carrying `label`. Used by label-reset admin.
    pub async fn search_issues_with_label(
        &self,
        owner: &str,
        repo: &str,
        label: &str,
    ) -> Result<Vec<IssueView>, GitHubError> {
        let query = format!("repo:{owner}/{repo} is:issue label:\"{label}\"");
        self.search_issues(&query).await
    }

    async fn search_issues(&self, query: &str) -> Result<Vec<IssueView>, GitHubError> {
        let mut collected = Vec::new();
        let mut page_no: u32 = 1;
        loop {
            let page = self
                .execute("search_issues", |octocrab| {
                    let query = query.to_string();
                    async move {
                        octocrab
                            .search()
                            .issues_and_pull_requests(&query)
                            .sort("created")
                            .order("desc")
                            .per_page(PAGE_SIZE)
                            .page(page_no)
                            .send()
                            .await
                    }
                })
                .await?;

            let count = page.items.len();
            collected.extend(page.items.into_iter().map(IssueView::from));
            if count < PAGE_SIZE as usize {
                break;
            }
            page_no += 1;
        }
        debug!(query, results = collected.len(), "issue search complete");
        Ok(collected)
    }

    pub async fn get_issue(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<IssueView, GitHubError> {
        let issue = self
            .execute("get_issue", |octocrab| {
                let (owner, repo) = (owner.to_string(), repo.to_string());
                async move { octocrab.issues(owner, repo).get(number).await }
            })
            .await?;
        Ok(issue.into())
    }

    /// Add a label to an issue or PR. Pre-existing labels are a success.
    pub async fn add_label(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), GitHubError> {
        let result = self
            .execute("add_label", |octocrab| {
                let (owner, repo) = (owner.to_string(), repo.to_string());
                let labels = vec![label.to_string()];
                async move { octocrab.issues(owner, repo).add_labels(number, &labels).await }
            })
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(GitHubError::ValidationFailed(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Remove a label from an issue or PR. A missing label is a success.
    pub async fn remove_label(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), GitHubError> {
        let result = self
            .execute("remove_label", |octocrab| {
                let (owner, repo) = (owner.to_string(), repo.to_string());
                let label = label.to_string();
                async move {
                    octocrab
                        .issues(owner, repo)
                        .remove_label(number, label)
                        .await
                }
            })
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Create a repository label. An existing label with the same name is a
    /// success.
    pub async fn create_label(
        &self,
        owner: &str,
        repo: &str,
        name: &str,
        color: &str,
        description: &str,
    ) -> Result<(), GitHubError> {
        let result = self
            .execute("create_label", |octocrab| {
                let (owner, repo) = (owner.to_string(), repo.to_string());
                let (name, color, description) =
                    (name.to_string(), color.to_string(), description.to_string());
                async move {
                    octocrab
                        .issues(owner, repo)
                        .create_label(name, color, description)
                        .await
                }
            })
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(GitHubError::ValidationFailed(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
