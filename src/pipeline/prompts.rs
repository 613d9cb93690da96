//! Prompt and comment composition for the task pipeline.
//!
//! Prompts carry explicit repository metadata so the agent never has to guess
//! where it is working; comments are what repo owners actually see, so they
//! stay short and link back to the task.

use crate::agent::FinalResult;
use crate::git::Worktree;
use crate::github::{CommentView, IssueRef, IssueView};

pub fn issue_prompt(issue_ref: &IssueRef, issue: &IssueView, worktree: &Worktree) -> String {
    format!(
        "You are fixing a GitHub issue.\n\
         \n\
         Repository: {owner}/{repo}\n\
         Working directory (git worktree): {path}\n\
         Branch: {branch}\n\
         Base branch: {base}\n\
         Issue number: #{number}\n\
         Issue title: {title}\n\
         Issue URL: {url}\n\
         \n\
         Issue body:\n\
         {body}\n\
         \n\
         Resolve the issue by editing files in the working directory. Do not\n\
         commit, push, or open a pull request; the orchestrator handles that\n\
         after you finish. When you are done, emit your final record with a\n\
         suggested commit message.",
        owner = issue_ref.repo_owner,
        repo = issue_ref.repo_name,
        path = worktree.worktree_path.display(),
        branch = worktree.branch_name,
        base = worktree.base_branch,
        number = issue_ref.number,
        title = issue.title,
        url = issue.html_url,
        body = issue.body.as_deref().unwrap_or("(no description)"),
    )
}

pub fn followup_prompt(
    issue_ref: &IssueRef,
    pr_title: &str,
    worktree: &Worktree,
    comments: &[CommentView],
) -> String {
    let mut aggregated = String::new();
    for comment in comments {
        aggregated.push_str(&format!(
            "--- @{} at {} ---\n{}\n\n",
            comment.author,
            comment.created_at.to_rfc3339(),
            comment.body
        ));
    }

    format!(
        "You are applying follow-up feedback to an existing pull request.\n\
         \n\
         Repository: {owner}/{repo}\n\
         Working directory (git worktree): {path}\n\
         Branch (the PR's head, already checked out): {branch}\n\
         Pull request: #{number} - {title}\n\
         \n\
         New reviewer comments to address:\n\
         {aggregated}\
         Apply the requested changes in the working directory. Do not commit,\n\
         push, or open a new pull request; the orchestrator pushes to the\n\
         existing PR branch after you finish.",
        owner = issue_ref.repo_owner,
        repo = issue_ref.repo_name,
        path = worktree.worktree_path.display(),
        branch = worktree.branch_name,
        number = issue_ref.number,
        title = pr_title,
    )
}

/// Single-purpose prompt for the post-processing emergency retry: the code is
/// already committed and pushed, only the PR is missing.
pub fn emergency_pr_prompt(issue_ref: &IssueRef, worktree: &Worktree) -> String {
    format!(
        "The fix for issue #{number} in {owner}/{repo} is already committed and\n\
         pushed to branch `{branch}` (base `{base}`). The working directory is\n\
         {path}.\n\
         \n\
         The pull request for that branch is missing. Your only task: create a\n\
         pull request from `{branch}` into `{base}` titled for issue #{number}\n\
         and referencing it in the body (for example with `gh pr create`). Do\n\
         not change any files.",
        number = issue_ref.number,
        owner = issue_ref.repo_owner,
        repo = issue_ref.repo_name,
        branch = worktree.branch_name,
        base = worktree.base_branch,
        path = worktree.worktree_path.display(),
    )
}

pub fn pr_title(issue_number: u64, issue_title: &str) -> String {
    format!("Fix #{issue_number}: {issue_title}")
}

pub fn pr_body(issue_number: u64, result: &FinalResult) -> String {
    let summary = result
        .summary
        .as_deref()
        .unwrap_or("Automated fix for the referenced issue.");
    format!("{summary}\n\nFixes #{issue_number}.")
}

pub fn started_comment(correlation_id: &uuid::Uuid) -> String {
    format!(
        "🤖 Started working on this issue. A pull request will follow if a fix \
         is found.\n\n<sub>task `{correlation_id}`</sub>"
    )
}

pub fn completion_comment(pr_url: &str, result: &FinalResult) -> String {
    let mut comment = format!("✅ Opened {pr_url} for this issue.");
    if let Some(turns) = result.num_turns {
        comment.push_str(&format!("\n- conversation turns: {turns}"));
    }
    if let Some(cost) = result.cost_usd {
        comment.push_str(&format!("\n- cost: ${cost:.2}"));
    }
    comment
}

pub fn no_changes_comment() -> String {
    "✅ Analyzed this issue and concluded no code changes are needed. \
     Closing the loop without a pull request."
        .to_string()
}

pub fn agent_failure_comment(error: &str, correlation_id: &uuid::Uuid) -> String {
    format!(
        "❌ The automated fix attempt failed.\n\n```\n{error}\n```\n\n\
         <sub>logs are retained under task `{correlation_id}` for 7 days</sub>"
    )
}

pub fn post_processing_failure_comment(error: &str, branch: &str) -> String {
    format!(
        "❌ The fix was committed and pushed to `{branch}`, but opening the \
         pull request failed after retrying.\n\n```\n{error}\n```"
    )
}

pub fn followup_summary_comment(result: &FinalResult, pushed: bool) -> String {
    let summary = result
        .summary
        .as_deref()
        .unwrap_or("Addressed the requested follow-up changes.");
    if pushed {
        format!("🤖 {summary}\n\nNew commits were pushed to this PR's branch.")
    } else {
        format!("🤖 {summary}\n\nNo file changes were necessary.")
    }
}
