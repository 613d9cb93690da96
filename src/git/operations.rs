use std::path::{Path, PathBuf};

use git2::{IndexAddOption, Repository, Signature, StatusOptions};

use super::{WorkspaceError, BOT_EMAIL, BOT_NAME};

/// Result of staging and committing a worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { commit_id: String },
    /// Zero staged changes. Not an error: the task completes as
    /// "no changes needed".
    NoChanges,
}

/// True when the worktree has any modified, added, deleted or untracked file.
pub fn has_changes(worktree: &Path) -> Result<bool, WorkspaceError> {
    let repo = Repository::open(worktree)?;
    let mut options = StatusOptions::new();
    options.include_untracked(true).recurse_untracked_dirs(true);
    let statuses = repo.statuses(Some(&mut options))?;
    Ok(!statuses.is_empty())
}

/// Paths reported dirty by the worktree status, relative to its root.
pub fn modified_files(worktree: &Path) -> Result<Vec<PathBuf>, WorkspaceError> {
    let repo = Repository::open(worktree)?;
    let mut options = StatusOptions::new();
    options.include_untracked(true).recurse_untracked_dirs(true);
    let statuses = repo.statuses(Some(&mut options))?;
    Ok(statuses
        .iter()
        .filter_map(|entry| entry.path().map(PathBuf::from))
        .collect())
}

/// Stage everything in the worktree and commit as the bot identity.
///
/// Returns [`CommitOutcome::NoChanges`] without touching the index when the
/// tree is clean, so calling with nothing staged never creates a commit.
pub fn commit_all(worktree: &Path, message: &str) -> Result<CommitOutcome, WorkspaceError> {
    let repo = Repository::open(worktree)?;

    let mut options = StatusOptions::new();
    options.include_untracked(true).recurse_untracked_dirs(true);
    if repo.statuses(Some(&mut options))?.is_empty() {
        return Ok(CommitOutcome::NoChanges);
    }

    let mut index = repo.index()?;
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
    index.write()?;
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;

    let signature = Signature::now(BOT_NAME, BOT_EMAIL)?;
    let parent = repo.head()?.peel_to_commit()?;
    let commit_id = repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &[&parent],
    )?;

    Ok(CommitOutcome::Committed {
        commit_id: commit_id.to_string(),
    })
}

/// Templated commit message when the agent does not suggest one.
pub fn default_commit_message(issue_number: u64, title: &str) -> String {
    format!("fix: resolve issue #{issue_number} - {title}\n\nAutomated change for #{issue_number}.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command;
    use tempfile::TempDir;

    fn init_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        let run = |args: &[&str]| {
            let status = Command::new("git")
                .args(args)
                .current_dir(dir.path())
                .status()
                .unwrap();
            assert!(status.success(), "git {args:?} failed");
        };
        run(&["init", "-q"]);
        run(&["config", "user.name", "test"]);
        run(&["config", "user.email", "test@example.com"]);
        fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "init"]);
        dir
    }

    #[test]
    fn clean_tree_reports_no_changes() {
        let dir = init_repo();
        assert!(!has_changes(dir.path()).unwrap());
        let outcome = commit_all(dir.path(), "noop").unwrap();
        assert_eq!(outcome, CommitOutcome::NoChanges);
    }

    #[test]
    fn dirty_tree_commits_with_bot_identity() {
        let dir = init_repo();
        fs::write(dir.path().join("src.rs"), "fn main() {}\n").unwrap();
        assert!(has_changes(dir.path()).unwrap());

        let outcome = commit_all(dir.path(), "fix: add src").unwrap();
        let CommitOutcome::Committed { commit_id } = outcome else {
            panic!("expected a commit");
        };
        assert!(!commit_id.is_empty());

        let repo = Repository::open(dir.path()).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.author().name(), Some(BOT_NAME));
        assert_eq!(head.message(), Some("fix: add src"));
        assert!(!has_changes(dir.path()).unwrap());
    }

    #[test]
    fn no_changes_leaves_head_unmoved() {
        let dir = init_repo();
        let repo = Repository::open(dir.path()).unwrap();
        let before = repo.head().unwrap().peel_to_commit().unwrap().id();
        commit_all(dir.path(), "noop").unwrap();
        let after = repo.head().unwrap().peel_to_commit().unwrap().id();
        assert_eq!(before, after);
    }

    #[test]
    fn modified_files_lists_untracked() {
        let dir = init_repo();
        fs::write(dir.path().join("new.txt"), "x").unwrap();
        let files = modified_files(dir.path()).unwrap();
        assert_eq!(files, vec![PathBuf::from("new.txt")]);
    }
}
