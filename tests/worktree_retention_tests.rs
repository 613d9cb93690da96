//! Worktree disposal against real git repositories in temp directories:
//! retention strategies, the `.retention-info.json` marker, and the expiry
//! sweep.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use gitfix::config::{EnvConfig, RetentionStrategy};
use gitfix::git::worktree::RetentionInfo;
use gitfix::git::{CleanupOptions, WorkspaceManager, Worktree};
use gitfix::github::GitHubClient;

const BRANCH: &str = "ai-fix/42-test-fix-20240101-abc";

fn run(cwd: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .status()
        .unwrap_or_else(|e| panic!("git {args:?}: {e}"));
    assert!(status.success(), "git {args:?} failed in {}", cwd.display());
}

struct Fixture {
    _base: TempDir,
    manager: WorkspaceManager,
    worktree: Worktree,
}

/// A clone with one commit and a worktree on [`BRANCH`], laid out the way the
/// manager expects (`<base>/clones/acme/web`, `<base>/worktrees/acme/web/…`).
fn fixture() -> Fixture {
    let base = TempDir::new().unwrap();
    let clones = base.path().join("clones");
    let worktrees = base.path().join("worktrees");

    let repo = clones.join("acme").join("web");
    std::fs::create_dir_all(&repo).unwrap();
    run(&repo, &["init", "-q"]);
    run(&repo, &["config", "user.name", "test"]);
    run(&repo, &["config", "user.email", "test@example.com"]);
    std::fs::write(repo.join("README.md"), "hello\n").unwrap();
    run(&repo, &["add", "."]);
    run(&repo, &["commit", "-q", "-m", "init"]);

    let worktree_path = worktrees
        .join("acme")
        .join("web")
        .join("issue-42-20240101T000000");
    std::fs::create_dir_all(worktree_path.parent().unwrap()).unwrap();
    run(
        &repo,
        &[
            "worktree",
            "add",
            "-b",
            BRANCH,
            worktree_path.to_str().unwrap(),
        ],
    );
    assert!(worktree_path.join("README.md").exists());

    // The manager only touches the filesystem and git here; the GitHub client
    // just needs a token in the environment to construct.
    std::env::set_var("GITFIX_GITHUB_TOKEN", "test-token");
    let env = EnvConfig {
        polling_interval: std::time::Duration::from_secs(60),
        clones_base: clones,
        worktrees_base: worktrees,
        shallow_clone_depth: None,
        retention_strategy: RetentionStrategy::AlwaysDelete,
        retention_hours: 24,
        worktree_max_age_hours: 72,
        redis_url: "redis://127.0.0.1:6379".into(),
        agent_command: "true".into(),
        agent_timeout: std::time::Duration::from_secs(1800),
        agent_idle_timeout: std::time::Duration::from_secs(300),
        agent_output_cap_bytes: 1024,
        default_branch_overrides: Default::default(),
    };
    let github = Arc::new(GitHubClient::new().unwrap());
    let manager = WorkspaceManager::new(env, github);

    let worktree = Worktree {
        local_repo_path: repo,
        worktree_path,
        branch_name: BRANCH.to_string(),
        base_branch: "main".to_string(),
    };

    Fixture {
        _base: base,
        manager,
        worktree,
    }
}

fn local_branch_exists(repo: &Path, branch: &str) -> bool {
    let output = Command::new("git")
        .args(["branch", "--list", branch])
        .current_dir(repo)
        .output()
        .unwrap();
    !String::from_utf8_lossy(&output.stdout).trim().is_empty()
}

fn marker_path(worktree: &Worktree) -> PathBuf {
    worktree.worktree_path.join(".retention-info.json")
}

#[tokio::test]
async fn always_delete_removes_worktree_and_branch() {
    let f = fixture();
    f.manager
        .cleanup(
            &f.worktree,
            &CleanupOptions {
                delete_branch: true,
                success: false,
                strategy: RetentionStrategy::AlwaysDelete,
                retention_hours: 24,
            },
        )
        .await
        .unwrap();

    assert!(!f.worktree.worktree_path.exists());
    assert!(!local_branch_exists(&f.worktree.local_repo_path, BRANCH));
}

#[tokio::test]
async fn successful_task_keeps_its_branch() {
    let f = fixture();
    f.manager
        .cleanup(
            &f.worktree,
            &CleanupOptions {
                delete_branch: false,
                success: true,
                strategy: RetentionStrategy::AlwaysDelete,
                retention_hours: 24,
            },
        )
        .await
        .unwrap();

    assert!(!f.worktree.worktree_path.exists());
    assert!(local_branch_exists(&f.worktree.local_repo_path, BRANCH));
}

#[tokio::test]
async fn keep_for_hours_writes_retention_marker() {
    let f = fixture();
    f.manager
        .cleanup(
            &f.worktree,
            &CleanupOptions {
                delete_branch: true,
                success: false,
                strategy: RetentionStrategy::KeepForHours,
                retention_hours: 6,
            },
        )
        .await
        .unwrap();

    assert!(f.worktree.worktree_path.exists());
    let info: RetentionInfo =
        serde_json::from_slice(&std::fs::read(marker_path(&f.worktree)).unwrap()).unwrap();
    assert_eq!(info.branch_name, BRANCH);
    assert!(info.delete_branch);

    let scheduled = info.scheduled_cleanup.expect("keep_for_hours schedules cleanup");
    let expected = Utc::now() + Duration::hours(6);
    assert!((scheduled - expected).num_minutes().abs() <= 1);

    // Not yet due: the sweep must leave it alone.
    assert_eq!(f.manager.cleanup_expired().await.unwrap(), 0);
    assert!(f.worktree.worktree_path.exists());
}

#[tokio::test]
async fn expired_retention_is_swept_including_branch() {
    let f = fixture();
    let info = RetentionInfo {
        local_repo_path: f.worktree.local_repo_path.clone(),
        branch_name: BRANCH.to_string(),
        delete_branch: true,
        retained_at: Utc::now() - Duration::hours(7),
        scheduled_cleanup: Some(Utc::now() - Duration::hours(1)),
        reason: "task failed".to_string(),
    };
    std::fs::write(
        marker_path(&f.worktree),
        serde_json::to_vec_pretty(&info).unwrap(),
    )
    .unwrap();

    let removed = f.manager.cleanup_expired().await.unwrap();
    assert_eq!(removed, 1);
    assert!(!f.worktree.worktree_path.exists());
    assert!(!local_branch_exists(&f.worktree.local_repo_path, BRANCH));
}

#[tokio::test]
async fn keep_on_failure_retains_without_schedule() {
    let f = fixture();
    f.manager
        .cleanup(
            &f.worktree,
            &CleanupOptions {
                delete_branch: true,
                success: false,
                strategy: RetentionStrategy::KeepOnFailure,
                retention_hours: 24,
            },
        )
        .await
        .unwrap();

    assert!(f.worktree.worktree_path.exists());
    let info: RetentionInfo =
        serde_json::from_slice(&std::fs::read(marker_path(&f.worktree)).unwrap()).unwrap();
    assert!(info.scheduled_cleanup.is_none());
}
