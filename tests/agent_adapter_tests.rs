//! Drive the agent adapter against real subprocesses (shell scripts that
//! speak the stdio contract).

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use gitfix::agent::{AgentAdapter, AgentError, AgentEvent, AgentRequest};
use gitfix::config::{EnvConfig, RetentionStrategy};

fn env_with_agent(script: &str, dir: &TempDir, idle: Duration, wall: Duration) -> EnvConfig {
    let path = dir.path().join("fake-agent.sh");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    EnvConfig {
        polling_interval: Duration::from_secs(60),
        clones_base: dir.path().join("clones"),
        worktrees_base: dir.path().join("worktrees"),
        shallow_clone_depth: None,
        retention_strategy: RetentionStrategy::AlwaysDelete,
        retention_hours: 24,
        worktree_max_age_hours: 72,
        redis_url: "redis://127.0.0.1:6379".into(),
        agent_command: path.to_string_lossy().into_owned(),
        agent_timeout: wall,
        agent_idle_timeout: idle,
        agent_output_cap_bytes: 64 * 1024,
        default_branch_overrides: Default::default(),
    }
}

fn request(workdir: PathBuf) -> AgentRequest {
    AgentRequest {
        prompt: "fix it".into(),
        worktree_path: workdir,
        repo_owner: "acme".into(),
        repo_name: "web".into(),
        issue_number: 42,
        github_token: "test-token".into(),
    }
}

#[tokio::test]
async fn well_behaved_agent_round_trip() {
    let dir = TempDir::new().unwrap();
    let script = r#"#!/bin/sh
cat > /dev/null
echo '{"type":"thought","content":"reading the issue"}'
echo '{"type":"tool_use","tool_name":"bash","tool_input":{"command":"ls"}}'
echo '{"type":"tool_result","result":"ok","is_error":false}'
echo 'not json at all'
echo '{"type":"final","success":true,"num_turns":3,"cost_usd":0.1,"model":"claude-3","session_id":"s-9","suggested_commit_message":"fix: it"}'
"#;
    let env = env_with_agent(
        script,
        &dir,
        Duration::from_secs(10),
        Duration::from_secs(30),
    );
    let adapter = AgentAdapter::new(&env);

    let outcome = adapter.run(&request(dir.path().into()), None).await.unwrap();
    assert!(outcome.final_result.success);
    assert_eq!(outcome.final_result.num_turns, Some(3));
    assert_eq!(outcome.final_result.session_id.as_deref(), Some("s-9"));
    // Four parseable records; the garbage line is skipped but still buffered.
    assert_eq!(outcome.events.len(), 4);
    assert!(outcome.raw_output.contains("not json at all"));
    assert!(!outcome.output_truncated);
}

#[tokio::test]
async fn events_are_forwarded_in_order() {
    let dir = TempDir::new().unwrap();
    let script = r#"#!/bin/sh
cat > /dev/null
echo '{"type":"thought","content":"one"}'
echo '{"type":"thought","content":"two"}'
echo '{"type":"final","success":true}'
"#;
    let env = env_with_agent(
        script,
        &dir,
        Duration::from_secs(10),
        Duration::from_secs(30),
    );
    let adapter = AgentAdapter::new(&env);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    adapter.run(&request(dir.path().into()), Some(tx)).await.unwrap();

    let mut seen = Vec::new();
    while let Some(event) = rx.recv().await {
        seen.push(event);
    }
    assert_eq!(seen.len(), 3);
    assert_eq!(
        seen[0],
        AgentEvent::Thought {
            content: "one".into()
        }
    );
    assert!(matches!(seen[2], AgentEvent::Final(_)));
}

#[tokio::test]
async fn exit_without_final_record_is_a_crash() {
    let dir = TempDir::new().unwrap();
    let script = r#"#!/bin/sh
cat > /dev/null
echo '{"type":"thought","content":"about to die"}'
exit 1
"#;
    let env = env_with_agent(
        script,
        &dir,
        Duration::from_secs(10),
        Duration::from_secs(30),
    );
    let adapter = AgentAdapter::new(&env);

    let err = adapter.run(&request(dir.path().into()), None).await.unwrap_err();
    assert!(matches!(err, AgentError::Crashed { exit_code: Some(1) }));
}

#[tokio::test]
async fn silent_agent_is_stalled() {
    let dir = TempDir::new().unwrap();
    let script = r#"#!/bin/sh
cat > /dev/null
sleep 30
"#;
    let env = env_with_agent(script, &dir, Duration::from_secs(1), Duration::from_secs(20));
    let adapter = AgentAdapter::new(&env);

    let err = adapter.run(&request(dir.path().into()), None).await.unwrap_err();
    assert!(matches!(err, AgentError::Stalled(_)));
}

#[tokio::test]
async fn wall_clock_budget_is_enforced() {
    let dir = TempDir::new().unwrap();
    // Keeps chattering so the idle timeout never fires; only the wall clock
    // can stop it.
    let script = r#"#!/bin/sh
cat > /dev/null
while true; do
  echo '{"type":"thought","content":"still going"}'
  sleep 1
done
"#;
    let env = env_with_agent(script, &dir, Duration::from_secs(10), Duration::from_secs(3));
    let adapter = AgentAdapter::new(&env);

    let err = adapter.run(&request(dir.path().into()), None).await.unwrap_err();
    assert!(matches!(err, AgentError::TimedOut(_)));
}

#[tokio::test]
async fn modified_files_come_from_porcelain_status() {
    let dir = TempDir::new().unwrap();
    let workdir = dir.path().join("repo");
    std::fs::create_dir_all(&workdir).unwrap();
    let run = |args: &[&str]| {
        let status = std::process::Command::new("git")
            .args(args)
            .current_dir(&workdir)
            .status()
            .unwrap();
        assert!(status.success());
    };
    run(&["init", "-q"]);
    run(&["config", "user.name", "t"]);
    run(&["config", "user.email", "t@example.com"]);
    std::fs::write(workdir.join("a.txt"), "x").unwrap();
    run(&["add", "."]);
    run(&["commit", "-q", "-m", "init"]);

    // The "agent" edits a tracked file and adds a new one.
    let script = r#"#!/bin/sh
cat > /dev/null
echo changed >> a.txt
echo new > b.txt
echo '{"type":"final","success":true}'
"#;
    let env = env_with_agent(
        script,
        &dir,
        Duration::from_secs(10),
        Duration::from_secs(30),
    );
    let adapter = AgentAdapter::new(&env);

    let outcome = adapter.run(&request(workdir), None).await.unwrap();
    let mut files = outcome.modified_files.clone();
    files.sort();
    assert_eq!(files, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
}
