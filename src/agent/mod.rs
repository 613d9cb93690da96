pub mod events;

pub use events::{AgentEvent, FinalResult};

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::EnvConfig;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("failed to spawn agent process: {0}")]
    SpawnFailed(std::io::Error),
    #[error("agent exceeded the {0:?} wall-clock budget")]
    TimedOut(Duration),
    #[error("agent produced no output for {0:?}")]
    Stalled(Duration),
    #[error("agent crashed: exit code {exit_code:?}, no final record")]
    Crashed { exit_code: Option<i32> },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One agent invocation request.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    pub worktree_path: PathBuf,
    pub repo_owner: String,
    pub repo_name: String,
    pub issue_number: u64,
    pub github_token: String,
}

/// What came back from a finished (non-crashed) run. `final_result.success`
/// is the only authority on success.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub final_result: FinalResult,
    pub events: Vec<AgentEvent>,
    pub modified_files: Vec<PathBuf>,
    pub execution_time: Duration,
    /// Full stdout up to the configured byte cap; forwarding continues past
    /// the cap but buffering stops.
    pub raw_output: String,
    pub output_truncated: bool,
}

/// Spawns the external coding agent and normalizes its stdout stream.
pub struct AgentAdapter {
    command: String,
    wall_timeout: Duration,
    idle_timeout: Duration,
    output_cap_bytes: usize,
}

impl AgentAdapter {
    pub fn new(env: &EnvConfig) -> Self {
        Self {
            command: env.agent_command.clone(),
            wall_timeout: env.agent_timeout,
            idle_timeout: env.agent_idle_timeout,
            output_cap_bytes: env.agent_output_cap_bytes,
        }
    }

    /// Run the agent to completion. Events are forwarded to `events_tx` as
    /// they arrive (live layer); the full ordered list is also returned.
    pub async fn run(
        &self,
        request: &AgentRequest,
        events_tx: Option<mpsc::UnboundedSender<AgentEvent>>,
    ) -> Result<AgentOutcome, AgentError> {
        let started = Instant::now();
        let mut child = self.spawn(request)?;

        // Prompt goes to stdin, then EOF.
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.prompt.as_bytes())
                .await
                .map_err(AgentError::Io)?;
            stdin.shutdown().await.map_err(AgentError::Io)?;
        }

        let Some(stdout) = child.stdout.take() else {
            return Err(AgentError::Io(std::io::Error::other(
                "agent stdout not captured",
            )));
        };
        let mut lines = BufReader::new(stdout).lines();

        let deadline = started + self.wall_timeout;
        let mut events: Vec<AgentEvent> = Vec::new();
        let mut final_result: Option<FinalResult> = None;
        let mut raw_output = String::new();
        let mut output_truncated = false;

        loop {
            let now = Instant::now();
            if now >= deadline {
                self.kill_tree(&mut child).await;
                return Err(AgentError::TimedOut(self.wall_timeout));
            }
            let step = std::cmp::min(deadline - now, self.idle_timeout);

            match tokio::time::timeout(step, lines.next_line()).await {
                Err(_) => {
                    self.kill_tree(&mut child).await;
                    if Instant::now() >= deadline {
                        return Err(AgentError::TimedOut(self.wall_timeout));
                    }
                    return Err(AgentError::Stalled(self.idle_timeout));
                }
                Ok(Ok(None)) => break, // EOF
                Ok(Err(e)) => {
                    warn!(error = %e, "agent stdout read error, treating as end of stream");
                    break;
                }
                Ok(Ok(Some(line))) => {
                    if raw_output.len() < self.output_cap_bytes {
                        raw_output.push_str(&line);
                        raw_output.push('\n');
                    } else {
                        output_truncated = true;
                    }

                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<AgentEvent>(trimmed) {
                        Ok(event) => {
                            if let AgentEvent::Final(result) = &event {
                                final_result = Some(result.clone());
                            }
                            if let Some(tx) = &events_tx {
                                let _ = tx.send(event.clone());
                            }
                            events.push(event);
                        }
                        Err(e) => {
                            debug!(error = %e, line = trimmed, "skipping unparseable agent output");
                        }
                    }
                }
            }
        }

        let status = match tokio::time::timeout(Duration::from_secs(30), child.wait()).await {
            Ok(status) => status.map_err(AgentError::Io)?,
            Err(_) => {
                self.kill_tree(&mut child).await;
                return Err(AgentError::TimedOut(self.wall_timeout));
            }
        };

        let final_result = match final_result {
            Some(result) => result,
            // A stream without the final record is a crash regardless of the
            // exit code; only `final` is authoritative.
            None => {
                return Err(AgentError::Crashed {
                    exit_code: status.code(),
                })
            }
        };

        let modified_files = self.modified_files(&request.worktree_path).await;
        let execution_time = started.elapsed();
        info!(
            success = final_result.success,
            num_turns = ?final_result.num_turns,
            modified = modified_files.len(),
            elapsed_secs = execution_time.as_secs(),
            "agent run finished"
        );

        Ok(AgentOutcome {
            final_result,
            events,
            modified_files,
            execution_time,
            raw_output,
            output_truncated,
        })
    }

    fn spawn(&self, request: &AgentRequest) -> Result<Child, AgentError> {
        let mut command = Command::new(&self.command);
        command
            .current_dir(&request.worktree_path)
            .env_clear()
            .env("GH_TOKEN", &request.github_token)
            .env("REPO_OWNER", &request.repo_owner)
            .env("REPO_NAME", &request.repo_name)
            .env("ISSUE_NUMBER", request.issue_number.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // Minimal environment: the agent gets the repo coordinates, a token,
        // and just enough of the host to run its own tooling.
        for inherited in ["PATH", "HOME", "LANG", "TMPDIR"] {
            if let Ok(value) = std::env::var(inherited) {
                command.env(inherited, value);
            }
        }

        // Own process group so the whole tree can be killed on timeout.
        #[cfg(unix)]
        command.process_group(0);

        command.spawn().map_err(AgentError::SpawnFailed)
    }

    /// Kill the agent and everything it spawned.
    async fn kill_tree(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            let _ = std::process::Command::new("kill")
                .args(["-KILL", "--", &format!("-{pid}")])
                .output();
        }
        if let Err(e) = child.kill().await {
            warn!(error = %e, "failed to kill agent process");
        }
    }

    /// Whatever the agent left dirty in the worktree, per porcelain status.
    async fn modified_files(&self, worktree: &Path) -> Vec<PathBuf> {
        let output = Command::new("git")
            .args(["status", "--porcelain"])
            .current_dir(worktree)
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter(|l| l.len() > 3)
                .map(|l| PathBuf::from(l[3..].trim()))
                .collect(),
            _ => Vec::new(),
        }
    }
}
