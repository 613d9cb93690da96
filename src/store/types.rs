use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle states of one task. Exactly one of the terminal states appears,
/// once, as the last history event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Queued,
    Processing,
    ClaudeExecution,
    PostProcessing,
    Completed,
    Failed,
    Skipped,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Skipped
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskState::Queued => "QUEUED",
            TaskState::Processing => "PROCESSING",
            TaskState::ClaudeExecution => "CLAUDE_EXECUTION",
            TaskState::PostProcessing => "POST_PROCESSING",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
            TaskState::Skipped => "SKIPPED",
        };
        f.write_str(name)
    }
}

/// What kind of work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    Issue,
    PrCommentsBatch,
}

/// Snapshot row created at enqueue time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub job_id: String,
    pub correlation_id: Uuid,
    pub repository: String,
    pub issue_number: u64,
    pub task_type: TaskType,
    pub model_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub initial_job_data: serde_json::Value,
}

/// Append-only history entry. Never mutated after write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHistoryEvent {
    pub history_id: u64,
    pub task_id: String,
    pub state: TaskState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// A task plus its computed current status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    #[serde(flatten)]
    pub record: TaskRecord,
    pub status: TaskState,
}

/// List filter for the query surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFilter {
    All,
    Active,
    Completed,
    Failed,
    Waiting,
}

impl TaskFilter {
    pub fn matches(&self, status: TaskState) -> bool {
        match self {
            TaskFilter::All => true,
            TaskFilter::Waiting => status == TaskState::Queued,
            TaskFilter::Active => matches!(
                status,
                TaskState::Processing | TaskState::ClaudeExecution | TaskState::PostProcessing
            ),
            TaskFilter::Completed => {
                matches!(status, TaskState::Completed | TaskState::Skipped)
            }
            TaskFilter::Failed => status == TaskState::Failed,
        }
    }
}

/// One agent invocation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: Uuid,
    pub task_id: String,
    pub history_id: Option<u64>,
    pub session_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub model: String,
    pub success: bool,
    pub num_turns: Option<u32>,
    pub cost_usd: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionDetailKind {
    Thought,
    ToolUse,
    ToolResult,
}

/// Ordered child stream of an execution. `(execution_id, seq)` is unique and
/// dense starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDetail {
    pub seq: u64,
    pub event_type: ExecutionDetailKind,
    pub content: Option<String>,
    pub tool_name: Option<String>,
    pub tool_input: Option<serde_json::Value>,
    pub result: Option<String>,
    pub is_error: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub status: TodoStatus,
    pub content: String,
}

/// Best-effort live view for the UI; loss never affects task correctness.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveDetails {
    pub todos: Vec<TodoItem>,
    pub current_task: Option<String>,
    pub events: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_serialize_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&TaskState::ClaudeExecution).unwrap(),
            "\"CLAUDE_EXECUTION\""
        );
        assert_eq!(
            serde_json::from_str::<TaskState>("\"POST_PROCESSING\"").unwrap(),
            TaskState::PostProcessing
        );
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Skipped.is_terminal());
        assert!(!TaskState::Processing.is_terminal());
    }

    #[test]
    fn filters_partition_states() {
        assert!(TaskFilter::Waiting.matches(TaskState::Queued));
        assert!(TaskFilter::Active.matches(TaskState::ClaudeExecution));
        assert!(TaskFilter::Completed.matches(TaskState::Skipped));
        assert!(TaskFilter::Failed.matches(TaskState::Failed));
        assert!(!TaskFilter::Active.matches(TaskState::Completed));
        assert!(TaskFilter::All.matches(TaskState::Queued));
    }
}
