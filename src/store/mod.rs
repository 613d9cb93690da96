pub mod types;

pub use types::{
    ExecutionDetail, ExecutionDetailKind, ExecutionRecord, LiveDetails, TaskFilter,
    TaskHistoryEvent, TaskRecord, TaskSnapshot, TaskState, TaskType, TodoItem, TodoStatus,
};

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use tracing::{debug, warn};

/// Raw task artifacts (logs, diffs, output) live for a week; history stays.
const BLOB_TTL_SECS: u64 = 7 * 24 * 3600;
/// Duplicate command suppression window for `append_event`.
const DEDUPE_WINDOW_MS: i64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Authoritative record of task lifecycles plus the best-effort live layer.
///
/// Key layout (all opaque to other components):
/// `task:{id}` snapshot, `task:{id}:history` append-only list,
/// `task:{id}:execution:{eid}` + `:details`, `task:{id}:logs|:diff|:output`
/// (7-day TTL), `system:status:daemons` heartbeat map, and pub/sub channels
/// `task-log:{id}`, `task-diff:{id}`, `task-status:{id}`.
#[derive(Clone)]
pub struct TaskStateStore {
    redis: ConnectionManager,
}

impl TaskStateStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self { redis })
    }

    // ---- commands ------------------------------------------------------

    /// Create the task snapshot if absent. Safe to call from both the daemon
    /// (at enqueue) and the worker (at dequeue).
    pub async fn create_task(&self, record: &TaskRecord) -> Result<bool, StoreError> {
        let mut con = self.redis.clone();
        let key = format!("task:{}", record.task_id);
        let created: bool = con.set_nx(&key, serde_json::to_string(record)?).await?;
        if created {
            let _: () = con
                .zadd(
                    "tasks:index",
                    &record.task_id,
                    record.created_at.timestamp_millis(),
                )
                .await?;
            debug!(task_id = %record.task_id, "task created");
        }
        Ok(created)
    }

    /// Append a history event. Returns the monotonic history id. A repeat of
    /// the same state within one second is treated as a duplicate command and
    /// returns the existing id without writing.
    pub async fn append_event(
        &self,
        task_id: &str,
        state: TaskState,
        reason: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<u64, StoreError> {
        let mut con = self.redis.clone();
        let history_key = format!("task:{task_id}:history");
        let now = Utc::now();

        if let Some(last_raw) = con
            .lindex::<_, Option<String>>(&history_key, -1)
            .await?
        {
            if let Ok(last) = serde_json::from_str::<TaskHistoryEvent>(&last_raw) {
                let within_window =
                    (now - last.timestamp).num_milliseconds().abs() < DEDUPE_WINDOW_MS;
                if last.state == state && within_window {
                    return Ok(last.history_id);
                }
            }
        }

        let history_id: u64 = con.incr(format!("task:{task_id}:history:seq"), 1).await?;
        let event = TaskHistoryEvent {
            history_id,
            task_id: task_id.to_string(),
            state,
            timestamp: now,
            reason,
            metadata,
        };
        let _: () = con
            .rpush(&history_key, serde_json::to_string(&event)?)
            .await?;

        self.publish_status(task_id, &event).await;
        Ok(history_id)
    }

    pub async fn record_execution_start(
        &self,
        record: &ExecutionRecord,
    ) -> Result<(), StoreError> {
        let mut con = self.redis.clone();
        let key = format!(
            "task:{}:execution:{}",
            record.task_id, record.execution_id
        );
        let _: () = con.set(&key, serde_json::to_string(record)?).await?;
        Ok(())
    }

    /// Append one execution detail, assigning the next dense sequence number
    /// (starting at 1).
    pub async fn append_execution_detail(
        &self,
        task_id: &str,
        execution_id: &uuid::Uuid,
        kind: ExecutionDetailKind,
        content: Option<String>,
        tool_name: Option<String>,
        tool_input: Option<serde_json::Value>,
        result: Option<String>,
        is_error: bool,
    ) -> Result<u64, StoreError> {
        let mut con = self.redis.clone();
        let seq: u64 = con
            .incr(format!("task:{task_id}:execution:{execution_id}:seq"), 1)
            .await?;
        let detail = ExecutionDetail {
            seq,
            event_type: kind,
            content,
            tool_name,
            tool_input,
            result,
            is_error,
            timestamp: Utc::now(),
        };
        let _: () = con
            .rpush(
                format!("task:{task_id}:execution:{execution_id}:details"),
                serde_json::to_string(&detail)?,
            )
            .await?;
        Ok(seq)
    }

    pub async fn record_execution_end(
        &self,
        record: &ExecutionRecord,
    ) -> Result<(), StoreError> {
        // Same key as start; the finished record replaces it whole.
        self.record_execution_start(record).await
    }

    // ---- queries -------------------------------------------------------

    pub async fn get_task(&self, task_id: &str) -> Result<Option<TaskSnapshot>, StoreError> {
        let mut con = self.redis.clone();
        let raw: Option<String> = con.get(format!("task:{task_id}")).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let record: TaskRecord = serde_json::from_str(&raw)?;
        let status = self
            .last_event(task_id)
            .await?
            .map(|e| e.state)
            .unwrap_or(TaskState::Queued);
        Ok(Some(TaskSnapshot { record, status }))
    }

    pub async fn get_history(&self, task_id: &str) -> Result<Vec<TaskHistoryEvent>, StoreError> {
        let mut con = self.redis.clone();
        let raw: Vec<String> = con.lrange(format!("task:{task_id}:history"), 0, -1).await?;
        raw.iter()
            .map(|r| serde_json::from_str(r).map_err(StoreError::from))
            .collect()
    }

    async fn last_event(&self, task_id: &str) -> Result<Option<TaskHistoryEvent>, StoreError> {
        let mut con = self.redis.clone();
        let raw: Option<String> = con.lindex(format!("task:{task_id}:history"), -1).await?;
        Ok(raw.and_then(|r| serde_json::from_str(&r).ok()))
    }

    /// Newest-first task listing with status computed from the last event.
    pub async fn list_tasks(
        &self,
        filter: TaskFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TaskSnapshot>, StoreError> {
        let mut con = self.redis.clone();
        let ids: Vec<String> = con.zrevrange("tasks:index", 0, -1).await?;

        let mut matched = Vec::new();
        for id in ids {
            if let Some(snapshot) = self.get_task(&id).await? {
                if filter.matches(snapshot.status) {
                    matched.push(snapshot);
                }
            }
            if matched.len() >= offset + limit {
                break;
            }
        }
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    // ---- blobs (7-day TTL) ---------------------------------------------

    pub async fn save_output(&self, task_id: &str, output: &str) -> Result<(), StoreError> {
        let mut con = self.redis.clone();
        let _: () = con
            .set_ex(format!("task:{task_id}:output"), output, BLOB_TTL_SECS)
            .await?;
        Ok(())
    }

    pub async fn save_diff(&self, task_id: &str, diff: &str) -> Result<(), StoreError> {
        let mut con = self.redis.clone();
        let _: () = con
            .set_ex(format!("task:{task_id}:diff"), diff, BLOB_TTL_SECS)
            .await?;
        self.publish(&format!("task-diff:{task_id}"), diff).await;
        Ok(())
    }

    pub async fn append_log(&self, task_id: &str, line: &str) -> Result<(), StoreError> {
        let mut con = self.redis.clone();
        let key = format!("task:{task_id}:logs");
        let _: () = con.rpush(&key, line).await?;
        let _: () = con.expire(&key, BLOB_TTL_SECS as i64).await?;
        self.publish(&format!("task-log:{task_id}"), line).await;
        Ok(())
    }

    // ---- live layer (best-effort) --------------------------------------

    pub async fn set_live_details(
        &self,
        task_id: &str,
        details: &LiveDetails,
    ) -> Result<(), StoreError> {
        let mut con = self.redis.clone();
        let payload = serde_json::to_string(details)?;
        let _: () = con
            .set_ex(format!("task:{task_id}:live-details"), &payload, BLOB_TTL_SECS)
            .await?;
        self.publish(&format!("task-status:{task_id}"), &payload)
            .await;
        Ok(())
    }

    async fn publish_status(&self, task_id: &str, event: &TaskHistoryEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            self.publish(&format!("task-status:{task_id}"), &payload)
                .await;
        }
    }

    /// Live publishes are best-effort: a failure is logged and swallowed.
    async fn publish(&self, channel: &str, payload: &str) {
        let mut con = self.redis.clone();
        if let Err(e) = con.publish::<_, _, ()>(channel, payload).await {
            warn!(channel, error = %e, "live publish dropped");
        }
    }

    // ---- daemon heartbeats ---------------------------------------------

    pub async fn heartbeat<T: Serialize>(
        &self,
        daemon_id: &str,
        payload: &T,
        ttl: std::time::Duration,
    ) -> Result<(), StoreError> {
        let mut con = self.redis.clone();
        let _: () = con
            .hset(
                "system:status:daemons",
                daemon_id,
                serde_json::to_string(payload)?,
            )
            .await?;
        let _: () = con
            .expire("system:status:daemons", ttl.as_secs() as i64)
            .await?;
        Ok(())
    }

    pub async fn remove_heartbeat(&self, daemon_id: &str) -> Result<(), StoreError> {
        let mut con = self.redis.clone();
        let _: () = con.hdel("system:status:daemons", daemon_id).await?;
        Ok(())
    }

    // ---- follow-up watermarks ------------------------------------------

    fn comment_watermark_key(owner: &str, repo: &str, pr_number: u64) -> String {
        format!("pr:{owner}-{repo}-{pr_number}:last-handled-comment-at")
    }

    pub async fn last_handled_comment_at(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let mut con = self.redis.clone();
        let raw: Option<String> = con
            .get(Self::comment_watermark_key(owner, repo, pr_number))
            .await?;
        Ok(raw.and_then(|r| r.parse().ok()))
    }

    pub async fn set_last_handled_comment_at(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut con = self.redis.clone();
        let _: () = con
            .set(
                Self::comment_watermark_key(owner, repo, pr_number),
                at.to_rfc3339(),
            )
            .await?;
        Ok(())
    }
}
