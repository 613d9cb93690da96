pub mod job;
pub mod worker;

pub use job::{Job, JobPayload};
pub use worker::{JobHandler, WorkerPool};

use std::time::Duration;

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

/// Dequeue blocks for this long before re-checking for shutdown.
const DEQUEUE_BLOCK: Duration = Duration::from_secs(30);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF_DELAY: Duration = Duration::from_secs(2);
const BACKOFF_CAP: Duration = Duration::from_secs(600);

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error("malformed job payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("job {0} missing from queue store")]
    MissingJob(String),
}

/// Result of an idempotent add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// The job id is already waiting, active or delayed; the add was dropped.
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct AddOptions {
    pub attempts: u32,
    pub backoff_delay: Duration,
    /// Delay first delivery; the job parks in the delayed set until due.
    pub delay: Option<Duration>,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_delay: DEFAULT_BACKOFF_DELAY,
            delay: None,
        }
    }
}

/// Durable FIFO job queue over Redis.
///
/// Jobs are hashes under `job:{id}`; ids travel through the `wait` list, the
/// `active` list (BRPOPLPUSH destination) and the `delayed` zset (score =
/// ready-at millis). An add while the id is live is a no-op; a terminal job
/// releases its id for future adds. Failed jobs keep their payload in the
/// `failed` set until an admin clears them.
#[derive(Clone)]
pub struct TaskQueue {
    redis: ConnectionManager,
    name: String,
}

impl TaskQueue {
    pub async fn connect(redis_url: &str, name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self {
            redis,
            name: name.to_string(),
        })
    }

    fn key(&self, suffix: &str) -> String {
        format!("gitfix:queue:{}:{}", self.name, suffix)
    }

    fn job_key(&self, id: &str) -> String {
        self.key(&format!("job:{id}"))
    }

    /// Idempotent enqueue: one atomic script checks liveness and inserts.
    pub async fn add(&self, payload: &JobPayload, options: AddOptions) -> Result<AddOutcome, QueueError> {
        let id = payload.job_id();
        let data = serde_json::to_string(payload)?;
        let now_ms = Utc::now().timestamp_millis();

        // KEYS: job hash, wait list, delayed zset.
        // ARGV: id, data, max_attempts, backoff_ms, now_ms, delay_ms.
        let script = redis::Script::new(
            r#"
            local state = redis.call('HGET', KEYS[1], 'state')
            if state == 'waiting' or state == 'active' or state == 'delayed' then
                return 0
            end
            redis.call('DEL', KEYS[1])
            redis.call('HSET', KEYS[1],
                'data', ARGV[2],
                'attempts_made', 0,
                'max_attempts', ARGV[3],
                'backoff_ms', ARGV[4],
                'enqueued_at', ARGV[5],
                'progress', 0)
            local delay = tonumber(ARGV[6])
            if delay > 0 then
                redis.call('HSET', KEYS[1], 'state', 'delayed')
                redis.call('ZADD', KEYS[3], tonumber(ARGV[5]) + delay, ARGV[1])
            else
                redis.call('HSET', KEYS[1], 'state', 'waiting')
                redis.call('LPUSH', KEYS[2], ARGV[1])
            end
            return 1
            "#,
        );

        let mut con = self.redis.clone();
        let added: i32 = script
            .key(self.job_key(&id))
            .key(self.key("wait"))
            .key(self.key("delayed"))
            .arg(&id)
            .arg(&data)
            .arg(options.attempts)
            .arg(options.backoff_delay.as_millis() as u64)
            .arg(now_ms)
            .arg(options.delay.map(|d| d.as_millis() as u64).unwrap_or(0))
            .invoke_async(&mut con)
            .await?;

        if added == 1 {
            debug!(job_id = %id, "job enqueued");
            Ok(AddOutcome::Added)
        } else {
            debug!(job_id = %id, "duplicate enqueue dropped");
            Ok(AddOutcome::Duplicate)
        }
    }

    /// Move due delayed jobs back to the wait list.
    async fn promote_due(&self) -> Result<(), QueueError> {
        let script = redis::Script::new(
            r#"
            local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 100)
            for _, id in ipairs(due) do
                redis.call('ZREM', KEYS[1], id)
                redis.call('LPUSH', KEYS[2], id)
                redis.call('HSET', KEYS[3] .. id, 'state', 'waiting')
            end
            return #due
            "#,
        );
        let mut con = self.redis.clone();
        let _promoted: i32 = script
            .key(self.key("delayed"))
            .key(self.key("wait"))
            .key(self.key("job:"))
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut con)
            .await?;
        Ok(())
    }

    /// Blocking dequeue (up to 30s). `None` means the wait timed out.
    pub async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        self.promote_due().await?;

        let mut con = self.redis.clone();
        let id: Option<String> = con
            .brpoplpush(
                self.key("wait"),
                self.key("active"),
                DEQUEUE_BLOCK.as_secs_f64(),
            )
            .await?;
        let Some(id) = id else {
            return Ok(None);
        };

        let job_key = self.job_key(&id);
        let (data, attempts_made, max_attempts): (Option<String>, Option<u32>, Option<u32>) =
            redis::pipe()
                .hget(&job_key, "data")
                .hget(&job_key, "attempts_made")
                .hget(&job_key, "max_attempts")
                .query_async(&mut con)
                .await?;
        let Some(data) = data else {
            // Orphaned id (obliterated mid-flight); drop it from active.
            let _: () = con.lrem(self.key("active"), 0, &id).await?;
            return Err(QueueError::MissingJob(id));
        };
        let _: () = con.hset(&job_key, "state", "active").await?;

        Ok(Some(Job {
            id,
            payload: serde_json::from_str(&data)?,
            attempts_made: attempts_made.unwrap_or(0),
            max_attempts: max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
        }))
    }

    /// Ack a finished job: the id leaves the live set entirely, so a future
    /// add with the same id is accepted.
    pub async fn complete(&self, job: &Job) -> Result<(), QueueError> {
        let mut con = self.redis.clone();
        let _: () = redis::pipe()
            .lrem(self.key("active"), 0, &job.id)
            .del(self.job_key(&job.id))
            .query_async(&mut con)
            .await?;
        debug!(job_id = %job.id, "job completed");
        Ok(())
    }

    /// Record a failed delivery: reschedule with exponential backoff while
    /// attempts remain, otherwise park in the failed set with payload intact.
    pub async fn fail(&self, job: &Job, error: &str) -> Result<(), QueueError> {
        let attempts_made = job.attempts_made + 1;
        let mut con = self.redis.clone();
        let job_key = self.job_key(&job.id);

        if attempts_made < job.max_attempts {
            let backoff_ms: u64 = con.hget(&job_key, "backoff_ms").await.unwrap_or(2_000);
            let delay = backoff_delay(Duration::from_millis(backoff_ms), attempts_made);
            let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
            let _: () = redis::pipe()
                .lrem(self.key("active"), 0, &job.id)
                .hset(&job_key, "attempts_made", attempts_made)
                .hset(&job_key, "state", "delayed")
                .hset(&job_key, "last_error", error)
                .zadd(self.key("delayed"), &job.id, ready_at)
                .query_async(&mut con)
                .await?;
            warn!(
                job_id = %job.id,
                attempts_made,
                delay_ms = delay.as_millis() as u64,
                "job failed, rescheduled"
            );
        } else {
            let _: () = redis::pipe()
                .lrem(self.key("active"), 0, &job.id)
                .hset(&job_key, "attempts_made", attempts_made)
                .hset(&job_key, "state", "failed")
                .hset(&job_key, "last_error", error)
                .sadd(self.key("failed"), &job.id)
                .query_async(&mut con)
                .await?;
            warn!(job_id = %job.id, attempts_made, "job failed permanently");
        }
        Ok(())
    }

    pub async fn update_progress(&self, job_id: &str, progress: u8) -> Result<(), QueueError> {
        let mut con = self.redis.clone();
        let _: () = con
            .hset(self.job_key(job_id), "progress", progress.min(100))
            .await?;
        Ok(())
    }

    /// Requeue everything stuck in `active` (a worker died mid-job).
    pub async fn recover_stalled(&self) -> Result<usize, QueueError> {
        let mut con = self.redis.clone();
        let stalled: Vec<String> = con.lrange(self.key("active"), 0, -1).await?;
        for id in &stalled {
            let _: () = redis::pipe()
                .lrem(self.key("active"), 0, id)
                .lpush(self.key("wait"), id)
                .hset(self.job_key(id), "state", "waiting")
                .query_async(&mut con)
                .await?;
        }
        if !stalled.is_empty() {
            info!(count = stalled.len(), "stalled jobs recovered");
        }
        Ok(stalled.len())
    }

    /// Drop waiting and delayed jobs. Active jobs finish normally.
    pub async fn drain(&self) -> Result<(), QueueError> {
        let mut con = self.redis.clone();
        let waiting: Vec<String> = con.lrange(self.key("wait"), 0, -1).await?;
        let delayed: Vec<String> = con.zrange(self.key("delayed"), 0, -1).await?;
        let mut pipe = redis::pipe();
        pipe.del(self.key("wait")).del(self.key("delayed"));
        for id in waiting.iter().chain(delayed.iter()) {
            pipe.del(self.job_key(id));
        }
        let _: () = pipe.query_async(&mut con).await?;
        info!(
            waiting = waiting.len(),
            delayed = delayed.len(),
            "queue drained"
        );
        Ok(())
    }

    /// Remove every key belonging to this queue, including failed payloads.
    pub async fn obliterate(&self) -> Result<(), QueueError> {
        let mut con = self.redis.clone();
        let pattern = self.key("*");
        let mut keys: Vec<String> = Vec::new();
        {
            let mut iter = con.scan_match::<_, String>(&pattern).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }
        if !keys.is_empty() {
            let _: () = con.del(&keys).await?;
        }
        info!(keys = keys.len(), "queue obliterated");
        Ok(())
    }

    /// Waiting/active/delayed/failed depths, for heartbeats and admin.
    pub async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let mut con = self.redis.clone();
        let (waiting, active, delayed, failed): (usize, usize, usize, usize) = redis::pipe()
            .llen(self.key("wait"))
            .llen(self.key("active"))
            .zcard(self.key("delayed"))
            .scard(self.key("failed"))
            .query_async(&mut con)
            .await?;
        Ok(QueueCounts {
            waiting,
            active,
            delayed,
            failed,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub failed: usize,
}

/// Exponential backoff for delivery `attempt` (1-based), capped.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    std::cmp::min(base.saturating_mul(factor), BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(8));
    }

    #[test]
    fn backoff_is_capped() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff_delay(base, 30), BACKOFF_CAP);
    }
}
