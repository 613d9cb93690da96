use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::shutdown::{ShutdownSignal, SHUTDOWN_GRACE};

use super::{Job, QueueError, TaskQueue};

/// One consumer of dequeued jobs. The pipeline implements this.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process one job. `Err` counts as a failed delivery and the queue
    /// reschedules or parks the job; `Ok` acks it.
    async fn handle(&self, job: Job) -> anyhow::Result<()>;
}

/// Bounded-parallelism consumer loop over the task queue.
pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(queue: Arc<TaskQueue>, concurrency: usize) -> Self {
        Self {
            queue,
            concurrency: concurrency.max(1),
        }
    }

    /// Consume until shutdown: stop intake, give in-flight tasks the grace
    /// period, then abort whatever is left.
    pub async fn run(
        &self,
        handler: Arc<dyn JobHandler>,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), QueueError> {
        self.queue.recover_stalled().await?;

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut in_flight: JoinSet<()> = JoinSet::new();
        info!(concurrency = self.concurrency, "worker pool started");

        loop {
            // Reap finished tasks without blocking intake.
            while in_flight.try_join_next().is_some() {}

            if shutdown.is_cancelled() {
                break;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => {
                    permit.expect("semaphore closed")
                }
                _ = shutdown.cancelled() => break,
            };

            let job = tokio::select! {
                result = self.queue.dequeue() => match result {
                    Ok(Some(job)) => job,
                    Ok(None) => continue,
                    Err(QueueError::MissingJob(id)) => {
                        warn!(job_id = %id, "dropped orphaned job id");
                        continue;
                    }
                    Err(e) => {
                        error!(error = %e, "dequeue failed, backing off");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                },
                _ = shutdown.cancelled() => break,
            };

            let queue = Arc::clone(&self.queue);
            let handler = Arc::clone(&handler);
            in_flight.spawn(async move {
                let _permit = permit;
                let job_id = job.id.clone();
                match handler.handle(job.clone()).await {
                    Ok(()) => {
                        if let Err(e) = queue.complete(&job).await {
                            error!(job_id = %job_id, error = %e, "failed to ack job");
                        }
                    }
                    Err(e) => {
                        error!(job_id = %job_id, error = %format!("{e:#}"), "job failed");
                        if let Err(e) = queue.fail(&job, &format!("{e:#}")).await {
                            error!(job_id = %job_id, error = %e, "failed to record job failure");
                        }
                    }
                }
            });
        }

        info!(
            in_flight = in_flight.len(),
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "shutdown requested, draining in-flight tasks"
        );
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = in_flight.len(),
                "grace period elapsed, force-cancelling remaining tasks"
            );
            in_flight.abort_all();
            while in_flight.join_next().await.is_some() {}
        }
        info!("worker pool stopped");
        Ok(())
    }
}
