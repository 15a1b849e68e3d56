// SPDX-License-Identifier: MIT OR Apache-2.0
//! The job queue and worker pool: the glue between [`crate::OrchestratorService::start_job`]
//! and [`crate::Executor::run`].
//!
//! The core depends only on a [`JobQueue`] trait. [`InProcessJobQueue`] is the
//! reference implementation, backed by a `tokio::sync::mpsc` channel and
//! driven by a bounded pool of `tokio::task::JoinHandle` workers.

use crate::executor::Executor;
use async_trait::async_trait;
use forge_core::ForgeError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// A unit of work handed from [`JobQueue::next`] to a worker.
#[derive(Debug, Clone, Copy)]
pub struct QueuedJob {
    /// The job to execute.
    pub job_id: Uuid,
    /// How many times this job has already been attempted (0 on first try).
    pub attempt: u32,
}

/// Opaque handle a worker hands back to [`JobQueue::ack`] once a job's
/// attempt has run to completion (successfully, terminally failed, or
/// requiring a retry).
#[derive(Debug)]
pub struct JobHandle {
    job: QueuedJob,
}

/// Queueing abstraction the worker pool depends on. [`InProcessJobQueue`] is
/// the only implementation today; the trait exists so an external broker
/// (e.g. a durable queue) could be swapped in without touching
/// [`WorkerPool`] or [`crate::OrchestratorService`].
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues a job for its first attempt. Returns an opaque task id
    /// surfaced on the `job.enqueued` event for observability.
    async fn submit(&self, job_id: Uuid) -> Result<String, ForgeError>;

    /// Re-enqueues a job for a retry attempt after a transient failure.
    async fn retry(&self, job: QueuedJob, delay: Duration) -> Result<(), ForgeError>;

    /// Pulls the next job a worker should run, waiting if the queue is
    /// empty. Returns `None` once the queue has been closed and drained.
    async fn next(&self) -> Option<JobHandle>;

    /// Acknowledges that a worker has finished processing `handle`'s
    /// attempt. The in-process implementation does not need this for
    /// correctness (the channel already dropped the item), but the trait
    /// carries it so a durable queue can commit an offset / delete a
    /// message here.
    async fn ack(&self, handle: JobHandle);
}

/// `tokio::sync::mpsc`-backed in-process [`JobQueue`].
///
/// Retries are scheduled by spawning a detached `tokio::time::sleep` task
/// that re-sends the job onto the same channel after the backoff elapses,
/// rather than blocking a worker slot while waiting.
pub struct InProcessJobQueue {
    sender: mpsc::Sender<QueuedJob>,
    receiver: Mutex<mpsc::Receiver<QueuedJob>>,
}

impl InProcessJobQueue {
    /// Builds a queue with the given channel capacity (number of jobs that
    /// may be buffered before `submit`/`retry` start backpressuring).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

impl Default for InProcessJobQueue {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl JobQueue for InProcessJobQueue {
    async fn submit(&self, job_id: Uuid) -> Result<String, ForgeError> {
        let task_id = Uuid::new_v4().to_string();
        self.sender
            .send(QueuedJob { job_id, attempt: 0 })
            .await
            .map_err(|_| ForgeError::Internal("job queue is closed".to_string()))?;
        Ok(task_id)
    }

    async fn retry(&self, job: QueuedJob, delay: Duration) -> Result<(), ForgeError> {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(job).await;
        });
        Ok(())
    }

    async fn next(&self) -> Option<JobHandle> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await.map(|job| JobHandle { job })
    }

    async fn ack(&self, _handle: JobHandle) {}
}

/// Worker pool tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    /// Number of concurrent worker tasks. Defaults to
    /// `std::thread::available_parallelism()` (falling back to 4).
    pub concurrency: usize,
    /// Maximum number of retries for transient agent errors. The distilled
    /// spec caps this at 2 (three attempts total).
    pub max_retries: u32,
    /// Backoff applied before each retry, indexed by retry number
    /// (`backoff_seconds[0]` before the first retry, and so on). The last
    /// entry is reused if there are more retries than entries.
    pub backoff_seconds: Vec<u64>,
    /// Hard kill deadline for one job's entire worker task, across all
    /// retries. Expiry force-fails the job with `job_execution_timeout`.
    pub job_hard_timeout_seconds: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4),
            max_retries: 2,
            backoff_seconds: vec![30, 120],
            job_hard_timeout_seconds: 1200,
        }
    }
}

impl WorkerPoolConfig {
    fn backoff_for(&self, retry_number: u32) -> Duration {
        let index = (retry_number.saturating_sub(1)) as usize;
        let seconds = self
            .backoff_seconds
            .get(index)
            .or_else(|| self.backoff_seconds.last())
            .copied()
            .unwrap_or(30);
        Duration::from_secs(seconds)
    }
}

/// Drives a bounded pool of workers pulling from a [`JobQueue`] and running
/// each job through an [`Executor`].
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    executor: Arc<Executor>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    /// Builds a pool over its collaborators. Call [`WorkerPool::spawn`] to
    /// start the worker tasks.
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>, executor: Arc<Executor>, config: WorkerPoolConfig) -> Self {
        Self {
            queue,
            executor,
            config,
        }
    }

    /// Spawns `config.concurrency` worker tasks, each looping
    /// `queue.next()` until the queue closes. Returns the join handles so
    /// the caller (typically `forge-daemon`'s composition root) can await
    /// graceful shutdown.
    pub fn spawn(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.config.concurrency.max(1))
            .map(|_| {
                let pool = Arc::clone(&self);
                tokio::spawn(async move { pool.run_worker_loop().await })
            })
            .collect()
    }

    async fn run_worker_loop(&self) {
        while let Some(handle) = self.queue.next().await {
            self.run_one(handle).await;
        }
    }

    async fn run_one(&self, handle: JobHandle) {
        let job = handle.job;
        let executor = Arc::clone(&self.executor);
        let deadline = Duration::from_secs(self.config.job_hard_timeout_seconds);

        let outcome = tokio::time::timeout(deadline, executor.run(job.job_id)).await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => self.handle_failure(job, error).await,
            Err(_elapsed) => {
                tracing::warn!(job_id = %job.job_id, "job hit its hard timeout");
                let _ = executor.force_timeout_failure(job.job_id).await;
            }
        }

        self.queue.ack(handle).await;
    }

    async fn handle_failure(&self, job: QueuedJob, error: ForgeError) {
        let retryable = matches!(error, ForgeError::TransientAgent(_));
        if !retryable || job.attempt >= self.config.max_retries {
            tracing::warn!(
                job_id = %job.job_id,
                attempt = job.attempt,
                retryable,
                error = %error,
                "job attempt ended without a retry"
            );
            return;
        }

        let next_attempt = job.attempt + 1;
        let delay = self.config.backoff_for(next_attempt);
        tracing::info!(
            job_id = %job.job_id,
            attempt = job.attempt,
            next_attempt,
            delay_seconds = delay.as_secs(),
            "scheduling retry for transient agent error"
        );
        let retry_job = QueuedJob {
            job_id: job.job_id,
            attempt: next_attempt,
        };
        if let Err(err) = self.queue.retry(retry_job, delay).await {
            tracing::error!(job_id = %job.job_id, error = %err, "failed to schedule retry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_then_next_round_trips_the_job_id() {
        let queue = InProcessJobQueue::new(8);
        let job_id = Uuid::new_v4();
        let task_id = queue.submit(job_id).await.unwrap();
        assert!(!task_id.is_empty());

        let handle = queue.next().await.expect("queue should yield the job");
        assert_eq!(handle.job.job_id, job_id);
        assert_eq!(handle.job.attempt, 0);
        queue.ack(handle).await;
    }

    #[tokio::test]
    async fn retry_redelivers_after_the_backoff() {
        let queue = InProcessJobQueue::new(8);
        let job_id = Uuid::new_v4();
        queue
            .retry(QueuedJob { job_id, attempt: 1 }, Duration::from_millis(20))
            .await
            .unwrap();

        let handle = tokio::time::timeout(Duration::from_secs(2), queue.next())
            .await
            .expect("should not time out")
            .expect("queue should yield the retried job");
        assert_eq!(handle.job.job_id, job_id);
        assert_eq!(handle.job.attempt, 1);
    }

    #[test]
    fn backoff_schedule_matches_the_documented_policy() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.backoff_for(1), Duration::from_secs(30));
        assert_eq!(config.backoff_for(2), Duration::from_secs(120));
        // Beyond the configured schedule, the last entry is reused.
        assert_eq!(config.backoff_for(3), Duration::from_secs(120));
    }

    #[test]
    fn default_config_caps_retries_at_two() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.max_retries, 2);
    }
}
