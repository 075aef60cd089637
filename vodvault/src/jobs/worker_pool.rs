//! Worker pool serving one job queue.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::QueueName;
use super::client::JobClient;
use super::handler::{JobErrorHandler, JobHandler};
use crate::Error;
use crate::database::models::{JobDbModel, JobErrorRecord};
use crate::database::repositories::JobRepository;
use crate::database::time::now_ms;
use crate::panic_hook::panic_payload_to_string;

const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Delay before retrying after failed attempt number `attempt`: `attempt^4`
/// seconds, at most an hour.
pub fn retry_backoff(attempt: i64) -> Duration {
    let attempt = attempt.clamp(1, 100) as u64;
    Duration::from_secs(attempt.pow(4)).min(MAX_BACKOFF)
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub queue: QueueName,
    pub max_workers: usize,
    pub poll_interval: Duration,
}

/// Everything a worker needs to run and finalize attempts.
pub(crate) struct WorkerContext {
    pub repo: Arc<dyn JobRepository>,
    pub client: JobClient,
    pub handlers: HashMap<String, Arc<dyn JobHandler>>,
    pub error_handler: Arc<dyn JobErrorHandler>,
    /// Parent of every attempt token; cancelled on shutdown.
    pub root: CancellationToken,
}

enum Outcome {
    Completed,
    Cancelled,
    Failed(Error),
    Panicked(String),
}

pub struct WorkerPool {
    config: WorkerPoolConfig,
    semaphore: Arc<Semaphore>,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, parent: &CancellationToken) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_workers)),
            cancellation_token: parent.child_token(),
            config,
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    pub fn queue(&self) -> QueueName {
        self.config.queue
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }

    pub(crate) fn start(&self, ctx: Arc<WorkerContext>) {
        let queue = self.config.queue;
        let poll_interval = self.config.poll_interval;
        info!(queue = %queue, workers = self.config.max_workers, "Starting worker pool");

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            warn!(queue = %queue, "Worker pool already stopped");
            return;
        };

        for i in 0..self.config.max_workers {
            let semaphore = self.semaphore.clone();
            let cancellation_token = self.cancellation_token.clone();
            let ctx = ctx.clone();
            let notifier = ctx.client.notifier(queue);

            join_set.spawn(async move {
                debug!(queue = %queue, worker = i, "Worker started");
                loop {
                    if cancellation_token.is_cancelled() {
                        break;
                    }

                    let permit = match semaphore.clone().try_acquire_owned() {
                        Ok(p) => p,
                        Err(_) => {
                            tokio::time::sleep(poll_interval).await;
                            continue;
                        }
                    };

                    let job = match ctx.repo.claim_next(queue.as_ref(), now_ms()).await {
                        Ok(Some(job)) => job,
                        Ok(None) => {
                            drop(permit);
                            tokio::select! {
                                _ = cancellation_token.cancelled() => break,
                                _ = notifier.notified() => {}
                                _ = tokio::time::sleep(poll_interval) => {}
                            }
                            continue;
                        }
                        Err(e) => {
                            error!(queue = %queue, error = %e, "Failed to claim job");
                            drop(permit);
                            tokio::select! {
                                _ = cancellation_token.cancelled() => break,
                                _ = tokio::time::sleep(poll_interval) => {}
                            }
                            continue;
                        }
                    };

                    debug!(queue = %queue, worker = i, job_id = %job.id, kind = %job.kind, attempt = job.attempt, "Processing job");
                    execute(&ctx, job).await;
                    drop(permit);
                }
                debug!(queue = %queue, worker = i, "Worker stopped");
            });
        }
    }

    /// Cancel the workers and wait for in-flight attempts to finalize.
    pub async fn stop(&self) {
        info!(queue = %self.config.queue, "Stopping worker pool");
        self.cancellation_token.cancel();

        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };
        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }
        info!(queue = %self.config.queue, "Worker pool stopped");
    }
}

async fn execute(ctx: &WorkerContext, job: JobDbModel) {
    let Some(handler) = ctx.handlers.get(&job.kind).cloned() else {
        error!(job_id = %job.id, kind = %job.kind, "No handler registered for job kind");
        finalize(ctx, &job, Outcome::Failed(Error::Other(format!(
            "no handler registered for {}",
            job.kind
        ))))
        .await;
        return;
    };

    let token = ctx.client.attach(&job.id, &ctx.root);
    let timeout = handler.timeout();
    let attempt = AssertUnwindSafe(handler.run(&job, token)).catch_unwind();
    let result = tokio::time::timeout(timeout, attempt).await;
    ctx.client.detach(&job.id);

    let outcome = match result {
        Ok(Ok(Ok(()))) => Outcome::Completed,
        Ok(Ok(Err(Error::Cancelled))) => Outcome::Cancelled,
        Ok(Ok(Err(e))) => Outcome::Failed(e),
        Ok(Err(payload)) => Outcome::Panicked(
            panic_payload_to_string(payload.as_ref()).unwrap_or_else(|| "unknown panic".to_string()),
        ),
        Err(_) => Outcome::Failed(Error::Timeout(timeout)),
    };
    finalize(ctx, &job, outcome).await;
}

async fn finalize(ctx: &WorkerContext, job: &JobDbModel, outcome: Outcome) {
    let result = match outcome {
        Outcome::Completed => {
            debug!(job_id = %job.id, kind = %job.kind, "Job completed");
            ctx.repo.complete(&job.id, job.attempt).await
        }
        Outcome::Cancelled if ctx.root.is_cancelled() => {
            info!(job_id = %job.id, kind = %job.kind, "Job interrupted by shutdown, releasing");
            ctx.repo.release(&job.id, job.attempt).await
        }
        Outcome::Cancelled => {
            info!(job_id = %job.id, kind = %job.kind, "Job cancelled");
            ctx.repo.finalize_cancelled(&job.id, job.attempt).await
        }
        Outcome::Failed(error) => {
            let message = error.to_string();
            fail(ctx, job, &message, |ctx, job| async move {
                ctx.error_handler.handle_error(job, &error).await
            })
            .await
        }
        Outcome::Panicked(panic) => {
            let message = format!("panic: {panic}");
            fail(ctx, job, &message, |ctx, job| async move {
                ctx.error_handler.handle_panic(job, &panic).await
            })
            .await
        }
    };

    match result {
        Ok(true) => {}
        Ok(false) => debug!(
            job_id = %job.id,
            attempt = job.attempt,
            "Attempt already finalized elsewhere"
        ),
        Err(e) => error!(job_id = %job.id, error = %e, "Failed to finalize job"),
    }
}

/// Retry with backoff while attempts remain; otherwise discard and run
/// `on_discard` once.
async fn fail<'a, F, Fut>(
    ctx: &'a WorkerContext,
    job: &'a JobDbModel,
    message: &str,
    on_discard: F,
) -> crate::Result<bool>
where
    F: FnOnce(&'a WorkerContext, &'a JobDbModel) -> Fut,
    Fut: std::future::Future<Output = ()> + 'a,
{
    let record = JobErrorRecord {
        attempt: job.attempt,
        at: now_ms(),
        error: message.to_string(),
    };

    if job.attempts_remaining() {
        let delay = retry_backoff(job.attempt);
        warn!(
            job_id = %job.id,
            kind = %job.kind,
            attempt = job.attempt,
            max_attempts = job.max_attempts,
            retry_in_secs = delay.as_secs(),
            error = message,
            "Job attempt failed"
        );
        let scheduled_at = now_ms() + delay.as_millis() as i64;
        return ctx.repo.retry(&job.id, job.attempt, scheduled_at, &record).await;
    }

    error!(
        job_id = %job.id,
        kind = %job.kind,
        attempt = job.attempt,
        error = message,
        "Job failed permanently"
    );
    let discarded = ctx.repo.discard(&job.id, job.attempt, &record).await?;
    if discarded {
        on_discard(ctx, job).await;
    }
    Ok(discarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 1)]
    #[case(2, 16)]
    #[case(3, 81)]
    #[case(5, 625)]
    #[case(7, 2401)]
    #[case(8, 3600)]
    #[case(25, 3600)]
    fn test_retry_backoff(#[case] attempt: i64, #[case] secs: u64) {
        assert_eq!(retry_backoff(attempt), Duration::from_secs(secs));
    }
}
