//! Job runtime: one worker pool per queue over a shared handler table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use strum::IntoEnumIterator;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::client::JobClient;
use super::handler::{JobErrorHandler, JobHandler, NoopErrorHandler};
use super::worker_pool::{WorkerContext, WorkerPool, WorkerPoolConfig};
use super::{ARCHIVE_TAG, QueueName};
use crate::Result;
use crate::config::WorkerCounts;

pub struct JobRuntimeBuilder {
    client: JobClient,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    error_handler: Arc<dyn JobErrorHandler>,
    workers: WorkerCounts,
    poll_interval: Duration,
}

impl JobRuntimeBuilder {
    pub fn handler(mut self, kind: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(kind.into(), handler);
        self
    }

    pub fn error_handler(mut self, handler: Arc<dyn JobErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    pub fn workers(mut self, workers: WorkerCounts) -> Self {
        self.workers = workers;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Recover orphaned attempts and start the worker pools.
    ///
    /// Running jobs without the archive tag belong to a previous process and
    /// are made claimable again. Archive jobs are left to the watchdog, which
    /// sees their stale heartbeat.
    pub async fn start(self) -> Result<JobRuntime> {
        let repo = self.client.repository().clone();
        let requeued = repo.requeue_running_without_tag(ARCHIVE_TAG).await?;
        if requeued > 0 {
            warn!(count = requeued, "Requeued jobs orphaned by a previous run");
        }

        let root = CancellationToken::new();
        let ctx = Arc::new(WorkerContext {
            repo,
            client: self.client.clone(),
            handlers: self.handlers,
            error_handler: self.error_handler,
            root: root.clone(),
        });

        let pools: Vec<WorkerPool> = QueueName::iter()
            .filter_map(|queue| {
                let max_workers = queue.workers(&self.workers);
                if max_workers == 0 {
                    warn!(queue = %queue, "Queue has no workers configured");
                    return None;
                }
                let pool = WorkerPool::new(
                    WorkerPoolConfig {
                        queue,
                        max_workers,
                        poll_interval: self.poll_interval,
                    },
                    &root,
                );
                pool.start(ctx.clone());
                Some(pool)
            })
            .collect();

        info!(pools = pools.len(), kinds = ctx.handlers.len(), "Job runtime started");
        Ok(JobRuntime {
            client: self.client,
            pools,
            root,
        })
    }
}

pub struct JobRuntime {
    client: JobClient,
    pools: Vec<WorkerPool>,
    root: CancellationToken,
}

impl JobRuntime {
    pub fn builder(client: JobClient) -> JobRuntimeBuilder {
        JobRuntimeBuilder {
            client,
            handlers: HashMap::new(),
            error_handler: Arc::new(NoopErrorHandler),
            workers: WorkerCounts {
                default: 1,
                video_download: 1,
                video_postprocess: 1,
                chat_render: 1,
            },
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn client(&self) -> &JobClient {
        &self.client
    }

    /// Cancel every in-flight attempt and wait until all are finalized.
    pub async fn shutdown(&self) {
        info!("Shutting down job runtime");
        self.root.cancel();
        futures::future::join_all(self.pools.iter().map(WorkerPool::stop)).await;
        info!("Job runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{JobDbModel, JobState};
    use crate::database::repositories::{JobRepository, SqlxJobRepository};
    use crate::database::test_support::migrated_pool;
    use crate::jobs::InsertOpts;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyHandler {
        calls: AtomicUsize,
        fail_times: usize,
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn run(&self, _job: &JobDbModel, _cancel: CancellationToken) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Err(Error::Other(format!("failure {call}")))
            } else {
                Ok(())
            }
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(5)
        }
    }

    struct WaitForCancel;

    #[async_trait]
    impl JobHandler for WaitForCancel {
        async fn run(&self, _job: &JobDbModel, cancel: CancellationToken) -> Result<()> {
            cancel.cancelled().await;
            Err(Error::Cancelled)
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(30)
        }
    }

    struct Panics;

    #[async_trait]
    impl JobHandler for Panics {
        async fn run(&self, _job: &JobDbModel, _cancel: CancellationToken) -> Result<()> {
            panic!("handler exploded");
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(5)
        }
    }

    struct Slow;

    #[async_trait]
    impl JobHandler for Slow {
        async fn run(&self, _job: &JobDbModel, _cancel: CancellationToken) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(50)
        }
    }

    #[derive(Default)]
    struct RecordingErrors {
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl JobErrorHandler for RecordingErrors {
        async fn handle_error(&self, job: &JobDbModel, error: &Error) {
            self.seen.lock().push((job.kind.clone(), error.to_string()));
        }

        async fn handle_panic(&self, job: &JobDbModel, panic: &str) {
            self.seen.lock().push((job.kind.clone(), format!("panic: {panic}")));
        }
    }

    async fn wait_for_state(repo: &dyn JobRepository, id: &str, state: JobState) -> JobDbModel {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let job = repo.get_job(id).await.unwrap();
                if job.state() == Some(state) {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("job {id} never reached {state}"))
    }

    async fn runtime_with(
        handlers: Vec<(&str, Arc<dyn JobHandler>)>,
        errors: Arc<RecordingErrors>,
    ) -> (JobRuntime, Arc<dyn JobRepository>, tempfile::TempDir) {
        let (pool, dir) = migrated_pool().await;
        let repo: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(pool));
        let mut builder = JobRuntime::builder(JobClient::new(repo.clone()))
            .error_handler(errors)
            .poll_interval(Duration::from_millis(10));
        for (kind, handler) in handlers {
            builder = builder.handler(kind, handler);
        }
        (builder.start().await.unwrap(), repo, dir)
    }

    #[tokio::test]
    async fn test_job_completes() {
        let errors = Arc::new(RecordingErrors::default());
        let handler: Arc<dyn JobHandler> = Arc::new(FlakyHandler {
            calls: AtomicUsize::new(0),
            fail_times: 0,
        });
        let (runtime, repo, _dir) = runtime_with(vec![("ok", handler)], errors.clone()).await;

        let job = runtime
            .client()
            .insert("ok", &serde_json::json!({}), InsertOpts::default())
            .await
            .unwrap();
        let done = wait_for_state(repo.as_ref(), &job.id, JobState::Completed).await;
        assert_eq!(done.attempt, 1);
        runtime.shutdown().await;
        assert!(errors.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_retried_with_backoff() {
        let errors = Arc::new(RecordingErrors::default());
        let handler: Arc<dyn JobHandler> = Arc::new(FlakyHandler {
            calls: AtomicUsize::new(0),
            fail_times: 1,
        });
        let (runtime, repo, _dir) = runtime_with(vec![("flaky", handler)], errors.clone()).await;

        let job = runtime
            .client()
            .insert("flaky", &serde_json::json!({}), InsertOpts::default())
            .await
            .unwrap();
        // First retry is scheduled one second out.
        let retried = wait_for_state(repo.as_ref(), &job.id, JobState::Retryable).await;
        assert_eq!(retried.errors().len(), 1);
        assert!(retried.scheduled_at > retried.attempted_at.unwrap());

        let done = wait_for_state(repo.as_ref(), &job.id, JobState::Completed).await;
        assert_eq!(done.attempt, 2);
        runtime.shutdown().await;
        assert!(errors.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_failures_reach_error_handler_once() {
        let errors = Arc::new(RecordingErrors::default());
        let broken: Arc<dyn JobHandler> = Arc::new(FlakyHandler {
            calls: AtomicUsize::new(0),
            fail_times: usize::MAX,
        });
        let panics: Arc<dyn JobHandler> = Arc::new(Panics);
        let slow: Arc<dyn JobHandler> = Arc::new(Slow);
        let (runtime, repo, _dir) = runtime_with(
            vec![("broken", broken), ("panics", panics), ("slow", slow)],
            errors.clone(),
        )
        .await;

        let opts = InsertOpts {
            max_attempts: 1,
            ..InsertOpts::default()
        };
        let mut ids = Vec::new();
        for kind in ["broken", "panics", "slow"] {
            let job = runtime
                .client()
                .insert(kind, &serde_json::json!({}), opts.clone())
                .await
                .unwrap();
            ids.push(job.id);
        }
        for id in &ids {
            wait_for_state(repo.as_ref(), id, JobState::Discarded).await;
        }
        runtime.shutdown().await;

        let mut seen = errors.seen.lock().clone();
        seen.sort();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], ("broken".to_string(), "failure 0".to_string()));
        assert_eq!(seen[1], ("panics".to_string(), "panic: handler exploded".to_string()));
        assert_eq!(seen[2].0, "slow");
        assert!(seen[2].1.contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancel_by_id_and_shutdown_release() {
        let errors = Arc::new(RecordingErrors::default());
        let (runtime, repo, _dir) =
            runtime_with(vec![("wait", Arc::new(WaitForCancel) as Arc<dyn JobHandler>)], errors.clone()).await;

        let cancelled = runtime
            .client()
            .insert("wait", &serde_json::json!({}), InsertOpts::default())
            .await
            .unwrap();
        wait_for_state(repo.as_ref(), &cancelled.id, JobState::Running).await;
        runtime.client().cancel(&cancelled.id).await.unwrap();
        wait_for_state(repo.as_ref(), &cancelled.id, JobState::Cancelled).await;

        let interrupted = runtime
            .client()
            .insert("wait", &serde_json::json!({}), InsertOpts::default())
            .await
            .unwrap();
        wait_for_state(repo.as_ref(), &interrupted.id, JobState::Running).await;
        runtime.shutdown().await;

        let released = repo.get_job(&interrupted.id).await.unwrap();
        assert_eq!(released.state(), Some(JobState::Retryable));
        assert_eq!(released.attempt, 0);
        assert!(errors.seen.lock().is_empty());
    }
}
