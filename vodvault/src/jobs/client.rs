//! Inserting and cancelling jobs.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::QueueName;
use crate::database::models::{JobDbModel, JobState};
use crate::database::repositories::JobRepository;
use crate::{Error, Result};

/// Options for [`JobClient::insert`].
#[derive(Debug, Clone)]
pub struct InsertOpts {
    pub queue: QueueName,
    pub max_attempts: i64,
    pub tags: Vec<&'static str>,
    /// Epoch ms; `None` means now.
    pub scheduled_at: Option<i64>,
}

impl Default for InsertOpts {
    fn default() -> Self {
        Self {
            queue: QueueName::Default,
            max_attempts: 5,
            tags: Vec::new(),
            scheduled_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The attempt in flight was signalled; it finalizes itself.
    Signalled,
    /// The job had not started and is now cancelled.
    Cancelled,
    AlreadyFinished,
    NotFound,
}

/// Handle for producing jobs and cancelling them by id.
#[derive(Clone)]
pub struct JobClient {
    repo: Arc<dyn JobRepository>,
    in_flight: Arc<DashMap<String, CancellationToken>>,
    notifiers: Arc<DashMap<QueueName, Arc<Notify>>>,
}

impl JobClient {
    pub fn new(repo: Arc<dyn JobRepository>) -> Self {
        Self {
            repo,
            in_flight: Arc::new(DashMap::new()),
            notifiers: Arc::new(DashMap::new()),
        }
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repo
    }

    /// Wakes idle workers of `queue`.
    pub fn notifier(&self, queue: QueueName) -> Arc<Notify> {
        self.notifiers
            .entry(queue)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    pub async fn insert<A: Serialize>(
        &self,
        kind: &str,
        args: &A,
        opts: InsertOpts,
    ) -> Result<JobDbModel> {
        let job = JobDbModel::new(
            kind,
            opts.queue.as_ref(),
            serde_json::to_string(args)?,
            &opts.tags,
            opts.max_attempts,
            opts.scheduled_at,
        );
        self.repo.insert_job(&job).await?;
        debug!(job_id = %job.id, kind, queue = %opts.queue, state = %job.state, "Inserted job");
        self.notifier(opts.queue).notify_one();
        Ok(job)
    }

    /// Like [`insert`](Self::insert), but a no-op returning `None` when a job
    /// of `kind` already exists for `queue_id`.
    pub async fn insert_once<A: Serialize>(
        &self,
        kind: &str,
        queue_id: &str,
        args: &A,
        opts: InsertOpts,
    ) -> Result<Option<JobDbModel>> {
        let job = JobDbModel::new(
            kind,
            opts.queue.as_ref(),
            serde_json::to_string(args)?,
            &opts.tags,
            opts.max_attempts,
            opts.scheduled_at,
        );
        if !self.repo.insert_job_once(&job, queue_id).await? {
            debug!(kind, queue_id, "Job already exists for archive, not inserting");
            return Ok(None);
        }
        debug!(job_id = %job.id, kind, queue = %opts.queue, state = %job.state, "Inserted job");
        self.notifier(opts.queue).notify_one();
        Ok(Some(job))
    }

    /// Cancel a job by id.
    ///
    /// A job claimed by a worker that has not yet registered its attempt gets
    /// a pre-cancelled token, which the worker picks up on registration.
    pub async fn cancel(&self, id: &str) -> Result<CancelOutcome> {
        if self.cancel_local(id) {
            info!(job_id = id, "Signalled running job to cancel");
            return Ok(CancelOutcome::Signalled);
        }
        if self.repo.cancel_pending(id).await? {
            info!(job_id = id, "Cancelled job before it started");
            return Ok(CancelOutcome::Cancelled);
        }

        let job = match self.repo.get_job(id).await {
            Ok(job) => job,
            Err(Error::NotFound { .. }) => return Ok(CancelOutcome::NotFound),
            Err(e) => return Err(e),
        };
        match job.state() {
            Some(JobState::Running) => {
                match self.in_flight.entry(id.to_string()) {
                    Entry::Occupied(entry) => entry.get().cancel(),
                    Entry::Vacant(entry) => {
                        let token = CancellationToken::new();
                        token.cancel();
                        entry.insert(token);
                    }
                }
                info!(job_id = id, "Signalled running job to cancel");
                Ok(CancelOutcome::Signalled)
            }
            _ => Ok(CancelOutcome::AlreadyFinished),
        }
    }

    /// Signal the in-process attempt of `id`, if any.
    pub fn cancel_local(&self, id: &str) -> bool {
        match self.in_flight.get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Token for the attempt of `id`, derived from `parent` unless a cancel
    /// request arrived first.
    pub(crate) fn attach(&self, id: &str, parent: &CancellationToken) -> CancellationToken {
        self.in_flight
            .entry(id.to_string())
            .or_insert_with(|| parent.child_token())
            .clone()
    }

    pub(crate) fn detach(&self, id: &str) {
        self.in_flight.remove(id);
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}
