//! Job handler seams.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::database::models::JobDbModel;
use crate::{Error, Result};

/// Runs one attempt of a job kind.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Execute the attempt. `cancel` fires on shutdown or when the job is
    /// cancelled by id; returning [`Error::Cancelled`] finalizes the job as
    /// cancelled (or releases it for the next start on shutdown).
    async fn run(&self, job: &JobDbModel, cancel: CancellationToken) -> Result<()>;

    /// Upper bound for one attempt.
    fn timeout(&self) -> Duration;
}

/// Called once per job whose final attempt failed.
#[async_trait]
pub trait JobErrorHandler: Send + Sync {
    async fn handle_error(&self, job: &JobDbModel, error: &Error);

    async fn handle_panic(&self, job: &JobDbModel, panic: &str);
}

/// Error handler that only logs.
pub struct NoopErrorHandler;

#[async_trait]
impl JobErrorHandler for NoopErrorHandler {
    async fn handle_error(&self, job: &JobDbModel, error: &Error) {
        debug!(job_id = %job.id, kind = %job.kind, error = %error, "Job discarded");
    }

    async fn handle_panic(&self, job: &JobDbModel, panic: &str) {
        debug!(job_id = %job.id, kind = %job.kind, panic, "Job discarded after panic");
    }
}
