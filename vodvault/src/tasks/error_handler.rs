//! Terminal failure handling for archive jobs.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use super::{TaskContext, TaskKind};
use crate::Error;
use crate::database::models::{JobDbModel, TaskStatus};
use crate::jobs::{ALLOW_FAIL_TAG, ARCHIVE_TAG, ArchiveVideoArgs, JobErrorHandler};

/// Marks the failed job's stage `failed` and sends one error notification.
///
/// Jobs outside the archive chain, and archive jobs tagged `allow_fail`, are
/// only logged.
pub struct ArchiveErrorHandler {
    ctx: Arc<TaskContext>,
}

impl ArchiveErrorHandler {
    pub fn new(ctx: Arc<TaskContext>) -> Self {
        Self { ctx }
    }

    async fn fail_archive(&self, job: &JobDbModel, message: &str) {
        if !job.has_tag(ARCHIVE_TAG) || job.has_tag(ALLOW_FAIL_TAG) {
            warn!(job_id = %job.id, kind = %job.kind, error = message, "Job failed, archive unaffected");
            return;
        }
        let args = match ArchiveVideoArgs::from_job(job) {
            Ok(args) => args,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed archive job has unreadable args");
                return;
            }
        };

        if let Some(stage) = job.kind.parse::<TaskKind>().ok().and_then(|k| k.stage()) {
            match self
                .ctx
                .queues
                .set_stage_status(&args.queue_id, stage, TaskStatus::Failed)
                .await
            {
                Ok(true) => {}
                Ok(false) => warn!(queue_id = %args.queue_id, stage = %stage, "Stage already finalized, not marking failed"),
                Err(e) => error!(queue_id = %args.queue_id, error = %e, "Failed to mark stage failed"),
            }
        }

        match self.ctx.archive_event(&args.queue_id).await {
            Ok(event) => {
                if let Err(e) = self.ctx.notifier.error(&event, &job.kind, message).await {
                    warn!(queue_id = %args.queue_id, error = %e, "Failed to send error notification");
                }
            }
            Err(e) => error!(queue_id = %args.queue_id, error = %e, "Failed to load archive for error notification"),
        }
    }
}

#[async_trait]
impl JobErrorHandler for ArchiveErrorHandler {
    async fn handle_error(&self, job: &JobDbModel, error: &Error) {
        self.fail_archive(job, &error.to_string()).await;
    }

    async fn handle_panic(&self, job: &JobDbModel, panic: &str) {
        self.fail_archive(job, &format!("panic: {panic}")).await;
    }
}
