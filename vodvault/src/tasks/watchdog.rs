//! Watchdog: finds archive jobs whose heartbeat went stale and recovers
//! them.
//!
//! Runs as its own job kind and reschedules itself every watchdog interval.
//! A stale job with attempts left is made retryable; otherwise it is deleted.
//! Deleting a live capture job also performs its phase 2 bookkeeping so the
//! archive can still complete.
//!
//! [`start_watchdog_supervisor`] re-creates the watchdog job if its chain of
//! self-rescheduled runs ever breaks.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::live::{advance_live_chat, advance_live_video};
use super::{TaskContext, TaskKind};
use crate::Result;
use crate::database::models::JobDbModel;
use crate::database::time::now_ms;
use crate::jobs::{ARCHIVE_TAG, ArchiveVideoArgs};

/// What the watchdog did with one running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    /// Heartbeat is fresh or was never reported.
    Healthy,
    Retried,
    Deleted,
}

/// Ensure one watchdog job is waiting or running.
pub async fn ensure_watchdog(ctx: &TaskContext) -> Result<()> {
    let repo = ctx.client.repository();
    if repo.count_active_kind(TaskKind::Watchdog.as_ref()).await? == 0 {
        ctx.client
            .insert(TaskKind::Watchdog.as_ref(), &serde_json::json!({}), TaskKind::Watchdog.insert_opts(None))
            .await?;
        info!("Watchdog scheduled");
    }
    Ok(())
}

/// Periodically run [`ensure_watchdog`] until `cancel_token` fires.
pub fn start_watchdog_supervisor(ctx: Arc<TaskContext>, cancel_token: CancellationToken) {
    tokio::spawn(async move {
        let check_interval = ctx.settings.timings.watchdog_interval * 2;

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Watchdog supervisor shutting down");
                    break;
                }
                _ = tokio::time::sleep(check_interval) => {
                    if let Err(e) = ensure_watchdog(&ctx).await {
                        warn!(error = %e, "Failed to ensure watchdog is scheduled");
                    }
                }
            }
        }
    });
}

/// One watchdog pass followed by scheduling the next one.
pub async fn run_watchdog(ctx: &TaskContext) -> Result<()> {
    let checked = check_running_jobs(ctx).await;

    let next_at = now_ms() + ctx.settings.timings.watchdog_interval.as_millis() as i64;
    ctx.client
        .insert(
            TaskKind::Watchdog.as_ref(),
            &serde_json::json!({}),
            TaskKind::Watchdog.insert_opts(Some(next_at)),
        )
        .await?;

    checked.map(|_| ())
}

/// Inspect every running archive job; returns the actions taken.
pub async fn check_running_jobs(ctx: &TaskContext) -> Result<Vec<(String, WatchdogAction)>> {
    let stale_after = ctx.settings.timings.watchdog_stale_after;
    let now = now_ms();
    let jobs = ctx.running.list_running(ARCHIVE_TAG).await?;
    debug!(running = jobs.len(), "Watchdog checking running jobs");

    let mut actions = Vec::with_capacity(jobs.len());
    for job in jobs {
        let action = match check_job(ctx, &job, now, stale_after).await {
            Ok(action) => action,
            Err(e) => {
                error!(job_id = %job.id, kind = %job.kind, error = %e, "Watchdog failed to recover job");
                continue;
            }
        };
        actions.push((job.id, action));
    }
    Ok(actions)
}

async fn check_job(
    ctx: &TaskContext,
    job: &JobDbModel,
    now: i64,
    stale_after: Duration,
) -> Result<WatchdogAction> {
    let args = ArchiveVideoArgs::from_job(job)?;
    if args.heartbeat_time == 0 || now - args.heartbeat_time < stale_after.as_millis() as i64 {
        return Ok(WatchdogAction::Healthy);
    }

    let stale_secs = (now - args.heartbeat_time) / 1000;
    if job.attempts_remaining() {
        warn!(job_id = %job.id, kind = %job.kind, stale_secs, "Heartbeat stale, retrying job");
        ctx.client.cancel_local(&job.id);
        ctx.running.force_retry(&job.id).await?;
        return Ok(WatchdogAction::Retried);
    }

    warn!(job_id = %job.id, kind = %job.kind, stale_secs, "Heartbeat stale and no attempts left, deleting job");
    if ctx.client.cancel_local(&job.id) {
        debug!(job_id = %job.id, "Signalled local attempt of deleted job");
    }
    ctx.running.force_delete(&job.id).await?;

    // The advance is idempotent, so a local attempt's own phase 2 may race it.
    match job.kind.parse::<TaskKind>() {
        Ok(TaskKind::DownloadLiveVideo) => {
            advance_live_video(ctx, &args.queue_id, args.continue_chain).await?
        }
        Ok(TaskKind::DownloadLiveChat) => {
            advance_live_chat(ctx, &args.queue_id, args.continue_chain).await?
        }
        _ => {}
    }
    Ok(WatchdogAction::Deleted)
}
