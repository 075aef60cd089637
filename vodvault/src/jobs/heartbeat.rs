//! Liveness reporting for long-running attempts.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{trace, warn};

use crate::database::repositories::RunningJobStore;
use crate::database::time::now_ms;

/// Stamp `heartbeat_time` on `job_id` now and every `interval` until the
/// returned guard is dropped.
///
/// The reporter has its own token so it keeps running while the attempt is
/// winding down after cancellation.
pub fn spawn_heartbeat(
    store: Arc<dyn RunningJobStore>,
    job_id: impl Into<String>,
    interval: Duration,
) -> DropGuard {
    let token = CancellationToken::new();
    let stop = token.clone();
    let job_id = job_id.into();

    tokio::spawn(async move {
        loop {
            match store.update_heartbeat(&job_id, now_ms()).await {
                Ok(true) => trace!(job_id = %job_id, "Heartbeat"),
                Ok(false) => trace!(job_id = %job_id, "Heartbeat skipped, job not running"),
                Err(e) => warn!(job_id = %job_id, error = %e, "Failed to record heartbeat"),
            }

            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    });

    token.drop_guard()
}
