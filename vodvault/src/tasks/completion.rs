//! Archive completion check.

use tracing::{info, warn};

use super::TaskContext;
use crate::Result;

/// Clear `processing` and send the success notification once every stage
/// required by the archive's mode is `success`.
///
/// Safe to call from any unit at any time: clearing is a guarded update, so
/// only one caller ever notifies.
pub async fn check_completion(ctx: &TaskContext, queue_id: &str) -> Result<()> {
    let queue = ctx.queues.get_queue(queue_id).await?;
    if !queue.processing || !queue.is_complete() {
        return Ok(());
    }
    if !ctx.queues.clear_processing(queue_id).await? {
        return Ok(());
    }

    info!(queue_id, live = queue.live_archive, "Archive complete");
    let event = ctx.archive_event(queue_id).await?;
    let sent = if queue.live_archive {
        ctx.notifier.live_success(&event).await
    } else {
        ctx.notifier.video_success(&event).await
    };
    if let Err(e) = sent {
        warn!(queue_id, error = %e, "Failed to send completion notification");
    }
    Ok(())
}
