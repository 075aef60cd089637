//! Live capture units.
//!
//! Both units run in two phases. Phase 1 records until the stream ends or
//! the attempt is cancelled. Phase 2 always runs afterwards, without the
//! attempt's token: it finishes the stage and advances the chain. A
//! cancelled capture is a normal end, so the units return `Ok(())`.

use std::path::Path;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{ArchiveUnit, TaskContext, TaskKind, check_completion};
use crate::database::models::{ChannelDbModel, JobDbModel, Stage};
use crate::database::time::now_ms;
use crate::jobs::CancelOutcome;
use crate::live::LiveVideoRequest;
use crate::platform::PlatformChannel;
use crate::{Error, Result};

/// Record the live stream; once the recorder runs, start the paired chat
/// capture.
pub async fn download_live_video(
    ctx: &TaskContext,
    job: &JobDbModel,
    cancel: CancellationToken,
) -> Result<()> {
    let unit = ctx.enter(job, TaskKind::DownloadLiveVideo).await?;
    ctx.queues
        .set_live_video_job_id(&unit.queue.id, &unit.job_id)
        .await?;
    ctx.channels.set_is_live(&unit.channel.id, true).await?;
    if let Err(e) = ctx.notifier.is_live(&unit.event()).await {
        warn!(queue_id = %unit.queue.id, error = %e, "Failed to send live notification");
    }

    let log_path = unit.log_path(&ctx.settings);
    let request = LiveVideoRequest {
        channel_login: &unit.channel.login,
        quality: &unit.video.resolution,
        output: Path::new(&unit.video.tmp_video_download_path),
        log_path: &log_path,
    };

    let (started_tx, started_rx) = oneshot::channel();
    let chat_trigger = async {
        if started_rx.await.is_ok()
            && unit.queue.archive_chat
            && let Err(e) = start_live_chat(ctx, &unit).await
        {
            warn!(queue_id = %unit.queue.id, error = %e, "Failed to start live chat capture");
        }
    };
    let (captured, ()) = tokio::join!(
        ctx.toolchain.capture_live_video(request, started_tx, &cancel),
        chat_trigger
    );
    match &captured {
        Ok(()) => info!(queue_id = %unit.queue.id, "Live stream ended"),
        Err(Error::Cancelled) => info!(queue_id = %unit.queue.id, "Live video capture cancelled"),
        Err(e) => warn!(queue_id = %unit.queue.id, error = %e, "Live video capture failed"),
    }

    let advanced = advance_live_video(ctx, &unit.queue.id, unit.args.continue_chain).await;
    settle(captured, advanced)
}

async fn start_live_chat(ctx: &TaskContext, unit: &ArchiveUnit) -> Result<()> {
    ctx.queues.set_chat_start_once(&unit.queue.id, now_ms()).await?;
    let chat_job = ctx
        .enqueue(TaskKind::DownloadLiveChat, &unit.queue.id, None)
        .await?;
    ctx.queues
        .set_live_chat_job_id(&unit.queue.id, &chat_job.id)
        .await?;
    info!(queue_id = %unit.queue.id, job_id = %chat_job.id, "Live chat capture enqueued");
    Ok(())
}

/// Capture live chat until the paired video unit cancels this attempt.
pub async fn download_live_chat(
    ctx: &TaskContext,
    job: &JobDbModel,
    cancel: CancellationToken,
) -> Result<()> {
    let unit = ctx.enter(job, TaskKind::DownloadLiveChat).await?;
    let channel = chat_channel(ctx, &unit).await;

    let (connected_tx, connected_rx) = oneshot::channel();
    let on_connect = async {
        if connected_rx.await.is_ok() {
            info!(queue_id = %unit.queue.id, channel = %unit.channel.login, "Live chat connected");
        }
    };
    let (captured, ()) = tokio::join!(
        ctx.toolchain.capture_live_chat(
            &channel,
            Path::new(&unit.video.tmp_live_chat_download_path),
            Some(connected_tx),
            &cancel,
        ),
        on_connect
    );

    let advanced = advance_live_chat(ctx, &unit.queue.id, unit.args.continue_chain).await;
    settle(captured, advanced)
}

/// The unit's channel, with its chatroom id looked up and stored first when
/// the chat protocol needs one. Lookup failures leave the channel as is;
/// capture then reports the missing id.
async fn chat_channel(ctx: &TaskContext, unit: &ArchiveUnit) -> ChannelDbModel {
    let mut channel = unit.channel.clone();
    if !ctx.toolchain.chat_needs_chatroom_id() || channel.chatroom_id.is_some() {
        return channel;
    }
    match ctx.platform.get_channel(&channel.login).await {
        Ok(PlatformChannel {
            chatroom_id: Some(chatroom_id),
            ..
        }) => {
            if let Err(e) = ctx.channels.set_chatroom_id(&channel.id, &chatroom_id).await {
                warn!(channel = %channel.login, error = %e, "Failed to store chatroom id");
            }
            info!(channel = %channel.login, chatroom_id = %chatroom_id, "Resolved chatroom id");
            channel.chatroom_id = Some(chatroom_id);
        }
        Ok(_) => warn!(channel = %channel.login, "Platform reported no chatroom id"),
        Err(e) => warn!(channel = %channel.login, error = %e, "Failed to look up chatroom id"),
    }
    channel
}

/// Phase 2 of the live video unit; also the watchdog's manual advance.
///
/// Stops the paired chat capture, marks the channel offline, finishes
/// download-video and enqueues post-processing.
pub async fn advance_live_video(ctx: &TaskContext, queue_id: &str, continue_chain: bool) -> Result<()> {
    let queue = ctx.queues.get_queue(queue_id).await?;
    match &queue.live_chat_job_id {
        Some(chat_job_id) => {
            // A chat job that never started will not finish its own stage.
            if ctx.client.cancel(chat_job_id).await? == CancelOutcome::Cancelled {
                advance_live_chat(ctx, queue_id, continue_chain).await?;
            }
        }
        None if queue.archive_chat => advance_live_chat(ctx, queue_id, continue_chain).await?,
        None => {}
    }

    let video = ctx.videos.get_video(&queue.video_id).await?;
    ctx.channels.set_is_live(&video.channel_id, false).await?;
    advance(ctx, queue_id, Stage::DownloadVideo, TaskKind::PostProcessVideo, continue_chain).await
}

/// Phase 2 of the live chat unit; also the watchdog's manual advance.
pub async fn advance_live_chat(ctx: &TaskContext, queue_id: &str, continue_chain: bool) -> Result<()> {
    advance(ctx, queue_id, Stage::DownloadChat, TaskKind::ConvertChat, continue_chain).await
}

async fn advance(
    ctx: &TaskContext,
    queue_id: &str,
    stage: Stage,
    next: TaskKind,
    continue_chain: bool,
) -> Result<()> {
    let outcome = ctx.settle_stage(queue_id, Some(stage)).await?;
    if continue_chain {
        ctx.enqueue_next(queue_id, outcome, &[(next, None)]).await?;
    }
    check_completion(ctx, queue_id).await
}

/// Cancellation is a normal end of capture; any other capture error wins
/// over a bookkeeping error.
fn settle(captured: Result<()>, advanced: Result<()>) -> Result<()> {
    match captured {
        Ok(()) | Err(Error::Cancelled) => advanced,
        Err(e) => {
            if let Err(advance_error) = advanced {
                warn!(error = %advance_error, "Live capture bookkeeping failed");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle() {
        assert!(settle(Err(Error::Cancelled), Ok(())).is_ok());
        assert!(settle(Ok(()), Err(Error::validation("x"))).is_err());
        let err = settle(Err(Error::Other("exit".into())), Err(Error::validation("x"))).unwrap_err();
        assert!(matches!(err, Error::Other(_)));
    }
}
