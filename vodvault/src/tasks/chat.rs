//! Chat stages: download (VOD), convert (live), render, move.

use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{ArchiveUnit, TaskContext, TaskKind};
use crate::Result;
use crate::database::models::{JobDbModel, Stage, TaskStatus, VideoDbModel};
use crate::live::chat::{ChatStreamer, convert_live_chat, count_chat_comments};
use crate::utils::fs::{move_file, remove_file_if_exists};

/// Chat JSON that render and move work from.
fn chat_source(video: &VideoDbModel, live: bool) -> &Path {
    if live {
        Path::new(&video.tmp_live_chat_convert_path)
    } else {
        Path::new(&video.tmp_chat_download_path)
    }
}

fn after_chat_ready(unit: &ArchiveUnit) -> [(TaskKind, Option<Duration>); 1] {
    if unit.queue.render_chat {
        [(TaskKind::RenderChat, None)]
    } else {
        [(TaskKind::MoveChat, None)]
    }
}

/// An archive without chat messages has nothing to render or move: drop the
/// chat paths and finish the remaining chat stages directly.
async fn skip_empty_chat(ctx: &TaskContext, unit: &ArchiveUnit) -> Result<()> {
    info!(queue_id = %unit.queue.id, video_id = %unit.video.id, "Chat is empty, skipping render and move");
    ctx.videos.clear_chat_paths(&unit.video.id).await?;
    for stage in [Stage::RenderChat, Stage::MoveChat] {
        ctx.queues
            .set_stage_status(&unit.queue.id, stage, TaskStatus::Success)
            .await?;
    }
    ctx.queues.set_chat_processing(&unit.queue.id, false).await?;
    ctx.finish(unit, &[]).await
}

pub async fn download_chat(
    ctx: &TaskContext,
    job: &JobDbModel,
    cancel: &CancellationToken,
) -> Result<()> {
    let unit = ctx.enter(job, TaskKind::DownloadChat).await?;
    let video = &unit.video;

    ctx.toolchain
        .download_chat(
            &video.ext_id,
            Path::new(&video.tmp_chat_download_path),
            &unit.log_path(&ctx.settings),
            cancel,
        )
        .await?;
    info!(video_id = %video.id, "Chat downloaded");

    ctx.finish(&unit, &after_chat_ready(&unit)).await
}

/// Turn the captured live chat into the renderer's document format.
pub async fn convert_chat(ctx: &TaskContext, job: &JobDbModel) -> Result<()> {
    let unit = ctx.enter(job, TaskKind::ConvertChat).await?;
    let video = &unit.video;

    let streamer = ChatStreamer {
        name: unit.channel.display_name.clone(),
        id: unit.channel.ext_id.clone(),
    };
    let comments = convert_live_chat(
        Path::new(&video.tmp_live_chat_download_path),
        Path::new(&video.tmp_live_chat_convert_path),
        streamer,
        unit.queue.chat_start,
    )
    .await?;
    info!(video_id = %video.id, comments, "Live chat converted");

    if comments == 0 {
        return skip_empty_chat(ctx, &unit).await;
    }
    ctx.finish(&unit, &after_chat_ready(&unit)).await
}

pub async fn render_chat(
    ctx: &TaskContext,
    job: &JobDbModel,
    cancel: &CancellationToken,
) -> Result<()> {
    let unit = ctx.enter(job, TaskKind::RenderChat).await?;
    let video = &unit.video;
    let source = chat_source(video, unit.queue.live_archive);

    if count_chat_comments(source).await? == 0 {
        return skip_empty_chat(ctx, &unit).await;
    }

    ctx.toolchain
        .render_chat(
            source,
            Path::new(&video.tmp_chat_render_path),
            &unit.log_path(&ctx.settings),
            cancel,
        )
        .await?;
    info!(video_id = %video.id, "Chat rendered");

    ctx.finish(&unit, &[(TaskKind::MoveChat, None)]).await
}

pub async fn move_chat(ctx: &TaskContext, job: &JobDbModel) -> Result<()> {
    let unit = ctx.enter(job, TaskKind::MoveChat).await?;
    let video = &unit.video;
    let live = unit.queue.live_archive;

    if let Some(chat_path) = &video.chat_path {
        move_file(chat_source(video, live), Path::new(chat_path)).await?;
    }
    if unit.queue.render_chat
        && let Some(chat_video_path) = &video.chat_video_path
    {
        move_file(Path::new(&video.tmp_chat_render_path), Path::new(chat_video_path)).await?;
    }
    if live {
        remove_file_if_exists(Path::new(&video.tmp_live_chat_download_path)).await?;
    }
    ctx.queues.set_chat_processing(&unit.queue.id, false).await?;
    info!(video_id = %video.id, "Chat moved to archive");

    ctx.finish(&unit, &[]).await
}
