//! Video stages: download, post-process, move.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{TaskContext, TaskKind};
use crate::Result;
use crate::database::models::JobDbModel;
use crate::utils::fs::{move_dir, move_file, remove_file_if_exists};

pub async fn download_video(
    ctx: &TaskContext,
    job: &JobDbModel,
    cancel: &CancellationToken,
) -> Result<()> {
    let unit = ctx.enter(job, TaskKind::DownloadVideo).await?;
    let video = &unit.video;

    ctx.toolchain
        .download_video(
            &video.ext_id,
            &video.resolution,
            Path::new(&video.tmp_video_download_path),
            &unit.log_path(&ctx.settings),
            cancel,
        )
        .await?;
    info!(video_id = %video.id, "Video downloaded");

    ctx.finish(&unit, &[(TaskKind::PostProcessVideo, None)]).await
}

/// Remux, optionally package HLS, and record the real duration.
pub async fn post_process_video(
    ctx: &TaskContext,
    job: &JobDbModel,
    cancel: &CancellationToken,
) -> Result<()> {
    let unit = ctx.enter(job, TaskKind::PostProcessVideo).await?;
    let video = &unit.video;
    let log_path = unit.log_path(&ctx.settings);
    let converted = Path::new(&video.tmp_video_convert_path);

    ctx.toolchain
        .post_process_video(
            Path::new(&video.tmp_video_download_path),
            converted,
            &log_path,
            cancel,
        )
        .await?;

    if ctx.settings.video_hls {
        ctx.toolchain
            .package_hls(converted, Path::new(&video.tmp_video_hls_path), &log_path, cancel)
            .await?;
    }

    let duration = ctx.toolchain.probe_duration(converted, cancel).await?;
    ctx.videos
        .update_duration(&video.id, duration.round() as i64)
        .await?;
    info!(video_id = %video.id, duration_secs = duration, "Video post-processed");

    ctx.finish(&unit, &[(TaskKind::MoveVideo, None)]).await
}

pub async fn move_video(ctx: &TaskContext, job: &JobDbModel) -> Result<()> {
    let unit = ctx.enter(job, TaskKind::MoveVideo).await?;
    let video = &unit.video;

    move_file(
        Path::new(&video.tmp_video_convert_path),
        Path::new(&video.video_path),
    )
    .await?;
    if ctx.settings.video_hls {
        move_dir(
            Path::new(&video.tmp_video_hls_path),
            Path::new(&video.video_hls_path),
        )
        .await?;
    }
    remove_file_if_exists(Path::new(&video.tmp_video_download_path)).await?;
    ctx.queues.set_video_processing(&unit.queue.id, false).await?;
    info!(video_id = %video.id, path = %video.video_path, "Video moved to archive");

    ctx.finish(&unit, &[]).await
}
