//! save-info stage and the live VOD id correction.

use std::path::Path;

use serde_json::Value;
use tracing::{info, warn};

use super::{TaskContext, TaskKind};
use crate::database::models::{ChapterDbModel, JobDbModel, MutedSegmentDbModel};
use crate::utils::fs::{ensure_parent_dir, io_error};
use crate::{Error, Result};

async fn write_info(path: &str, info: &Value) -> Result<()> {
    let path = Path::new(path);
    ensure_parent_dir(path).await?;
    let body = serde_json::to_vec_pretty(info)?;
    tokio::fs::write(path, body)
        .await
        .map_err(|e| io_error("writing", path, e))
}

/// Save platform metadata for the archive.
///
/// VODs record duration, chapters and muted segments. Live archives record
/// the platform stream id.
pub async fn save_video_info(ctx: &TaskContext, job: &JobDbModel) -> Result<()> {
    let unit = ctx.enter(job, TaskKind::SaveVideoInfo).await?;
    let video = &unit.video;

    if unit.queue.live_archive {
        let stream = ctx
            .platform
            .get_live_stream(&unit.channel.login)
            .await?
            .ok_or_else(|| Error::not_found("live stream", &unit.channel.login))?;
        write_info(&video.info_path, &stream.raw).await?;
        ctx.videos.update_ext_stream_id(&video.id, &stream.id).await?;
        if let Some(url) = &stream.thumbnail_url {
            ctx.videos.update_thumbnail_url(&video.id, url).await?;
        }
        info!(video_id = %video.id, stream_id = %stream.id, "Saved live stream info");
    } else {
        let platform_video = ctx.platform.get_video(&video.ext_id).await?;
        write_info(&video.info_path, &platform_video.raw).await?;
        ctx.videos
            .update_duration(&video.id, platform_video.duration_secs)
            .await?;
        if let Some(url) = &platform_video.thumbnail_url {
            ctx.videos.update_thumbnail_url(&video.id, url).await?;
        }

        let chapters: Vec<ChapterDbModel> = platform_video
            .chapters
            .iter()
            .map(|c| {
                ChapterDbModel::new(
                    &video.id,
                    c.chapter_type.clone().unwrap_or_else(|| "GAME_CHANGE".to_string()),
                    &c.title,
                    c.start_secs,
                    c.end_secs,
                )
            })
            .collect();
        ctx.chapters.replace_chapters(&video.id, &chapters).await?;

        let muted: Vec<MutedSegmentDbModel> = platform_video
            .muted_segments
            .iter()
            .map(|s| MutedSegmentDbModel::new(&video.id, s.start_secs, s.end_secs))
            .collect();
        ctx.chapters.replace_muted_segments(&video.id, &muted).await?;
        info!(
            video_id = %video.id,
            duration_secs = platform_video.duration_secs,
            chapters = chapters.len(),
            muted_segments = muted.len(),
            "Saved video info"
        );
    }

    ctx.finish(&unit, &[(TaskKind::DownloadThumbnail, None)]).await
}

/// Point a live archive at the VOD the platform created for its stream.
pub async fn update_stream_video_id(ctx: &TaskContext, job: &JobDbModel) -> Result<()> {
    let unit = ctx.enter(job, TaskKind::UpdateStreamVideoId).await?;
    let Some(stream_id) = unit.video.ext_stream_id.clone() else {
        warn!(video_id = %unit.video.id, "No stream id recorded, nothing to update");
        return Ok(());
    };

    let videos = ctx.platform.get_videos(&unit.channel.login).await?;
    let vod = videos
        .into_iter()
        .find(|v| v.stream_id.as_deref() == Some(stream_id.as_str()))
        .ok_or_else(|| Error::not_found("vod for stream", &stream_id))?;

    if vod.id != unit.video.ext_id {
        ctx.videos.update_ext_id(&unit.video.id, &vod.id).await?;
        info!(video_id = %unit.video.id, ext_id = %vod.id, "Updated live archive VOD id");
    }
    Ok(())
}
