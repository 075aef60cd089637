//! download-thumbnail stage, and the delayed live thumbnail refresh.

use std::path::Path;

use tracing::{info, warn};

use super::{ArchiveUnit, TaskContext, TaskKind};
use crate::Result;
use crate::database::models::JobDbModel;

/// Branch point of the chain: live archives start recording, VODs start
/// their downloads.
fn next_stages(ctx: &TaskContext, unit: &ArchiveUnit) -> Vec<(TaskKind, Option<std::time::Duration>)> {
    let timings = &ctx.settings.timings;
    if unit.queue.live_archive {
        vec![
            (TaskKind::DownloadLiveVideo, None),
            (TaskKind::DownloadThumbnailMinimal, Some(timings.minimal_thumbnail_delay)),
            (TaskKind::UpdateStreamVideoId, Some(timings.update_stream_id_delay)),
        ]
    } else {
        let mut next = vec![(TaskKind::DownloadVideo, None)];
        if unit.queue.archive_chat {
            next.push((TaskKind::DownloadChat, None));
        }
        next
    }
}

async fn live_thumbnail_url(ctx: &TaskContext, unit: &ArchiveUnit) -> Result<Option<String>> {
    Ok(ctx
        .platform
        .get_live_stream(&unit.channel.login)
        .await?
        .and_then(|s| s.thumbnail_url))
}

pub async fn download_thumbnail(ctx: &TaskContext, job: &JobDbModel) -> Result<()> {
    let unit = ctx.enter(job, TaskKind::DownloadThumbnail).await?;

    match &unit.video.thumbnail_url {
        Some(url) => {
            ctx.toolchain
                .fetch_thumbnail(url, Path::new(&unit.video.thumbnail_path))
                .await?;
            info!(video_id = %unit.video.id, "Downloaded thumbnail");
        }
        None => warn!(video_id = %unit.video.id, "No thumbnail available, skipping"),
    }

    let next = next_stages(ctx, &unit);
    ctx.finish(&unit, &next).await
}

/// Replace the live thumbnail once the stream has been running for a while.
pub async fn download_thumbnail_minimal(ctx: &TaskContext, job: &JobDbModel) -> Result<()> {
    let unit = ctx.enter(job, TaskKind::DownloadThumbnailMinimal).await?;
    if let Some(url) = live_thumbnail_url(ctx, &unit).await? {
        ctx.toolchain
            .fetch_thumbnail(&url, Path::new(&unit.video.thumbnail_path))
            .await?;
        ctx.videos.update_thumbnail_url(&unit.video.id, &url).await?;
        info!(video_id = %unit.video.id, "Refreshed live thumbnail");
    }
    Ok(())
}
