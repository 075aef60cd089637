//! create-folder stage.

use std::path::Path;

use tracing::info;

use super::{TaskContext, TaskKind};
use crate::Result;
use crate::database::models::JobDbModel;
use crate::utils::fs::ensure_dir_all;

pub async fn create_directory(ctx: &TaskContext, job: &JobDbModel) -> Result<()> {
    let unit = ctx.enter(job, TaskKind::CreateDirectory).await?;

    let video_path = Path::new(&unit.video.video_path);
    let temp_path = Path::new(&unit.video.tmp_video_download_path);
    for dir in [video_path.parent(), temp_path.parent()].into_iter().flatten() {
        ensure_dir_all(dir).await?;
    }
    info!(queue_id = %unit.queue.id, video_id = %unit.video.id, "Created archive directories");

    ctx.finish(&unit, &[(TaskKind::SaveVideoInfo, None)]).await
}
