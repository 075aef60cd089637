//! Archive task chain.
//!
//! Every step of an archive is a job of one [`TaskKind`]. A unit marks its
//! queue stage `running`, reports heartbeats, does its work, marks the stage
//! `success` and (when the `continue` flag is set) enqueues the next
//! stage(s). Failures are returned to the job runtime unchanged; terminal
//! failures reach [`ArchiveErrorHandler`].

pub mod chat;
pub mod completion;
pub mod context;
pub mod directory;
pub mod error_handler;
pub mod info;
pub mod live;
pub mod thumbnail;
pub mod video;
pub mod watchdog;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strum::IntoEnumIterator;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use completion::check_completion;
pub use context::{ArchiveUnit, StageOutcome, TaskContext, TaskSettings};
pub use error_handler::ArchiveErrorHandler;
pub use watchdog::{ensure_watchdog, start_watchdog_supervisor};

use crate::Result;
use crate::database::models::{JobDbModel, QueueDbModel, Stage};
use crate::jobs::{ALLOW_FAIL_TAG, ARCHIVE_TAG, InsertOpts, JobHandler, JobRuntimeBuilder, QueueName};

const HOUR: Duration = Duration::from_secs(60 * 60);

/// Every job kind the archive pipeline runs.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum TaskKind {
    CreateDirectory,
    SaveVideoInfo,
    DownloadThumbnail,
    DownloadThumbnailMinimal,
    UpdateStreamVideoId,
    DownloadVideo,
    PostProcessVideo,
    MoveVideo,
    DownloadChat,
    ConvertChat,
    RenderChat,
    MoveChat,
    DownloadLiveVideo,
    DownloadLiveChat,
    Watchdog,
}

impl TaskKind {
    pub fn queue(&self) -> QueueName {
        match self {
            Self::DownloadVideo | Self::DownloadLiveVideo => QueueName::VideoDownload,
            Self::PostProcessVideo => QueueName::VideoPostprocess,
            Self::RenderChat => QueueName::ChatRender,
            _ => QueueName::Default,
        }
    }

    pub fn max_attempts(&self) -> i64 {
        match self {
            Self::DownloadThumbnailMinimal
            | Self::UpdateStreamVideoId
            | Self::ConvertChat
            | Self::RenderChat => 3,
            Self::DownloadLiveVideo | Self::DownloadLiveChat | Self::Watchdog => 1,
            _ => 5,
        }
    }

    pub fn timeout(&self) -> Duration {
        match self {
            Self::Watchdog => Duration::from_secs(5 * 60),
            Self::CreateDirectory
            | Self::SaveVideoInfo
            | Self::DownloadThumbnail
            | Self::DownloadThumbnailMinimal
            | Self::UpdateStreamVideoId => Duration::from_secs(10 * 60),
            Self::ConvertChat => HOUR,
            Self::MoveVideo | Self::MoveChat => 4 * HOUR,
            Self::DownloadVideo
            | Self::PostProcessVideo
            | Self::DownloadChat
            | Self::RenderChat
            | Self::DownloadLiveVideo
            | Self::DownloadLiveChat => 49 * HOUR,
        }
    }

    pub fn tags(&self) -> Vec<&'static str> {
        match self {
            Self::Watchdog => Vec::new(),
            Self::DownloadThumbnailMinimal | Self::UpdateStreamVideoId => {
                vec![ARCHIVE_TAG, ALLOW_FAIL_TAG]
            }
            _ => vec![ARCHIVE_TAG],
        }
    }

    /// Queue stage this kind drives, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::CreateDirectory => Some(Stage::CreateFolder),
            Self::SaveVideoInfo => Some(Stage::SaveInfo),
            Self::DownloadThumbnail => Some(Stage::DownloadThumbnail),
            Self::DownloadVideo | Self::DownloadLiveVideo => Some(Stage::DownloadVideo),
            Self::PostProcessVideo => Some(Stage::ConvertVideo),
            Self::MoveVideo => Some(Stage::MoveVideo),
            Self::DownloadChat | Self::DownloadLiveChat => Some(Stage::DownloadChat),
            Self::ConvertChat => Some(Stage::ConvertChat),
            Self::RenderChat => Some(Stage::RenderChat),
            Self::MoveChat => Some(Stage::MoveChat),
            Self::DownloadThumbnailMinimal | Self::UpdateStreamVideoId | Self::Watchdog => None,
        }
    }

    /// Live capture units finish their bookkeeping even when cancelled.
    pub fn is_live_capture(&self) -> bool {
        matches!(self, Self::DownloadLiveVideo | Self::DownloadLiveChat)
    }

    pub fn insert_opts(&self, scheduled_at: Option<i64>) -> InsertOpts {
        InsertOpts {
            queue: self.queue(),
            max_attempts: self.max_attempts(),
            tags: self.tags(),
            scheduled_at,
        }
    }
}

/// Runs one [`TaskKind`] against the shared [`TaskContext`].
pub struct TaskHandler {
    kind: TaskKind,
    ctx: Arc<TaskContext>,
}

impl TaskHandler {
    pub fn new(kind: TaskKind, ctx: Arc<TaskContext>) -> Self {
        Self { kind, ctx }
    }
}

#[async_trait]
impl JobHandler for TaskHandler {
    async fn run(&self, job: &JobDbModel, cancel: CancellationToken) -> Result<()> {
        let ctx = &self.ctx;
        match self.kind {
            TaskKind::CreateDirectory => directory::create_directory(ctx, job).await,
            TaskKind::SaveVideoInfo => info::save_video_info(ctx, job).await,
            TaskKind::DownloadThumbnail => thumbnail::download_thumbnail(ctx, job).await,
            TaskKind::DownloadThumbnailMinimal => {
                thumbnail::download_thumbnail_minimal(ctx, job).await
            }
            TaskKind::UpdateStreamVideoId => info::update_stream_video_id(ctx, job).await,
            TaskKind::DownloadVideo => video::download_video(ctx, job, &cancel).await,
            TaskKind::PostProcessVideo => video::post_process_video(ctx, job, &cancel).await,
            TaskKind::MoveVideo => video::move_video(ctx, job).await,
            TaskKind::DownloadChat => chat::download_chat(ctx, job, &cancel).await,
            TaskKind::ConvertChat => chat::convert_chat(ctx, job).await,
            TaskKind::RenderChat => chat::render_chat(ctx, job, &cancel).await,
            TaskKind::MoveChat => chat::move_chat(ctx, job).await,
            TaskKind::DownloadLiveVideo => live::download_live_video(ctx, job, cancel).await,
            TaskKind::DownloadLiveChat => live::download_live_chat(ctx, job, cancel).await,
            TaskKind::Watchdog => watchdog::run_watchdog(ctx).await,
        }
    }

    fn timeout(&self) -> Duration {
        self.kind.timeout()
    }
}

/// Register a handler for every [`TaskKind`] and the archive error handler.
pub fn register(builder: JobRuntimeBuilder, ctx: Arc<TaskContext>) -> JobRuntimeBuilder {
    let builder = TaskKind::iter().fold(builder, |builder, kind| {
        builder.handler(kind.as_ref(), Arc::new(TaskHandler::new(kind, ctx.clone())))
    });
    builder.error_handler(Arc::new(ArchiveErrorHandler::new(ctx)))
}

/// Kick off the task chain for a freshly created queue.
pub async fn start_archive(ctx: &TaskContext, queue: &QueueDbModel) -> Result<JobDbModel> {
    info!(queue_id = %queue.id, video_id = %queue.video_id, live = queue.live_archive, "Starting archive");
    ctx.enqueue(TaskKind::CreateDirectory, &queue.id, None).await
}

/// Operator resume: move a failed stage back to `pending` and run it again
/// with the chain continuing from there.
pub async fn restart_task(ctx: &TaskContext, queue_id: &str, kind: TaskKind) -> Result<JobDbModel> {
    if let Some(stage) = kind.stage() {
        ctx.queues.reset_failed_stage(queue_id, stage).await?;
    }
    ctx.queues.set_on_hold(queue_id, false).await?;
    info!(queue_id, kind = %kind, "Restarting task");
    ctx.enqueue(kind, queue_id, None).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_and_routing() {
        assert_eq!(TaskKind::DownloadLiveVideo.as_ref(), "download_live_video");
        assert_eq!(
            "update_stream_video_id".parse::<TaskKind>().unwrap(),
            TaskKind::UpdateStreamVideoId
        );
        assert_eq!(TaskKind::RenderChat.queue(), QueueName::ChatRender);
        assert_eq!(TaskKind::DownloadLiveVideo.queue(), QueueName::VideoDownload);
        assert_eq!(TaskKind::MoveChat.queue(), QueueName::Default);
    }

    #[test]
    fn test_tags_and_attempts() {
        assert!(TaskKind::Watchdog.tags().is_empty());
        assert_eq!(TaskKind::Watchdog.max_attempts(), 1);
        assert!(TaskKind::UpdateStreamVideoId.tags().contains(&ALLOW_FAIL_TAG));
        assert!(!TaskKind::DownloadVideo.tags().contains(&ALLOW_FAIL_TAG));
        assert_eq!(TaskKind::ConvertChat.max_attempts(), 3);
        assert_eq!(TaskKind::DownloadLiveChat.max_attempts(), 1);
    }

    #[test]
    fn test_stage_mapping() {
        for kind in TaskKind::iter() {
            let expected_none = matches!(
                kind,
                TaskKind::DownloadThumbnailMinimal | TaskKind::UpdateStreamVideoId | TaskKind::Watchdog
            );
            assert_eq!(kind.stage().is_none(), expected_none, "{kind}");
        }
        assert_eq!(TaskKind::DownloadLiveChat.stage(), Some(Stage::DownloadChat));
        assert!(TaskKind::DownloadLiveVideo.is_live_capture());
        assert!(!TaskKind::DownloadVideo.is_live_capture());
    }
}
