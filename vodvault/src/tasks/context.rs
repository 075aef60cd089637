//! Shared state for task units and the per-attempt unit scope.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::DropGuard;
use tracing::{debug, info};

use super::TaskKind;
use super::completion::check_completion;
use crate::Result;
use crate::config::{AppConfig, PipelineTimings};
use crate::database::DbPool;
use crate::database::models::{
    ChannelDbModel, JobDbModel, QueueDbModel, Stage, TaskStatus, VideoDbModel,
};
use crate::database::repositories::{
    ChannelRepository, ChapterRepository, QueueRepository, RunningJobStore, SqlxChannelRepository,
    SqlxChapterRepository, SqlxJobRepository, SqlxQueueRepository, SqlxVideoRepository,
    VideoRepository,
};
use crate::database::time::ms_after;
use crate::jobs::{ArchiveVideoArgs, JobClient, spawn_heartbeat};
use crate::notification::{ArchiveEvent, Notifier};
use crate::platform::PlatformClient;
use crate::toolchain::ArchiveToolchain;

/// Result of moving a stage to `success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// This call moved the stage.
    Moved,
    /// Another attempt had already moved it.
    AlreadySucceeded,
    /// The stage ended in `failed`; the chain stops here.
    Finalized,
}

/// Settings the task units read.
#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub log_dir: PathBuf,
    pub video_hls: bool,
    pub timings: PipelineTimings,
}

impl TaskSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            log_dir: config.log_dir.clone(),
            video_hls: config.video_hls,
            timings: config.timings,
        }
    }

    /// External process log for one stage of one archive.
    pub fn process_log(&self, video_id: &str, kind: TaskKind) -> PathBuf {
        self.log_dir
            .join("archives")
            .join(video_id)
            .join(format!("{kind}.log"))
    }
}

pub struct TaskContext {
    pub queues: Arc<dyn QueueRepository>,
    pub videos: Arc<dyn VideoRepository>,
    pub channels: Arc<dyn ChannelRepository>,
    pub chapters: Arc<dyn ChapterRepository>,
    pub running: Arc<dyn RunningJobStore>,
    pub client: JobClient,
    pub platform: Arc<dyn PlatformClient>,
    pub toolchain: Arc<dyn ArchiveToolchain>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: TaskSettings,
}

impl TaskContext {
    /// Context over the sqlx repositories of `pool`.
    pub fn new(
        pool: DbPool,
        client: JobClient,
        platform: Arc<dyn PlatformClient>,
        toolchain: Arc<dyn ArchiveToolchain>,
        notifier: Arc<dyn Notifier>,
        settings: TaskSettings,
    ) -> Self {
        Self {
            queues: Arc::new(SqlxQueueRepository::new(pool.clone())),
            videos: Arc::new(SqlxVideoRepository::new(pool.clone())),
            channels: Arc::new(SqlxChannelRepository::new(pool.clone())),
            chapters: Arc::new(SqlxChapterRepository::new(pool.clone())),
            running: Arc::new(SqlxJobRepository::new(pool)),
            client,
            platform,
            toolchain,
            notifier,
            settings,
        }
    }

    /// Insert a job of `kind` for `queue_id` with the chain continuing.
    pub async fn enqueue(
        &self,
        kind: TaskKind,
        queue_id: &str,
        delay: Option<Duration>,
    ) -> Result<JobDbModel> {
        let args = ArchiveVideoArgs::new(queue_id, true);
        let scheduled_at = delay.map(ms_after);
        self.client
            .insert(kind.as_ref(), &args, kind.insert_opts(scheduled_at))
            .await
    }

    /// Enter a unit: mark its stage running, start its heartbeat and load
    /// the archive it works on.
    pub async fn enter(&self, job: &JobDbModel, kind: TaskKind) -> Result<ArchiveUnit> {
        let args = ArchiveVideoArgs::from_job(job)?;
        if let Some(stage) = kind.stage()
            && !self
                .queues
                .set_stage_status(&args.queue_id, stage, TaskStatus::Running)
                .await?
        {
            debug!(queue_id = %args.queue_id, stage = %stage, "Stage already finished, re-running");
        }

        let heartbeat = spawn_heartbeat(
            self.running.clone(),
            job.id.clone(),
            self.settings.timings.heartbeat_interval,
        );

        let queue = self.queues.get_queue(&args.queue_id).await?;
        let video = self.videos.get_video(&queue.video_id).await?;
        let channel = self.channels.get_channel(&video.channel_id).await?;

        Ok(ArchiveUnit {
            job_id: job.id.clone(),
            kind,
            args,
            queue,
            video,
            channel,
            _heartbeat: heartbeat,
        })
    }

    /// Like [`enqueue`](Self::enqueue), but skipped when a job of `kind`
    /// already exists for `queue_id`.
    pub async fn enqueue_once(
        &self,
        kind: TaskKind,
        queue_id: &str,
        delay: Option<Duration>,
    ) -> Result<Option<JobDbModel>> {
        let args = ArchiveVideoArgs::new(queue_id, true);
        let scheduled_at = delay.map(ms_after);
        self.client
            .insert_once(kind.as_ref(), queue_id, &args, kind.insert_opts(scheduled_at))
            .await
    }

    /// Mark the unit's stage `success`, enqueue `next` when the chain
    /// continues, then run the completion check.
    pub async fn finish(&self, unit: &ArchiveUnit, next: &[(TaskKind, Option<Duration>)]) -> Result<()> {
        let outcome = self.settle_stage(&unit.queue.id, unit.kind.stage()).await?;
        if unit.args.continue_chain {
            self.enqueue_next(&unit.queue.id, outcome, next).await?;
        }
        check_completion(self, &unit.queue.id).await
    }

    /// Move `stage` to `success` and report how that went.
    pub async fn settle_stage(&self, queue_id: &str, stage: Option<Stage>) -> Result<StageOutcome> {
        let Some(stage) = stage else {
            return Ok(StageOutcome::Moved);
        };
        if self
            .queues
            .set_stage_status(queue_id, stage, TaskStatus::Success)
            .await?
        {
            return Ok(StageOutcome::Moved);
        }
        let queue = self.queues.get_queue(queue_id).await?;
        let status = queue.stage_status(stage);
        debug!(queue_id, stage = %stage, status = %status, "Stage was already finalized");
        Ok(if status == TaskStatus::Success {
            StageOutcome::AlreadySucceeded
        } else {
            StageOutcome::Finalized
        })
    }

    /// Enqueue the stages following one that was just settled.
    ///
    /// Inserts are once per archive and kind, so callers racing on the same
    /// stage (a live unit's phase 2 and the watchdog) cannot fork the chain,
    /// and a re-run of a stage that already succeeded fills in successors an
    /// earlier attempt failed to insert.
    pub async fn enqueue_next(
        &self,
        queue_id: &str,
        outcome: StageOutcome,
        next: &[(TaskKind, Option<Duration>)],
    ) -> Result<()> {
        if outcome == StageOutcome::Finalized {
            return Ok(());
        }
        for (kind, delay) in next {
            if let Some(job) = self.enqueue_once(*kind, queue_id, *delay).await?
                && outcome == StageOutcome::AlreadySucceeded
            {
                info!(queue_id, job_id = %job.id, kind = %kind, "Enqueued missing next stage");
            }
        }
        Ok(())
    }

    /// Load the notification payload for `queue_id`.
    pub async fn archive_event(&self, queue_id: &str) -> Result<ArchiveEvent> {
        let queue = self.queues.get_queue(queue_id).await?;
        let video = self.videos.get_video(&queue.video_id).await?;
        let channel = self.channels.get_channel(&video.channel_id).await?;
        Ok(ArchiveEvent {
            queue_id: queue.id,
            video,
            channel,
        })
    }
}

/// One running attempt of an archive unit. Heartbeats stop when dropped.
pub struct ArchiveUnit {
    pub job_id: String,
    pub kind: TaskKind,
    pub args: ArchiveVideoArgs,
    pub queue: QueueDbModel,
    pub video: VideoDbModel,
    pub channel: ChannelDbModel,
    _heartbeat: DropGuard,
}

impl ArchiveUnit {
    pub fn log_path(&self, settings: &TaskSettings) -> PathBuf {
        settings.process_log(&self.video.id, self.kind)
    }

    pub fn event(&self) -> ArchiveEvent {
        ArchiveEvent {
            queue_id: self.queue.id.clone(),
            video: self.video.clone(),
            channel: self.channel.clone(),
        }
    }
}
