//! Queue model: per-archive stage state.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

/// Status of one pipeline stage.
///
/// Ordered as a lattice `pending < running < {success, failed}`; stages only
/// move forward except through the explicit operator reset.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// Statuses from which a stage may move to `self`.
    ///
    /// `running -> running` is allowed so a retried attempt can re-enter.
    pub fn allowed_predecessors(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[],
            Self::Running | Self::Success | Self::Failed => &[Self::Pending, Self::Running],
        }
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        next.allowed_predecessors().contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// A named pipeline stage with its own status column on the queue row.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    CreateFolder,
    DownloadThumbnail,
    SaveInfo,
    DownloadVideo,
    ConvertVideo,
    MoveVideo,
    DownloadChat,
    ConvertChat,
    RenderChat,
    MoveChat,
}

impl Stage {
    /// Column backing this stage. Only ever interpolated from this closed set.
    pub fn column(&self) -> &'static str {
        match self {
            Self::CreateFolder => "task_create_folder",
            Self::DownloadThumbnail => "task_download_thumbnail",
            Self::SaveInfo => "task_save_info",
            Self::DownloadVideo => "task_download_video",
            Self::ConvertVideo => "task_convert_video",
            Self::MoveVideo => "task_move_video",
            Self::DownloadChat => "task_download_chat",
            Self::ConvertChat => "task_convert_chat",
            Self::RenderChat => "task_render_chat",
            Self::MoveChat => "task_move_chat",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QueueDbModel {
    pub id: String,
    pub video_id: String,
    pub live_archive: bool,
    pub on_hold: bool,
    pub video_processing: bool,
    pub chat_processing: bool,
    pub processing: bool,
    pub archive_chat: bool,
    pub render_chat: bool,
    pub task_create_folder: String,
    pub task_download_thumbnail: String,
    pub task_save_info: String,
    pub task_download_video: String,
    pub task_convert_video: String,
    pub task_move_video: String,
    pub task_download_chat: String,
    pub task_convert_chat: String,
    pub task_render_chat: String,
    pub task_move_chat: String,
    /// Live chat capture epoch (epoch ms). Set once.
    pub chat_start: Option<i64>,
    pub live_video_job_id: Option<String>,
    pub live_chat_job_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl QueueDbModel {
    pub fn new(
        video_id: impl Into<String>,
        live_archive: bool,
        archive_chat: bool,
        render_chat: bool,
    ) -> Self {
        let now = now_ms();
        let pending = TaskStatus::Pending.as_str().to_string();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            video_id: video_id.into(),
            live_archive,
            on_hold: false,
            video_processing: true,
            chat_processing: archive_chat,
            processing: true,
            archive_chat,
            render_chat,
            task_create_folder: pending.clone(),
            task_download_thumbnail: pending.clone(),
            task_save_info: pending.clone(),
            task_download_video: pending.clone(),
            task_convert_video: pending.clone(),
            task_move_video: pending.clone(),
            task_download_chat: pending.clone(),
            task_convert_chat: pending.clone(),
            task_render_chat: pending.clone(),
            task_move_chat: pending,
            chat_start: None,
            live_video_job_id: None,
            live_chat_job_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn raw_status(&self, stage: Stage) -> &str {
        match stage {
            Stage::CreateFolder => &self.task_create_folder,
            Stage::DownloadThumbnail => &self.task_download_thumbnail,
            Stage::SaveInfo => &self.task_save_info,
            Stage::DownloadVideo => &self.task_download_video,
            Stage::ConvertVideo => &self.task_convert_video,
            Stage::MoveVideo => &self.task_move_video,
            Stage::DownloadChat => &self.task_download_chat,
            Stage::ConvertChat => &self.task_convert_chat,
            Stage::RenderChat => &self.task_render_chat,
            Stage::MoveChat => &self.task_move_chat,
        }
    }

    /// Parsed status of a stage. Unknown values read as `pending`.
    pub fn stage_status(&self, stage: Stage) -> TaskStatus {
        self.raw_status(stage).parse().unwrap_or(TaskStatus::Pending)
    }

    /// Stages that must reach `success` before the archive is complete.
    pub fn required_stages(&self) -> Vec<Stage> {
        let mut stages = vec![
            Stage::CreateFolder,
            Stage::SaveInfo,
            Stage::DownloadThumbnail,
            Stage::DownloadVideo,
            Stage::ConvertVideo,
            Stage::MoveVideo,
        ];
        if self.archive_chat {
            stages.push(Stage::DownloadChat);
            if self.live_archive {
                stages.push(Stage::ConvertChat);
            }
            if self.render_chat {
                stages.push(Stage::RenderChat);
            }
            stages.push(Stage::MoveChat);
        }
        stages
    }

    pub fn is_complete(&self) -> bool {
        self.required_stages()
            .into_iter()
            .all(|stage| self.stage_status(stage) == TaskStatus::Success)
    }
}
