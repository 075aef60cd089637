//! Archive notifications.
//!
//! The pipeline reports four moments: a VOD archive finished, a live archive
//! finished, an archive went live, and a task failed for good. Delivery is a
//! [`Notifier`]; shipped implementations post to a webhook or just log.

mod webhook;

pub use webhook::{WebhookConfig, WebhookNotifier};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::Result;
use crate::database::models::{ChannelDbModel, VideoDbModel};

/// The archive a notification is about.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveEvent {
    pub queue_id: String,
    pub video: VideoDbModel,
    pub channel: ChannelDbModel,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    VideoSuccess {
        #[serde(flatten)]
        archive: ArchiveEvent,
    },
    LiveSuccess {
        #[serde(flatten)]
        archive: ArchiveEvent,
    },
    IsLive {
        #[serde(flatten)]
        archive: ArchiveEvent,
    },
    Error {
        #[serde(flatten)]
        archive: ArchiveEvent,
        task: String,
        message: String,
    },
}

impl NotificationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::VideoSuccess { .. } => "video_success",
            Self::LiveSuccess { .. } => "live_success",
            Self::IsLive { .. } => "is_live",
            Self::Error { .. } => "error",
        }
    }

    pub fn archive(&self) -> &ArchiveEvent {
        match self {
            Self::VideoSuccess { archive }
            | Self::LiveSuccess { archive }
            | Self::IsLive { archive }
            | Self::Error { archive, .. } => archive,
        }
    }

    pub fn title(&self) -> String {
        let archive = self.archive();
        match self {
            Self::VideoSuccess { .. } => format!("Archived {}", archive.video.title),
            Self::LiveSuccess { .. } => format!("Live archive of {} finished", archive.channel.display_name),
            Self::IsLive { .. } => format!("{} is live", archive.channel.display_name),
            Self::Error { task, .. } => format!("{task} failed for {}", archive.video.title),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, event: &NotificationEvent) -> Result<()>;

    async fn video_success(&self, archive: &ArchiveEvent) -> Result<()> {
        self.send(&NotificationEvent::VideoSuccess {
            archive: archive.clone(),
        })
        .await
    }

    async fn live_success(&self, archive: &ArchiveEvent) -> Result<()> {
        self.send(&NotificationEvent::LiveSuccess {
            archive: archive.clone(),
        })
        .await
    }

    async fn is_live(&self, archive: &ArchiveEvent) -> Result<()> {
        self.send(&NotificationEvent::IsLive {
            archive: archive.clone(),
        })
        .await
    }

    async fn error(&self, archive: &ArchiveEvent, task: &str, message: &str) -> Result<()> {
        self.send(&NotificationEvent::Error {
            archive: archive.clone(),
            task: task.to_string(),
            message: message.to_string(),
        })
        .await
    }
}

/// Notifier that writes events to the log only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        let archive = event.archive();
        info!(
            event = event.event_type(),
            queue_id = %archive.queue_id,
            video_id = %archive.video.id,
            channel = %archive.channel.login,
            "{}",
            event.title()
        );
        Ok(())
    }
}
