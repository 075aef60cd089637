//! Streaming platform metadata seam.

pub mod ytdlp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use ytdlp::YtDlpPlatformClient;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformChapter {
    pub chapter_type: Option<String>,
    pub title: String,
    pub start_secs: i64,
    pub end_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformMutedSegment {
    pub start_secs: i64,
    pub end_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformVideo {
    pub id: String,
    /// Live stream this VOD was recorded from, when the platform reports it.
    pub stream_id: Option<String>,
    pub title: String,
    pub duration_secs: i64,
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub chapters: Vec<PlatformChapter>,
    #[serde(default)]
    pub muted_segments: Vec<PlatformMutedSegment>,
    /// Untouched platform response, stored as the archive's info file.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformStream {
    pub id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformChannel {
    pub id: String,
    /// Set by platforms that address chat by a separate room id.
    pub chatroom_id: Option<String>,
    pub login: String,
    pub display_name: String,
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn get_video(&self, video_id: &str) -> Result<PlatformVideo>;

    /// The channel's current stream, `None` when offline.
    async fn get_live_stream(&self, channel_login: &str) -> Result<Option<PlatformStream>>;

    async fn get_channel(&self, channel_login: &str) -> Result<PlatformChannel>;

    /// The channel's VODs, newest first.
    async fn get_videos(&self, channel_login: &str) -> Result<Vec<PlatformVideo>>;
}
