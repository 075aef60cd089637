//! Chapter and muted segment models, written by the save-info stage.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChapterDbModel {
    pub id: String,
    pub video_id: String,
    /// e.g. `GAME_CHANGE`
    pub chapter_type: String,
    pub title: String,
    pub start_secs: i64,
    pub end_secs: i64,
}

impl ChapterDbModel {
    pub fn new(
        video_id: impl Into<String>,
        chapter_type: impl Into<String>,
        title: impl Into<String>,
        start_secs: i64,
        end_secs: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            video_id: video_id.into(),
            chapter_type: chapter_type.into(),
            title: title.into(),
            start_secs,
            end_secs,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct MutedSegmentDbModel {
    pub id: String,
    pub video_id: String,
    pub start_secs: i64,
    pub end_secs: i64,
}

impl MutedSegmentDbModel {
    pub fn new(video_id: impl Into<String>, start_secs: i64, end_secs: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            video_id: video_id.into(),
            start_secs,
            end_secs,
        }
    }
}
