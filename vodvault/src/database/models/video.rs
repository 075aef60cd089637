//! Video database model and the archive path layout.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VideoType {
    /// A finished platform VOD.
    Archive,
    /// An in-progress stream captured live.
    Live,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct VideoDbModel {
    pub id: String,
    pub channel_id: String,
    /// Platform VOD id.
    pub ext_id: String,
    /// Platform live stream id.
    pub ext_stream_id: Option<String>,
    pub title: String,
    /// `archive` or `live`
    pub video_type: String,
    /// Requested quality, e.g. `1080p60`, `720p` or `best`.
    pub resolution: String,
    pub duration_secs: i64,
    pub thumbnail_url: Option<String>,
    pub thumbnail_path: String,
    pub info_path: String,
    pub tmp_video_download_path: String,
    pub tmp_video_convert_path: String,
    pub tmp_video_hls_path: String,
    pub video_path: String,
    pub video_hls_path: String,
    pub tmp_chat_download_path: String,
    pub tmp_live_chat_download_path: String,
    pub tmp_live_chat_convert_path: String,
    pub tmp_chat_render_path: String,
    /// Cleared when the archive captured no chat.
    pub chat_path: Option<String>,
    pub chat_video_path: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

fn path_string(path: PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

impl VideoDbModel {
    /// Build a video record with the standard archive layout:
    /// `{videos_dir}/{login}/{ext_id}_{id}/` for final artifacts and
    /// `{temp_dir}/{ext_id}_{id}/` for intermediates.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel_id: impl Into<String>,
        channel_login: &str,
        ext_id: impl Into<String>,
        title: impl Into<String>,
        video_type: VideoType,
        resolution: impl Into<String>,
        videos_dir: &Path,
        temp_dir: &Path,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let ext_id = ext_id.into();
        let folder = format!("{ext_id}_{id}");
        let root = videos_dir.join(channel_login).join(&folder);
        let tmp = temp_dir.join(&folder);
        let now = now_ms();

        Self {
            channel_id: channel_id.into(),
            title: title.into(),
            video_type: video_type.to_string(),
            resolution: resolution.into(),
            duration_secs: 0,
            ext_stream_id: None,
            thumbnail_url: None,
            thumbnail_path: path_string(root.join(format!("{ext_id}-thumbnail.jpg"))),
            info_path: path_string(root.join(format!("{ext_id}-info.json"))),
            tmp_video_download_path: path_string(tmp.join(format!("{ext_id}-video.mp4"))),
            tmp_video_convert_path: path_string(tmp.join(format!("{ext_id}-video-convert.mp4"))),
            tmp_video_hls_path: path_string(tmp.join(format!("{ext_id}-video_hls"))),
            video_path: path_string(root.join(format!("{ext_id}-video.mp4"))),
            video_hls_path: path_string(root.join(format!("{ext_id}-video_hls"))),
            tmp_chat_download_path: path_string(tmp.join(format!("{ext_id}-chat.json"))),
            tmp_live_chat_download_path: path_string(tmp.join(format!("{ext_id}-live-chat.json"))),
            tmp_live_chat_convert_path: path_string(
                tmp.join(format!("{ext_id}-chat-convert.json")),
            ),
            tmp_chat_render_path: path_string(tmp.join(format!("{ext_id}-chat.mp4"))),
            chat_path: Some(path_string(root.join(format!("{ext_id}-chat.json")))),
            chat_video_path: Some(path_string(root.join(format!("{ext_id}-chat.mp4")))),
            id,
            ext_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn video_type(&self) -> Option<VideoType> {
        self.video_type.parse().ok()
    }

    pub fn is_live(&self) -> bool {
        self.video_type() == Some(VideoType::Live)
    }

    /// Directory holding the final artifacts.
    pub fn archive_dir(&self) -> Option<&Path> {
        Path::new(&self.video_path).parent()
    }

    /// Directory holding intermediates.
    pub fn temp_dir(&self) -> Option<&Path> {
        Path::new(&self.tmp_video_download_path).parent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let v = VideoDbModel::new(
            "c1",
            "alice",
            "12345",
            "title",
            VideoType::Archive,
            "best",
            Path::new("/videos"),
            Path::new("/tmp/vv"),
        );
        let archive_dir = v.archive_dir().unwrap();
        assert!(archive_dir.starts_with("/videos/alice"));
        assert!(v.temp_dir().unwrap().starts_with("/tmp/vv"));
        assert!(v.video_path.ends_with("12345-video.mp4"));
        assert_eq!(
            Path::new(v.chat_path.as_deref().unwrap()).parent(),
            Some(archive_dir)
        );
        assert!(!v.is_live());
        assert_eq!(v.video_type(), Some(VideoType::Archive));
    }
}
