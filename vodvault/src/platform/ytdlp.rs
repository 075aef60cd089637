//! [`PlatformClient`] backed by `yt-dlp -J`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    PlatformChannel, PlatformChapter, PlatformClient, PlatformMutedSegment, PlatformStream,
    PlatformVideo,
};
use crate::downloader::capture_stdout;
use crate::{Error, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(120);

pub struct YtDlpPlatformClient {
    program: String,
    base_url: String,
}

impl YtDlpPlatformClient {
    pub fn new(program: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn dump_json(&self, extra: &[&str], url: &str) -> Result<Value> {
        let mut args = vec!["-J", "--no-warnings"];
        args.extend_from_slice(extra);
        args.push(url);
        debug!(program = %self.program, url, "Querying platform metadata");

        let cancel = CancellationToken::new();
        let stdout = tokio::time::timeout(
            PROBE_TIMEOUT,
            capture_stdout(&self.program, &args, &cancel),
        )
        .await
        .map_err(|_| Error::Timeout(PROBE_TIMEOUT))??;
        Ok(serde_json::from_slice(&stdout)?)
    }
}

#[async_trait]
impl PlatformClient for YtDlpPlatformClient {
    async fn get_video(&self, video_id: &str) -> Result<PlatformVideo> {
        let url = format!("{}/videos/{}", self.base_url, video_id.trim_start_matches('v'));
        let info = self.dump_json(&[], &url).await?;
        parse_video(&info)
    }

    async fn get_live_stream(&self, channel_login: &str) -> Result<Option<PlatformStream>> {
        let url = format!("{}/{}", self.base_url, channel_login.to_lowercase());
        match self.dump_json(&[], &url).await {
            Ok(info) => parse_stream(&info).map(Some),
            Err(Error::CommandFailed { stderr, .. }) if is_offline_message(&stderr) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_channel(&self, channel_login: &str) -> Result<PlatformChannel> {
        let url = format!("{}/{}/videos", self.base_url, channel_login.to_lowercase());
        let info = self
            .dump_json(&["--flat-playlist", "--playlist-end", "1"], &url)
            .await?;
        Ok(PlatformChannel {
            id: str_field(&info, &["channel_id", "uploader_id", "id"])
                .unwrap_or_else(|| channel_login.to_lowercase()),
            chatroom_id: str_field(&info, &["chatroom_id"])
                .or_else(|| info.get("chatroom").and_then(|room| str_field(room, &["id"]))),
            login: str_field(&info, &["uploader_id"]).unwrap_or_else(|| channel_login.to_lowercase()),
            display_name: str_field(&info, &["uploader", "channel"])
                .unwrap_or_else(|| channel_login.to_string()),
        })
    }

    async fn get_videos(&self, channel_login: &str) -> Result<Vec<PlatformVideo>> {
        let url = format!("{}/{}/videos", self.base_url, channel_login.to_lowercase());
        let info = self.dump_json(&["--flat-playlist"], &url).await?;
        Ok(info
            .get("entries")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(|e| parse_video(e).ok()).collect())
            .unwrap_or_default())
    }
}

fn is_offline_message(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("not currently live") || lower.contains("is offline")
}

fn str_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn secs_field(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(Value::as_f64).map(|f| f.round() as i64)
}

/// Parse a VOD from yt-dlp's info JSON (full or flat-playlist entry).
pub fn parse_video(info: &Value) -> Result<PlatformVideo> {
    let id = str_field(info, &["id"])
        .ok_or_else(|| Error::validation("video info has no id"))?
        .trim_start_matches('v')
        .to_string();

    let chapters = info
        .get("chapters")
        .and_then(Value::as_array)
        .map(|chapters| {
            chapters
                .iter()
                .map(|c| PlatformChapter {
                    chapter_type: str_field(c, &["type"]),
                    title: str_field(c, &["title"]).unwrap_or_default(),
                    start_secs: secs_field(c, "start_time").unwrap_or(0),
                    end_secs: secs_field(c, "end_time").unwrap_or(0),
                })
                .collect()
        })
        .unwrap_or_default();

    let muted_segments = info
        .get("muted_segments")
        .and_then(Value::as_array)
        .map(|segments| {
            segments
                .iter()
                .filter_map(|s| {
                    let start = secs_field(s, "offset").or_else(|| secs_field(s, "start_time"))?;
                    let end = match secs_field(s, "duration") {
                        Some(duration) => start + duration,
                        None => secs_field(s, "end_time")?,
                    };
                    Some(PlatformMutedSegment {
                        start_secs: start,
                        end_secs: end,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(PlatformVideo {
        id,
        stream_id: str_field(info, &["stream_id"]),
        title: str_field(info, &["title", "fulltitle"]).unwrap_or_default(),
        duration_secs: secs_field(info, "duration").unwrap_or(0),
        thumbnail_url: str_field(info, &["thumbnail"]),
        chapters,
        muted_segments,
        raw: info.clone(),
    })
}

pub fn parse_stream(info: &Value) -> Result<PlatformStream> {
    Ok(PlatformStream {
        id: str_field(info, &["id"]).ok_or_else(|| Error::validation("stream info has no id"))?,
        title: str_field(info, &["description", "title"]).unwrap_or_default(),
        thumbnail_url: str_field(info, &["thumbnail"]),
        raw: info.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_video() {
        let info = json!({
            "id": "v123456",
            "title": "Speedrun",
            "duration": 3600.4,
            "thumbnail": "https://cdn.example/thumb.jpg",
            "chapters": [
                {"start_time": 0.0, "end_time": 1800.0, "title": "Just Chatting"},
                {"start_time": 1800.0, "end_time": 3600.0, "title": "Game"}
            ],
            "muted_segments": [{"offset": 120, "duration": 30}]
        });
        let video = parse_video(&info).unwrap();
        assert_eq!(video.id, "123456");
        assert_eq!(video.duration_secs, 3600);
        assert_eq!(video.chapters.len(), 2);
        assert_eq!(video.chapters[1].start_secs, 1800);
        assert_eq!(
            video.muted_segments,
            vec![PlatformMutedSegment {
                start_secs: 120,
                end_secs: 150
            }]
        );
        assert_eq!(video.raw, info);
        assert!(parse_video(&json!({"title": "no id"})).is_err());
    }

    #[test]
    fn test_parse_stream_and_offline() {
        let stream = parse_stream(&json!({"id": 98765, "description": "live now"})).unwrap();
        assert_eq!(stream.id, "98765");
        assert_eq!(stream.title, "live now");
        assert!(is_offline_message("ERROR: [twitch:stream] alice: The channel is not currently live"));
        assert!(!is_offline_message("ERROR: HTTP Error 500"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_client_runs_program() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-yt-dlp");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             case \"$*\" in\n\
               *offline*) echo 'ERROR: The channel is not currently live' >&2; exit 1 ;;\n\
               *flat-playlist*) printf '{\"uploader\":\"Alice\",\"uploader_id\":\"alice\",\"entries\":[{\"id\":\"v1\",\"title\":\"a\"},{\"id\":\"v2\",\"title\":\"b\",\"stream_id\":\"s2\"}]}' ;;\n\
               *) printf '{\"id\":\"v7\",\"title\":\"seven\",\"duration\":70}' ;;\n\
             esac\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let client = YtDlpPlatformClient::new(script.to_str().unwrap(), "https://www.twitch.tv/");
        assert_eq!(client.get_video("7").await.unwrap().title, "seven");
        assert!(client.get_live_stream("offline").await.unwrap().is_none());

        let videos = client.get_videos("alice").await.unwrap();
        assert_eq!(videos.len(), 2);
        assert_eq!(videos[1].stream_id.as_deref(), Some("s2"));

        let channel = client.get_channel("alice").await.unwrap();
        assert_eq!(channel.display_name, "Alice");
        assert_eq!(channel.login, "alice");
        assert!(channel.chatroom_id.is_none());
    }
}
