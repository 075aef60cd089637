//! Chat records: the normalized comment captured from IRC, conversion of raw
//! live captures into the renderer's document format, and comment counting.

use std::path::Path;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::time::{ms_to_datetime, now_ms};
use crate::utils::fs::io_error;
use crate::utils::json_append::read_json_array;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatBadge {
    pub id: String,
    pub version: String,
}

/// Character range of an emote inside the message body (inclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmotePosition {
    pub id: String,
    pub begin: usize,
    pub end: usize,
}

/// A chat message as captured live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatComment {
    pub id: String,
    /// Epoch milliseconds at which the platform accepted the message.
    pub sent_at: i64,
    pub user_id: String,
    pub user_login: String,
    pub display_name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub badges: Vec<ChatBadge>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emotes: Vec<EmotePosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bits: Option<u32>,
}

impl ChatComment {
    /// Interpret one raw capture record.
    ///
    /// Accepts normalized comments and pusher chat payloads
    /// (`content`, `created_at`, `sender.{id,username,slug,identity}`).
    pub fn from_record(record: &Value) -> Option<Self> {
        if let Ok(comment) = serde_json::from_value::<ChatComment>(record.clone()) {
            return Some(comment);
        }

        let content = record.get("content")?.as_str()?;
        let sender = record.get("sender")?;
        let username = sender.get("username")?.as_str()?;
        let sent_at = record
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(now_ms);
        let identity = sender.get("identity");
        let badges = identity
            .and_then(|i| i.get("badges"))
            .and_then(Value::as_array)
            .map(|badges| {
                badges
                    .iter()
                    .filter_map(|b| {
                        Some(ChatBadge {
                            id: b.get("type")?.as_str()?.to_string(),
                            version: b
                                .get("count")
                                .map(value_to_string)
                                .unwrap_or_else(|| "1".to_string()),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            id: record
                .get("id")
                .map(value_to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            sent_at,
            user_id: sender
                .get("id")
                .map(value_to_string)
                .unwrap_or_else(|| username.to_string()),
            user_login: sender
                .get("slug")
                .and_then(Value::as_str)
                .unwrap_or(username)
                .to_string(),
            display_name: username.to_string(),
            message: content.to_string(),
            color: identity
                .and_then(|i| i.get("color"))
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            badges,
            emotes: Vec::new(),
            bits: None,
        })
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatStreamer {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatVideoRange {
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCommenter {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessageBody {
    pub body: String,
    #[serde(default)]
    pub bits_spent: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_color: Option<String>,
    #[serde(default)]
    pub user_badges: Vec<ChatBadge>,
    #[serde(default)]
    pub emoticons: Vec<EmotePosition>,
}

/// A comment positioned on the video timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderComment {
    #[serde(rename = "_id")]
    pub id: String,
    pub created_at: String,
    pub content_offset_seconds: f64,
    pub commenter: ChatCommenter,
    pub message: ChatMessageBody,
}

/// Chat document consumed by the renderer and stored next to the video.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatDocument {
    pub streamer: ChatStreamer,
    pub video: ChatVideoRange,
    pub comments: Vec<RenderComment>,
}

impl ChatDocument {
    /// Place `comments` on the timeline starting at `chat_start_ms`.
    ///
    /// Without a start the first comment is offset zero. Messages received
    /// before the start are clamped to zero.
    pub fn from_comments(
        streamer: ChatStreamer,
        mut comments: Vec<ChatComment>,
        chat_start_ms: Option<i64>,
    ) -> Self {
        comments.sort_by_key(|c| c.sent_at);
        let start = chat_start_ms
            .or_else(|| comments.first().map(|c| c.sent_at))
            .unwrap_or(0);

        let comments: Vec<RenderComment> = comments
            .into_iter()
            .map(|c| RenderComment {
                created_at: ms_to_datetime(c.sent_at).to_rfc3339(),
                content_offset_seconds: (c.sent_at - start).max(0) as f64 / 1000.0,
                commenter: ChatCommenter {
                    id: c.user_id,
                    name: c.user_login,
                    display_name: c.display_name,
                },
                message: ChatMessageBody {
                    body: c.message,
                    bits_spent: c.bits.unwrap_or(0),
                    user_color: c.color,
                    user_badges: c.badges,
                    emoticons: c.emotes,
                },
                id: c.id,
            })
            .collect();

        let end = comments
            .last()
            .map(|c| c.content_offset_seconds)
            .unwrap_or(0.0);

        Self {
            streamer,
            video: ChatVideoRange { start: 0.0, end },
            comments,
        }
    }
}

/// Convert the raw live capture at `raw_path` into a [`ChatDocument`] at
/// `out_path`. Returns the number of comments written.
///
/// A missing or empty capture converts to a document with no comments.
/// Records that are neither comment shape are skipped.
pub async fn convert_live_chat(
    raw_path: &Path,
    out_path: &Path,
    streamer: ChatStreamer,
    chat_start_ms: Option<i64>,
) -> Result<usize> {
    let records = read_json_array(raw_path).await?;
    let total = records.len();
    let comments: Vec<ChatComment> = records.iter().filter_map(ChatComment::from_record).collect();
    if comments.len() < total {
        tracing::debug!(
            skipped = total - comments.len(),
            path = %raw_path.display(),
            "Skipped non-comment chat records"
        );
    }

    let document = ChatDocument::from_comments(streamer, comments, chat_start_ms);
    let count = document.comments.len();
    let encoded = serde_json::to_vec(&document)?;
    tokio::fs::write(out_path, encoded)
        .await
        .map_err(|e| io_error("writing", out_path, e))?;
    Ok(count)
}

/// Number of comments in a chat file.
///
/// Understands a bare JSON array, a document with a `comments` array, and
/// an empty (zero byte) file.
pub async fn count_chat_comments(path: &Path) -> Result<usize> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(io_error("reading", path, e)),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(0);
    }

    match serde_json::from_slice::<Value>(&bytes)? {
        Value::Array(items) => Ok(items.len()),
        Value::Object(map) => match map.get("comments") {
            Some(Value::Array(items)) => Ok(items.len()),
            Some(Value::Null) | None => Ok(0),
            Some(_) => Err(Error::validation(format!(
                "{}: `comments` is not an array",
                path.display()
            ))),
        },
        _ => Err(Error::validation(format!(
            "{}: not a chat document",
            path.display()
        ))),
    }
}
