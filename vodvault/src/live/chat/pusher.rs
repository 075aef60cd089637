//! Pusher-style chat websocket.
//!
//! Every frame is an envelope `{"event", "channel", "data"}` where `data` is
//! usually a JSON-encoded string. Chat envelopes have their payload appended
//! as-is; conversion into comments happens after capture.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, trace};

use super::capture::{ChatProtocol, FrameAction};

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone)]
pub struct PusherChatProtocol {
    url: String,
    chatroom_id: String,
    channel_id: String,
    chat_event: String,
}

impl PusherChatProtocol {
    pub fn new(
        url: impl Into<String>,
        chatroom_id: impl Into<String>,
        channel_id: impl Into<String>,
        chat_event: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            chatroom_id: chatroom_id.into(),
            channel_id: channel_id.into(),
            chat_event: chat_event.into(),
        }
    }

    fn subscribe(channel: String) -> String {
        json!({
            "event": "pusher:subscribe",
            "data": { "auth": "", "channel": channel },
        })
        .to_string()
    }
}

impl ChatProtocol for PusherChatProtocol {
    fn name(&self) -> &'static str {
        "pusher"
    }

    fn websocket_url(&self) -> String {
        self.url.clone()
    }

    fn handshake_messages(&self) -> Vec<String> {
        vec![
            Self::subscribe(format!("chatrooms.{}.v2", self.chatroom_id)),
            Self::subscribe(format!("channel.{}", self.channel_id)),
        ]
    }

    fn decode(&self, text: &str) -> Vec<FrameAction> {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "Ignoring malformed pusher frame");
                return vec![FrameAction::Ignore];
            }
        };

        if envelope.event == "pusher:ping" {
            return vec![FrameAction::Reply(
                json!({ "event": "pusher:pong", "data": {} }).to_string(),
            )];
        }
        if envelope.event != self.chat_event {
            trace!(event = %envelope.event, "Ignoring pusher event");
            return vec![FrameAction::Ignore];
        }

        let payload = match envelope.data {
            Value::String(raw) => match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(e) => {
                    debug!(error = %e, "Chat event payload is not JSON");
                    return vec![FrameAction::Ignore];
                }
            },
            other => other,
        };
        vec![FrameAction::Append(payload)]
    }
}
