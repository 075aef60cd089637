//! Live chat capture.

pub mod capture;
pub mod comment;
pub mod irc;
pub mod pusher;

use std::path::Path;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub use capture::{Backoff, ChatCapture, ChatProtocol, FrameAction};
pub use comment::{ChatComment, ChatDocument, ChatStreamer, convert_live_chat, count_chat_comments};
pub use irc::IrcChatProtocol;
pub use pusher::PusherChatProtocol;

use crate::{Error, Result};
use crate::config::LiveConfig;
use crate::database::models::ChannelDbModel;
use crate::utils::json_append::JsonArrayAppender;

/// Which websocket protocol the chat platform speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ChatProtocolKind {
    Irc,
    Pusher,
}

/// Protocol instance for `channel` under the configured kind.
///
/// Pusher chat is subscribed per room, so the channel must carry its
/// chatroom id.
pub fn protocol_for(config: &LiveConfig, channel: &ChannelDbModel) -> Result<Box<dyn ChatProtocol>> {
    let protocol: Box<dyn ChatProtocol> = match config.chat_protocol {
        ChatProtocolKind::Irc => Box::new(IrcChatProtocol::new(&config.irc_url, &channel.login)),
        ChatProtocolKind::Pusher => {
            let chatroom_id = channel.chatroom_id.as_deref().ok_or_else(|| {
                Error::validation(format!("channel {} has no chatroom id", channel.login))
            })?;
            Box::new(PusherChatProtocol::new(
                &config.pusher_url,
                chatroom_id,
                &channel.ext_id,
                &config.pusher_chat_event,
            ))
        }
    };
    Ok(protocol)
}

/// Capture `channel`'s chat into `output` until `cancel` fires.
pub async fn capture_live_chat(
    config: &LiveConfig,
    channel: &ChannelDbModel,
    output: &Path,
    connected: Option<oneshot::Sender<()>>,
    cancel: &CancellationToken,
) -> Result<()> {
    let protocol = protocol_for(config, channel)?;
    crate::utils::fs::ensure_parent_dir(output).await?;
    ChatCapture::new(protocol, JsonArrayAppender::new(output))
        .run(connected, cancel)
        .await
}
