//! Reconnecting websocket chat capture.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::utils::json_append::JsonArrayAppender;
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(32);

/// What to do with one decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameAction {
    /// Persist a record.
    Append(Value),
    /// Send a text frame back (keepalive replies).
    Reply(String),
    /// The server asked us to reconnect.
    Reconnect,
    Ignore,
}

/// Wire protocol of a chat websocket.
pub trait ChatProtocol: Send + Sync {
    fn name(&self) -> &'static str;

    fn websocket_url(&self) -> String;

    /// Text frames sent right after connecting.
    fn handshake_messages(&self) -> Vec<String>;

    fn decode(&self, text: &str) -> Vec<FrameAction>;
}

/// Doubling reconnect delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; the following call returns twice as much, up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

enum Disconnect {
    Closed,
    Cancelled,
}

/// Captures one chat room into a JSON array file until cancelled.
pub struct ChatCapture {
    protocol: Box<dyn ChatProtocol>,
    appender: JsonArrayAppender,
    backoff: Backoff,
}

impl ChatCapture {
    pub fn new(protocol: Box<dyn ChatProtocol>, appender: JsonArrayAppender) -> Self {
        Self {
            protocol,
            appender,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run until `cancel` fires.
    ///
    /// `connected` is signalled after the first successful handshake. The
    /// loop reconnects forever on connect failures, read errors and closes;
    /// only cancellation (reported as [`Error::Cancelled`]) and failures to
    /// persist a record end it.
    pub async fn run(
        mut self,
        connected: Option<oneshot::Sender<()>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut connected = connected;
        let protocol_name = self.protocol.name();

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let url = self.protocol.websocket_url();
            info!(protocol = protocol_name, url = %url, "Connecting to chat websocket");
            let connect_result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = connect_async(url.as_str()) => result,
            };

            match connect_result {
                Ok((mut ws, _)) => match self.handshake(&mut ws).await {
                    Ok(()) => {
                        info!(protocol = protocol_name, "Connected to chat");
                        self.backoff.reset();
                        if let Some(tx) = connected.take() {
                            let _ = tx.send(());
                        }
                        match self.read_frames(&mut ws, cancel).await? {
                            Disconnect::Cancelled => return Err(Error::Cancelled),
                            Disconnect::Closed => {
                                warn!(protocol = protocol_name, "Chat connection lost, reconnecting");
                            }
                        }
                    }
                    Err(e) => warn!(protocol = protocol_name, error = %e, "Chat handshake failed"),
                },
                Err(e) => warn!(protocol = protocol_name, error = %e, "Chat connection failed"),
            }

            let delay = self.backoff.next_delay();
            debug!(protocol = protocol_name, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn handshake(&self, ws: &mut WsStream) -> Result<()> {
        for frame in self.protocol.handshake_messages() {
            ws.send(Message::Text(frame.into())).await?;
        }
        Ok(())
    }

    async fn read_frames(&self, ws: &mut WsStream, cancel: &CancellationToken) -> Result<Disconnect> {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return Ok(Disconnect::Cancelled);
                }
                next = ws.next() => next,
            };

            let text = match next {
                Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(_) => {
                        trace!("Ignoring non UTF-8 binary frame");
                        continue;
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    if ws.send(Message::Pong(payload)).await.is_err() {
                        return Ok(Disconnect::Closed);
                    }
                    continue;
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(frame = ?frame, "Chat server closed the connection");
                    return Ok(Disconnect::Closed);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!(error = %e, "Chat read error");
                    return Ok(Disconnect::Closed);
                }
                None => return Ok(Disconnect::Closed),
            };

            for action in self.protocol.decode(&text) {
                match action {
                    FrameAction::Append(record) => self.appender.append(&record).await?,
                    FrameAction::Reply(reply) => {
                        if ws.send(Message::Text(reply.into())).await.is_err() {
                            return Ok(Disconnect::Closed);
                        }
                    }
                    FrameAction::Reconnect => {
                        info!("Chat server requested reconnect");
                        let _ = ws.close(None).await;
                        return Ok(Disconnect::Closed);
                    }
                    FrameAction::Ignore => {}
                }
            }
        }
    }
}
