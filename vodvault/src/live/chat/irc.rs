//! IRC-over-websocket chat (Twitch style).

use std::collections::HashMap;

use tracing::debug;

use super::capture::{ChatProtocol, FrameAction};
use super::comment::{ChatBadge, ChatComment, EmotePosition};
use crate::database::time::now_ms;

/// Anonymous, read-only IRC session joined to one channel.
#[derive(Debug, Clone)]
pub struct IrcChatProtocol {
    url: String,
    channel: String,
    oauth_token: Option<String>,
}

impl IrcChatProtocol {
    pub fn new(url: impl Into<String>, channel_login: &str) -> Self {
        Self {
            url: url.into(),
            channel: channel_login.trim_start_matches('#').to_lowercase(),
            oauth_token: None,
        }
    }

    pub fn with_oauth(mut self, token: impl Into<String>) -> Self {
        self.oauth_token = Some(token.into());
        self
    }

    fn anonymous_nick() -> String {
        format!("justinfan{}", rand::random::<u32>() % 100_000)
    }

    fn decode_line(&self, line: &str) -> FrameAction {
        if let Some(rest) = line.strip_prefix("PING") {
            return FrameAction::Reply(format!("PONG{rest}"));
        }

        let Some(message) = IrcLine::parse(line) else {
            debug!(line, "Unparseable IRC line");
            return FrameAction::Ignore;
        };
        match message.command {
            "PRIVMSG" => match message.to_comment() {
                Some(comment) => match serde_json::to_value(&comment) {
                    Ok(value) => FrameAction::Append(value),
                    Err(_) => FrameAction::Ignore,
                },
                None => FrameAction::Ignore,
            },
            "RECONNECT" => FrameAction::Reconnect,
            _ => FrameAction::Ignore,
        }
    }
}

impl ChatProtocol for IrcChatProtocol {
    fn name(&self) -> &'static str {
        "irc"
    }

    fn websocket_url(&self) -> String {
        self.url.clone()
    }

    fn handshake_messages(&self) -> Vec<String> {
        let pass = match &self.oauth_token {
            Some(token) if token.starts_with("oauth:") => format!("PASS {token}"),
            Some(token) => format!("PASS oauth:{token}"),
            None => "PASS oauth:".to_string(),
        };
        vec![
            "CAP REQ :twitch.tv/tags twitch.tv/commands".to_string(),
            pass,
            format!("NICK {}", Self::anonymous_nick()),
            format!("JOIN #{}", self.channel),
        ]
    }

    fn decode(&self, text: &str) -> Vec<FrameAction> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| self.decode_line(line))
            .collect()
    }
}

/// `@tags :prefix COMMAND params :trailing`
#[derive(Debug)]
struct IrcLine<'a> {
    tags: HashMap<&'a str, String>,
    prefix: Option<&'a str>,
    command: &'a str,
    trailing: Option<&'a str>,
}

impl<'a> IrcLine<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let mut rest = line;
        let mut tags = HashMap::new();

        if let Some(tagged) = rest.strip_prefix('@') {
            let (raw_tags, after) = tagged.split_once(' ')?;
            for tag in raw_tags.split(';') {
                let (key, value) = tag.split_once('=').unwrap_or((tag, ""));
                tags.insert(key, unescape_tag(value));
            }
            rest = after.trim_start();
        }

        let mut prefix = None;
        if let Some(prefixed) = rest.strip_prefix(':') {
            let (p, after) = prefixed.split_once(' ')?;
            prefix = Some(p);
            rest = after.trim_start();
        }

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };
        let command = head.split_whitespace().next()?;

        Some(Self {
            tags,
            prefix,
            command,
            trailing,
        })
    }

    fn nick(&self) -> Option<&'a str> {
        self.prefix.and_then(|p| p.split('!').next())
    }

    fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    fn to_comment(&self) -> Option<ChatComment> {
        let login = self.nick()?;
        let body = self.trailing?;

        Some(ChatComment {
            id: self
                .tag("id")
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            sent_at: self
                .tag("tmi-sent-ts")
                .and_then(|ts| ts.parse().ok())
                .unwrap_or_else(now_ms),
            user_id: self.tag("user-id").unwrap_or(login).to_string(),
            user_login: login.to_string(),
            display_name: self.tag("display-name").unwrap_or(login).to_string(),
            message: body.to_string(),
            color: self.tag("color").map(str::to_string),
            badges: self.tag("badges").map(parse_badges).unwrap_or_default(),
            emotes: self.tag("emotes").map(parse_emotes).unwrap_or_default(),
            bits: self.tag("bits").and_then(|b| b.parse().ok()),
        })
    }
}

fn unescape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// `broadcaster/1,subscriber/12`
fn parse_badges(raw: &str) -> Vec<ChatBadge> {
    raw.split(',')
        .filter_map(|badge| {
            let (id, version) = badge.split_once('/')?;
            Some(ChatBadge {
                id: id.to_string(),
                version: version.to_string(),
            })
        })
        .collect()
}

/// `25:0-4,12-16/1902:6-10`
fn parse_emotes(raw: &str) -> Vec<EmotePosition> {
    let mut emotes: Vec<EmotePosition> = raw
        .split('/')
        .filter_map(|entry| entry.split_once(':'))
        .flat_map(|(id, ranges)| {
            ranges.split(',').filter_map(move |range| {
                let (begin, end) = range.split_once('-')?;
                Some(EmotePosition {
                    id: id.to_string(),
                    begin: begin.parse().ok()?,
                    end: end.parse().ok()?,
                })
            })
        })
        .collect();
    emotes.sort_by_key(|e| e.begin);
    emotes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol() -> IrcChatProtocol {
        IrcChatProtocol::new("wss://irc.example", "Alice")
    }

    #[test]
    fn test_handshake() {
        let frames = protocol().handshake_messages();
        assert_eq!(frames[0], "CAP REQ :twitch.tv/tags twitch.tv/commands");
        assert_eq!(frames[1], "PASS oauth:");
        assert!(frames[2].starts_with("NICK justinfan"));
        assert_eq!(frames[3], "JOIN #alice");

        let authed = protocol().with_oauth("secret").handshake_messages();
        assert_eq!(authed[1], "PASS oauth:secret");
    }

    #[test]
    fn test_privmsg_becomes_comment() {
        let line = "@badge-info=;badges=broadcaster/1,subscriber/12;color=#1E90FF;\
                    display-name=Bob\\sB;emotes=25:0-4,12-16/1902:6-10;id=msg-1;\
                    tmi-sent-ts=1700000000123;user-id=77 \
                    :bob!bob@bob.tmi.twitch.tv PRIVMSG #alice :Kappa Keepo Kappa";
        let actions = protocol().decode(line);
        let FrameAction::Append(value) = &actions[0] else {
            panic!("expected append, got {actions:?}");
        };
        let comment: ChatComment = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(comment.id, "msg-1");
        assert_eq!(comment.sent_at, 1_700_000_000_123);
        assert_eq!(comment.user_id, "77");
        assert_eq!(comment.user_login, "bob");
        assert_eq!(comment.display_name, "Bob B");
        assert_eq!(comment.message, "Kappa Keepo Kappa");
        assert_eq!(comment.color.as_deref(), Some("#1E90FF"));
        assert_eq!(comment.badges.len(), 2);
        let emote_ids: Vec<&str> = comment.emotes.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(emote_ids, vec!["25", "1902", "25"]);
    }

    #[test]
    fn test_control_lines() {
        let actions = protocol().decode(
            "PING :tmi.twitch.tv\r\n:tmi.twitch.tv 001 justinfan1 :Welcome\r\n:tmi.twitch.tv RECONNECT\r\n",
        );
        assert_eq!(
            actions,
            vec![
                FrameAction::Reply("PONG :tmi.twitch.tv".to_string()),
                FrameAction::Ignore,
                FrameAction::Reconnect,
            ]
        );
    }

    #[test]
    fn test_untagged_privmsg_falls_back_to_nick() {
        let actions = protocol().decode(":carol!carol@carol.tmi.twitch.tv PRIVMSG #alice :hi :)");
        let FrameAction::Append(value) = &actions[0] else {
            panic!("expected append");
        };
        assert_eq!(value["user_login"], "carol");
        assert_eq!(value["display_name"], "carol");
        assert_eq!(value["message"], "hi :)");
    }
}
