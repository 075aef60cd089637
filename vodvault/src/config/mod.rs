//! Application configuration loaded from the environment.
//!
//! Every setting has a default so a bare `vodvault` invocation works against a
//! local `vodvault.db`. A `.env` file is honoured by `main` via `dotenvy`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::downloader::proxy::{ProxyCandidate, ProxyConfig};
use crate::live::chat::ChatProtocolKind;
use crate::{Error, Result};

/// Paths (or bare names resolved via `PATH`) of the external tools.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub yt_dlp: String,
    pub streamlink: String,
    pub ffmpeg: String,
    pub ffprobe: String,
    /// Chat downloader/renderer CLI (download and render sub-commands).
    pub chat_downloader: String,
}

/// Worker pool sizes, one per job queue.
#[derive(Debug, Clone, Copy)]
pub struct WorkerCounts {
    pub default: usize,
    pub video_download: usize,
    pub video_postprocess: usize,
    pub chat_render: usize,
}

#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub chat_protocol: ChatProtocolKind,
    pub irc_url: String,
    pub pusher_url: String,
    /// Envelope `event` name that carries chat messages on the pusher socket.
    pub pusher_chat_event: String,
    pub platform_base_url: String,
    pub streamlink_args: Vec<String>,
    pub proxy: ProxyConfig,
}

/// Intervals and delays used by the task chain.
#[derive(Debug, Clone, Copy)]
pub struct PipelineTimings {
    pub heartbeat_interval: Duration,
    pub watchdog_interval: Duration,
    pub watchdog_stale_after: Duration,
    pub minimal_thumbnail_delay: Duration,
    pub update_stream_id_delay: Duration,
    pub poll_interval: Duration,
}

impl Default for PipelineTimings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(60),
            watchdog_interval: Duration::from_secs(30),
            // Shorter than heartbeat interval plus jitter; kept as deployed.
            watchdog_stale_after: Duration::from_secs(90),
            minimal_thumbnail_delay: Duration::from_secs(5 * 60),
            update_stream_id_delay: Duration::from_secs(10 * 60),
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub log_dir: PathBuf,
    pub videos_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub tools: ToolPaths,
    pub workers: WorkerCounts,
    pub live: LiveConfig,
    /// Package post-processed video as HLS in addition to the MP4.
    pub video_hls: bool,
    pub webhook_url: Option<String>,
    /// Bearer token sent with webhook requests.
    pub webhook_token: Option<String>,
    pub timings: PipelineTimings,
}

impl AppConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let defaults = PipelineTimings::default();

        let proxy_candidates: Vec<ProxyCandidate> = match lookup("LIVE_PROXY_LIST") {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
                .map_err(|e| Error::config(format!("LIVE_PROXY_LIST: {e}")))?,
            _ => Vec::new(),
        };

        Ok(Self {
            database_url: get("DATABASE_URL", "sqlite:vodvault.db?mode=rwc"),
            log_dir: PathBuf::from(get("LOG_DIR", "logs")),
            videos_dir: PathBuf::from(get("VIDEOS_DIR", "/data/videos")),
            temp_dir: PathBuf::from(get("TEMP_DIR", "/data/temp")),
            tools: ToolPaths {
                yt_dlp: get("YTDLP_PATH", "yt-dlp"),
                streamlink: get("STREAMLINK_PATH", "streamlink"),
                ffmpeg: get("FFMPEG_PATH", "ffmpeg"),
                ffprobe: get("FFPROBE_PATH", "ffprobe"),
                chat_downloader: get("CHAT_DOWNLOADER_PATH", "TwitchDownloaderCLI"),
            },
            workers: WorkerCounts {
                default: parse_or(&lookup, "MAX_DEFAULT_WORKERS", 25)?,
                video_download: parse_or(&lookup, "MAX_VIDEO_DOWNLOAD_WORKERS", 2)?,
                video_postprocess: parse_or(&lookup, "MAX_VIDEO_POSTPROCESS_WORKERS", 1)?,
                chat_render: parse_or(&lookup, "MAX_CHAT_RENDER_WORKERS", 2)?,
            },
            live: LiveConfig {
                chat_protocol: parse_or(&lookup, "LIVE_CHAT_PROTOCOL", ChatProtocolKind::Irc)?,
                irc_url: get("LIVE_CHAT_IRC_URL", "wss://irc-ws.chat.twitch.tv:443"),
                pusher_url: get("LIVE_CHAT_PUSHER_URL", ""),
                pusher_chat_event: get("LIVE_CHAT_PUSHER_EVENT", r"App\Events\ChatMessageEvent"),
                platform_base_url: get("PLATFORM_BASE_URL", "https://www.twitch.tv"),
                streamlink_args: split_list(&get("STREAMLINK_ARGS", ""), ' '),
                proxy: ProxyConfig {
                    enabled: parse_or(&lookup, "LIVE_PROXY_ENABLED", false)?,
                    candidates: proxy_candidates,
                    whitelist: split_list(&get("LIVE_PROXY_WHITELIST", ""), ','),
                    test_url: get("LIVE_PROXY_TEST_URL", "https://www.twitch.tv"),
                },
            },
            video_hls: parse_or(&lookup, "VIDEO_HLS", false)?,
            webhook_url: lookup("WEBHOOK_URL").filter(|s| !s.trim().is_empty()),
            webhook_token: lookup("WEBHOOK_TOKEN").filter(|s| !s.trim().is_empty()),
            timings: PipelineTimings {
                heartbeat_interval: secs_or(&lookup, "HEARTBEAT_INTERVAL_SECS", defaults.heartbeat_interval)?,
                watchdog_interval: secs_or(&lookup, "WATCHDOG_INTERVAL_SECS", defaults.watchdog_interval)?,
                watchdog_stale_after: secs_or(&lookup, "WATCHDOG_STALE_SECS", defaults.watchdog_stale_after)?,
                minimal_thumbnail_delay: secs_or(
                    &lookup,
                    "MINIMAL_THUMBNAIL_DELAY_SECS",
                    defaults.minimal_thumbnail_delay,
                )?,
                update_stream_id_delay: secs_or(
                    &lookup,
                    "UPDATE_STREAM_ID_DELAY_SECS",
                    defaults.update_stream_id_delay,
                )?,
                poll_interval: Duration::from_millis(parse_or(&lookup, "JOB_POLL_INTERVAL_MS", 1000)?),
            },
        })
    }

    /// Per-archive directory holding external process logs.
    pub fn process_log_dir(&self, video_id: &str) -> PathBuf {
        self.log_dir.join("archives").join(video_id)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("{key}={raw}: {e}"))),
        _ => Ok(default),
    }
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
}

fn split_list(raw: &str, sep: char) -> Vec<String> {
    raw.split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
