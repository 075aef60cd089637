//! [`ArchiveToolchain`] over command-line tools: yt-dlp, streamlink, ffmpeg,
//! ffprobe and the chat downloader/renderer CLI.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::ArchiveToolchain;
use crate::config::{AppConfig, LiveConfig, ToolPaths};
use crate::database::models::ChannelDbModel;
use crate::downloader::{ProcessCommand, capture_stdout, select_closest_quality};
use crate::live::chat::ChatProtocolKind;
use crate::live::{LiveVideoCapture, LiveVideoRequest, chat};
use crate::utils::fs::{ensure_dir_all, ensure_parent_dir, io_error};
use crate::{Error, Result};

pub struct CliToolchain {
    tools: ToolPaths,
    platform_base_url: String,
    live: LiveConfig,
    live_video: LiveVideoCapture,
    http: reqwest::Client,
}

impl CliToolchain {
    pub fn new(config: &AppConfig, http: reqwest::Client) -> Self {
        Self {
            tools: config.tools.clone(),
            platform_base_url: config.live.platform_base_url.trim_end_matches('/').to_string(),
            live: config.live.clone(),
            live_video: LiveVideoCapture::new(
                http.clone(),
                config.tools.streamlink.clone(),
                config.live.clone(),
            ),
            http,
        }
    }

    fn vod_url(&self, video_ext_id: &str) -> String {
        format!("{}/videos/{}", self.platform_base_url, video_ext_id)
    }

    /// yt-dlp format ids offered for a VOD.
    async fn vod_formats(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<String>> {
        let stdout = capture_stdout(&self.tools.yt_dlp, ["-J", "--no-warnings", url], cancel).await?;
        let info: Value = serde_json::from_slice(&stdout)?;
        Ok(info
            .get("formats")
            .and_then(Value::as_array)
            .map(|formats| {
                formats
                    .iter()
                    .filter_map(|f| f.get("format_id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    pub fn video_download_command(
        &self,
        url: &str,
        format: &str,
        output: &Path,
        log_path: &Path,
    ) -> ProcessCommand {
        ProcessCommand::new(&self.tools.yt_dlp, log_path)
            .args(["--no-part", "--newline", "--concurrent-fragments", "4", "-f"])
            .arg(format)
            .arg("-o")
            .arg(output.to_string_lossy().into_owned())
            .arg(url)
    }

    pub fn remux_command(&self, input: &Path, output: &Path, log_path: &Path) -> ProcessCommand {
        ProcessCommand::new(&self.tools.ffmpeg, log_path)
            .args(["-y", "-hide_banner", "-i"])
            .arg(input.to_string_lossy().into_owned())
            .args(["-c", "copy", "-movflags", "+faststart"])
            .arg(output.to_string_lossy().into_owned())
    }

    pub fn hls_command(&self, input: &Path, playlist: &Path, log_path: &Path) -> ProcessCommand {
        ProcessCommand::new(&self.tools.ffmpeg, log_path)
            .args(["-y", "-hide_banner", "-i"])
            .arg(input.to_string_lossy().into_owned())
            .args([
                "-c",
                "copy",
                "-start_number",
                "0",
                "-hls_time",
                "10",
                "-hls_list_size",
                "0",
                "-f",
                "hls",
            ])
            .arg(playlist.to_string_lossy().into_owned())
    }

    pub fn chat_download_command(
        &self,
        video_ext_id: &str,
        output: &Path,
        log_path: &Path,
    ) -> ProcessCommand {
        ProcessCommand::new(&self.tools.chat_downloader, log_path)
            .args(["chatdownload", "--id"])
            .arg(video_ext_id)
            .args(["--embed-images", "--collision", "Overwrite", "-o"])
            .arg(output.to_string_lossy().into_owned())
    }

    pub fn chat_render_command(&self, input: &Path, output: &Path, log_path: &Path) -> ProcessCommand {
        ProcessCommand::new(&self.tools.chat_downloader, log_path)
            .args(["chatrender", "-i"])
            .arg(input.to_string_lossy().into_owned())
            .args([
                "-h",
                "1440",
                "-w",
                "340",
                "--framerate",
                "30",
                "--font-size",
                "13",
                "--collision",
                "Overwrite",
                "-o",
            ])
            .arg(output.to_string_lossy().into_owned())
    }
}

#[async_trait]
impl ArchiveToolchain for CliToolchain {
    async fn download_video(
        &self,
        video_ext_id: &str,
        quality: &str,
        output: &Path,
        log_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let url = self.vod_url(video_ext_id);
        let format = match self.vod_formats(&url, cancel).await {
            Ok(formats) => select_closest_quality(quality, &formats),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                warn!(video = video_ext_id, error = %e, "Format probe failed, downloading best");
                "best".to_string()
            }
        };
        info!(video = video_ext_id, format = %format, "Downloading video");
        ensure_parent_dir(output).await?;
        self.video_download_command(&url, &format, output, log_path)
            .run(cancel)
            .await
    }

    async fn post_process_video(
        &self,
        input: &Path,
        output: &Path,
        log_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_parent_dir(output).await?;
        self.remux_command(input, output, log_path).run(cancel).await
    }

    async fn package_hls(
        &self,
        input: &Path,
        output_dir: &Path,
        log_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_dir_all(output_dir).await?;
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());
        let playlist = output_dir.join(format!("{stem}.m3u8"));
        self.hls_command(input, &playlist, log_path).run(cancel).await
    }

    async fn probe_duration(&self, path: &Path, cancel: &CancellationToken) -> Result<f64> {
        let path_arg = path.to_string_lossy();
        let stdout = capture_stdout(
            &self.tools.ffprobe,
            ["-v", "quiet", "-print_format", "json", "-show_format", path_arg.as_ref()],
            cancel,
        )
        .await?;
        parse_ffprobe_duration(&stdout)
    }

    async fn download_chat(
        &self,
        video_ext_id: &str,
        output: &Path,
        log_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_parent_dir(output).await?;
        self.chat_download_command(video_ext_id, output, log_path)
            .run(cancel)
            .await
    }

    async fn render_chat(
        &self,
        input: &Path,
        output: &Path,
        log_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_parent_dir(output).await?;
        self.chat_render_command(input, output, log_path)
            .run(cancel)
            .await
    }

    async fn fetch_thumbnail(&self, url: &str, output: &Path) -> Result<()> {
        let bytes = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        ensure_parent_dir(output).await?;
        tokio::fs::write(output, &bytes)
            .await
            .map_err(|e| io_error("writing", output, e))
    }

    async fn capture_live_video(
        &self,
        request: LiveVideoRequest<'_>,
        started: oneshot::Sender<()>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.live_video.capture(request, started, cancel).await
    }

    fn chat_needs_chatroom_id(&self) -> bool {
        self.live.chat_protocol == ChatProtocolKind::Pusher
    }

    async fn capture_live_chat(
        &self,
        channel: &ChannelDbModel,
        output: &Path,
        connected: Option<oneshot::Sender<()>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        chat::capture_live_chat(&self.live, channel, output, connected, cancel).await
    }
}

/// `format.duration` from `ffprobe -print_format json -show_format`.
pub fn parse_ffprobe_duration(stdout: &[u8]) -> Result<f64> {
    let value: Value = serde_json::from_slice(stdout)?;
    let duration = value.get("format").and_then(|f| f.get("duration"));
    match duration {
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| Error::validation(format!("invalid duration {s:?}"))),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| Error::validation("invalid duration")),
        _ => Err(Error::validation("ffprobe output has no duration")),
    }
}
