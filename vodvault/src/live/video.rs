//! Live video capture through streamlink.
//!
//! The capture resolves a proxy, probes the offered encodings, picks the
//! closest to the requested quality and records the stream until it ends or
//! the caller cancels. `started` fires once the downloader is running so the
//! caller can start chat capture alongside it.

use std::path::Path;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::LiveConfig;
use crate::downloader::{
    ProcessCommand, ResolvedProxy, capture_stdout, resolve_proxy, select_closest_quality,
};
use crate::{Error, Result};

/// What to record and where.
#[derive(Debug, Clone, Copy)]
pub struct LiveVideoRequest<'a> {
    pub channel_login: &'a str,
    pub quality: &'a str,
    pub output: &'a Path,
    pub log_path: &'a Path,
}

#[derive(Debug, Clone)]
pub struct LiveVideoCapture {
    http: reqwest::Client,
    streamlink: String,
    config: LiveConfig,
}

impl LiveVideoCapture {
    pub fn new(http: reqwest::Client, streamlink: impl Into<String>, config: LiveConfig) -> Self {
        Self {
            http,
            streamlink: streamlink.into(),
            config,
        }
    }

    pub fn stream_url(&self, channel_login: &str) -> String {
        format!(
            "{}/{}",
            self.config.platform_base_url.trim_end_matches('/'),
            channel_login.to_lowercase()
        )
    }

    /// Ask streamlink which encodings the stream currently offers.
    pub async fn probe_qualities(
        &self,
        stream_url: &str,
        proxy: &ResolvedProxy,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let mut args = proxy.streamlink_args();
        args.push("--json".to_string());
        args.push(stream_url.to_string());
        let stdout = capture_stdout(&self.streamlink, &args, cancel).await?;
        parse_streamlink_qualities(&stdout)
    }

    pub fn build_command(
        &self,
        stream_url: &str,
        quality: &str,
        proxy: &ResolvedProxy,
        output: &Path,
        log_path: &Path,
    ) -> ProcessCommand {
        ProcessCommand::new(&self.streamlink, log_path)
            .args(proxy.streamlink_args())
            .args(self.config.streamlink_args.iter().cloned())
            .arg(stream_url)
            .arg(quality)
            .arg("-o")
            .arg(output.to_string_lossy().into_owned())
            .detached(true)
    }

    /// Record until the stream ends or `cancel` fires.
    ///
    /// Cancellation kills only the downloader's process group and returns
    /// [`Error::Cancelled`]; whatever was written so far stays on disk.
    pub async fn capture(
        &self,
        request: LiveVideoRequest<'_>,
        started: oneshot::Sender<()>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let proxy = resolve_proxy(&self.http, &self.config.proxy, request.channel_login).await;
        let stream_url = self.stream_url(request.channel_login);

        let quality = match self.probe_qualities(&stream_url, &proxy, cancel).await {
            Ok(offered) => select_closest_quality(request.quality, &offered),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                warn!(channel = request.channel_login, error = %e, "Quality probe failed, recording best");
                "best".to_string()
            }
        };

        crate::utils::fs::ensure_parent_dir(request.output).await?;
        let process = self
            .build_command(&stream_url, &quality, &proxy, request.output, request.log_path)
            .spawn()
            .await?;
        info!(
            channel = request.channel_login,
            quality = %quality,
            pid = ?process.pid(),
            "Live video capture started"
        );
        let _ = started.send(());

        process.wait(cancel).await
    }
}

/// Stream names from `streamlink --json` output.
pub fn parse_streamlink_qualities(stdout: &[u8]) -> Result<Vec<String>> {
    let value: Value = serde_json::from_slice(stdout)?;
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return Err(Error::Other(format!("streamlink: {error}")));
    }
    let streams = value
        .get("streams")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::validation("streamlink output has no streams"))?;
    Ok(streams.keys().cloned().collect())
}
