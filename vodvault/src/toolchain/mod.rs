//! External tool seam used by the task units.

pub mod cli;

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub use cli::CliToolchain;

use crate::Result;
use crate::database::models::ChannelDbModel;
use crate::live::LiveVideoRequest;

#[async_trait]
pub trait ArchiveToolchain: Send + Sync {
    /// Download VOD `video_ext_id` at the quality closest to `quality`.
    async fn download_video(
        &self,
        video_ext_id: &str,
        quality: &str,
        output: &Path,
        log_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Remux a downloaded video into a seekable MP4.
    async fn post_process_video(
        &self,
        input: &Path,
        output: &Path,
        log_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Package `input` as HLS inside `output_dir`.
    async fn package_hls(
        &self,
        input: &Path,
        output_dir: &Path,
        log_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Media duration in seconds.
    async fn probe_duration(&self, path: &Path, cancel: &CancellationToken) -> Result<f64>;

    async fn download_chat(
        &self,
        video_ext_id: &str,
        output: &Path,
        log_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn render_chat(
        &self,
        input: &Path,
        output: &Path,
        log_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn fetch_thumbnail(&self, url: &str, output: &Path) -> Result<()>;

    /// Record a live stream; `started` fires once the recorder runs.
    async fn capture_live_video(
        &self,
        request: LiveVideoRequest<'_>,
        started: oneshot::Sender<()>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Whether live chat capture addresses the room by
    /// [`ChannelDbModel::chatroom_id`] rather than the channel.
    fn chat_needs_chatroom_id(&self) -> bool {
        false
    }

    /// Capture live chat into a JSON array file until cancelled.
    async fn capture_live_chat(
        &self,
        channel: &ChannelDbModel,
        output: &Path,
        connected: Option<oneshot::Sender<()>>,
        cancel: &CancellationToken,
    ) -> Result<()>;
}
