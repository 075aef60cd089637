//! Shared harness: file-backed SQLite, fake tools and platform, and a
//! notifier that records what it was asked to send.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;

use vodvault::config::{PipelineTimings, WorkerCounts};
use vodvault::database::models::{ChannelDbModel, QueueDbModel, VideoDbModel, VideoType};
use vodvault::database::repositories::{
    ChannelRepository, QueueRepository, SqlxChannelRepository, SqlxJobRepository,
    SqlxQueueRepository, SqlxVideoRepository, VideoRepository,
};
use vodvault::database::{DbPool, init_pool, run_migrations};
use vodvault::jobs::{JobClient, JobRuntime};
use vodvault::live::LiveVideoRequest;
use vodvault::notification::{NotificationEvent, Notifier};
use vodvault::platform::{
    PlatformChannel, PlatformChapter, PlatformClient, PlatformStream, PlatformVideo,
};
use vodvault::tasks::{self, TaskContext, TaskSettings};
use vodvault::toolchain::ArchiveToolchain;
use vodvault::utils::json_append::JsonArrayAppender;
use vodvault::{Error, Result};

async fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

/// Tools that write small placeholder artifacts.
pub struct FakeToolchain {
    /// Body written by `download_chat`.
    pub vod_chat: String,
    /// Records appended by live chat capture once connected.
    pub live_chat: Vec<serde_json::Value>,
    pub stream_end: Notify,
    pub renders: AtomicUsize,
    pub video_downloads: AtomicUsize,
    /// Act like a pusher-style chat toolchain.
    pub needs_chatroom_id: bool,
    /// Chatroom id of the channel each live chat capture was started with.
    pub chat_rooms: Mutex<Vec<Option<String>>>,
}

impl FakeToolchain {
    pub fn with_vod_chat(vod_chat: serde_json::Value) -> Self {
        Self {
            vod_chat: vod_chat.to_string(),
            live_chat: Vec::new(),
            stream_end: Notify::new(),
            renders: AtomicUsize::new(0),
            video_downloads: AtomicUsize::new(0),
            needs_chatroom_id: false,
            chat_rooms: Mutex::new(Vec::new()),
        }
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveToolchain for FakeToolchain {
    async fn download_video(
        &self,
        _video_ext_id: &str,
        _quality: &str,
        output: &Path,
        _log_path: &Path,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.video_downloads.fetch_add(1, Ordering::SeqCst);
        write(output, b"video").await
    }

    async fn post_process_video(
        &self,
        input: &Path,
        output: &Path,
        _log_path: &Path,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let bytes = tokio::fs::read(input).await?;
        write(output, &bytes).await
    }

    async fn package_hls(
        &self,
        _input: &Path,
        output_dir: &Path,
        _log_path: &Path,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        write(&output_dir.join("index.m3u8"), b"#EXTM3U\n").await
    }

    async fn probe_duration(&self, _path: &Path, _cancel: &CancellationToken) -> Result<f64> {
        Ok(3599.6)
    }

    async fn download_chat(
        &self,
        _video_ext_id: &str,
        output: &Path,
        _log_path: &Path,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        write(output, self.vod_chat.as_bytes()).await
    }

    async fn render_chat(
        &self,
        _input: &Path,
        output: &Path,
        _log_path: &Path,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        write(output, b"rendered").await
    }

    async fn fetch_thumbnail(&self, _url: &str, output: &Path) -> Result<()> {
        write(output, b"jpg").await
    }

    async fn capture_live_video(
        &self,
        request: LiveVideoRequest<'_>,
        started: oneshot::Sender<()>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        write(request.output, b"live video").await?;
        let _ = started.send(());
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = self.stream_end.notified() => Ok(()),
        }
    }

    fn chat_needs_chatroom_id(&self) -> bool {
        self.needs_chatroom_id
    }

    async fn capture_live_chat(
        &self,
        channel: &ChannelDbModel,
        output: &Path,
        connected: Option<oneshot::Sender<()>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.chat_rooms.lock().push(channel.chatroom_id.clone());
        let appender = JsonArrayAppender::new(output);
        if let Some(connected) = connected {
            let _ = connected.send(());
        }
        for record in &self.live_chat {
            appender.append(record).await?;
        }
        cancel.cancelled().await;
        Err(Error::Cancelled)
    }
}

pub struct FakePlatform;

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn get_video(&self, video_id: &str) -> Result<PlatformVideo> {
        Ok(PlatformVideo {
            id: video_id.to_string(),
            stream_id: None,
            title: "Speedrun".to_string(),
            duration_secs: 3600,
            thumbnail_url: Some("https://cdn.example/thumb.jpg".to_string()),
            chapters: vec![
                PlatformChapter {
                    chapter_type: None,
                    title: "Just Chatting".to_string(),
                    start_secs: 0,
                    end_secs: 600,
                },
                PlatformChapter {
                    chapter_type: None,
                    title: "Game".to_string(),
                    start_secs: 600,
                    end_secs: 3600,
                },
            ],
            muted_segments: Vec::new(),
            raw: json!({"id": video_id, "title": "Speedrun"}),
        })
    }

    async fn get_live_stream(&self, _channel_login: &str) -> Result<Option<PlatformStream>> {
        Ok(Some(PlatformStream {
            id: "stream-1".to_string(),
            title: "live".to_string(),
            thumbnail_url: Some("https://cdn.example/live.jpg".to_string()),
            raw: json!({"id": "stream-1"}),
        }))
    }

    async fn get_channel(&self, channel_login: &str) -> Result<PlatformChannel> {
        Ok(PlatformChannel {
            id: "1001".to_string(),
            chatroom_id: Some("5005".to_string()),
            login: channel_login.to_string(),
            display_name: channel_login.to_string(),
        })
    }

    async fn get_videos(&self, _channel_login: &str) -> Result<Vec<PlatformVideo>> {
        let mut vod = self.get_video("777").await?;
        vod.stream_id = Some("stream-1".to_string());
        Ok(vec![vod])
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(t, _)| t == event_type)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        self.events.lock().push((
            event.event_type().to_string(),
            event.archive().queue_id.clone(),
        ));
        Ok(())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub pool: DbPool,
    pub ctx: Arc<TaskContext>,
    pub toolchain: Arc<FakeToolchain>,
    pub notifier: Arc<RecordingNotifier>,
    pub queues: SqlxQueueRepository,
    pub videos: SqlxVideoRepository,
    pub channels: SqlxChannelRepository,
}

impl Harness {
    pub async fn new(toolchain: FakeToolchain) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("vodvault.db").display());
        let pool = init_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let toolchain = Arc::new(toolchain);
        let notifier = Arc::new(RecordingNotifier::default());
        let client = JobClient::new(Arc::new(SqlxJobRepository::new(pool.clone())));
        let settings = TaskSettings {
            log_dir: dir.path().join("logs"),
            video_hls: false,
            timings: PipelineTimings {
                poll_interval: Duration::from_millis(50),
                ..PipelineTimings::default()
            },
        };
        let ctx = Arc::new(TaskContext::new(
            pool.clone(),
            client,
            Arc::new(FakePlatform),
            toolchain.clone(),
            notifier.clone(),
            settings,
        ));

        Self {
            queues: SqlxQueueRepository::new(pool.clone()),
            videos: SqlxVideoRepository::new(pool.clone()),
            channels: SqlxChannelRepository::new(pool.clone()),
            dir,
            pool,
            ctx,
            toolchain,
            notifier,
        }
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.dir.path().join("videos")
    }

    /// Channel, video and queue rows for one archive.
    pub async fn seed_archive(
        &self,
        live: bool,
        archive_chat: bool,
        render_chat: bool,
    ) -> (ChannelDbModel, VideoDbModel, QueueDbModel) {
        let channel = ChannelDbModel::new("1001", "alice", "Alice");
        self.channels.create_channel(&channel).await.unwrap();

        let video_type = if live { VideoType::Live } else { VideoType::Archive };
        let video = VideoDbModel::new(
            &channel.id,
            &channel.login,
            "123456",
            "Speedrun",
            video_type,
            "best",
            &self.videos_dir(),
            &self.dir.path().join("temp"),
        );
        self.videos.create_video(&video).await.unwrap();

        let queue = QueueDbModel::new(&video.id, live, archive_chat, render_chat);
        self.queues.create_queue(&queue).await.unwrap();
        (channel, video, queue)
    }

    pub async fn start_runtime(&self) -> JobRuntime {
        tasks::register(JobRuntime::builder(self.ctx.client.clone()), self.ctx.clone())
            .workers(WorkerCounts {
                default: 4,
                video_download: 2,
                video_postprocess: 1,
                chat_render: 1,
            })
            .poll_interval(self.ctx.settings.timings.poll_interval)
            .start()
            .await
            .unwrap()
    }

    /// Poll the queue row until `done` holds.
    pub async fn wait_for_queue<F>(&self, queue_id: &str, done: F) -> QueueDbModel
    where
        F: Fn(&QueueDbModel) -> bool,
    {
        for _ in 0..400 {
            let queue = self.queues.get_queue(queue_id).await.unwrap();
            if done(&queue) {
                return queue;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let queue = self.queues.get_queue(queue_id).await.unwrap();
        panic!("queue {queue_id} did not reach the expected state: {queue:?}");
    }
}
