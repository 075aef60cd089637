mod common;

use std::path::Path;
use std::time::Duration;

use serde_json::json;

use common::{FakeToolchain, Harness};
use vodvault::database::models::{QueueDbModel, Stage, TaskStatus};
use vodvault::database::repositories::{
    ChannelRepository, ChapterRepository, QueueRepository, VideoRepository,
};
use vodvault::tasks;
use vodvault::utils::json_append::read_json_array;

fn all_required_success(queue: &QueueDbModel) -> bool {
    queue
        .required_stages()
        .into_iter()
        .all(|stage| queue.stage_status(stage) == TaskStatus::Success)
}

#[tokio::test]
async fn vod_archive_runs_to_completion() {
    let h = Harness::new(FakeToolchain::with_vod_chat(json!({
        "comments": [
            {"_id": "c1", "content_offset_seconds": 1.0, "message": {"body": "hi"}},
            {"_id": "c2", "content_offset_seconds": 2.5, "message": {"body": "gg"}}
        ]
    })))
    .await;
    let (_channel, video, queue) = h.seed_archive(false, true, true).await;
    let runtime = h.start_runtime().await;

    tasks::start_archive(&h.ctx, &queue).await.unwrap();
    let done = h.wait_for_queue(&queue.id, |q| !q.processing).await;

    assert!(all_required_success(&done));
    assert!(!done.video_processing);
    assert!(!done.chat_processing);
    assert_eq!(done.stage_status(Stage::ConvertChat), TaskStatus::Pending);

    // Give any stray duplicate a chance to show up.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.notifier.count("video_success"), 1);
    assert_eq!(h.notifier.count("error"), 0);
    assert_eq!(h.toolchain.renders(), 1);

    let video = h.videos.get_video(&video.id).await.unwrap();
    assert_eq!(video.duration_secs, 3600);
    assert!(Path::new(&video.video_path).exists());
    assert!(Path::new(&video.thumbnail_path).exists());
    assert!(Path::new(&video.info_path).exists());
    assert!(Path::new(video.chat_path.as_deref().unwrap()).exists());
    assert!(Path::new(video.chat_video_path.as_deref().unwrap()).exists());
    assert!(!Path::new(&video.tmp_video_download_path).exists());
    assert_eq!(h.ctx.chapters.list_chapters(&video.id).await.unwrap().len(), 2);

    runtime.shutdown().await;
}

#[tokio::test]
async fn empty_chat_skips_render_and_move() {
    let h = Harness::new(FakeToolchain::with_vod_chat(json!({"comments": []}))).await;
    let (_channel, video, queue) = h.seed_archive(false, true, true).await;
    let runtime = h.start_runtime().await;

    tasks::start_archive(&h.ctx, &queue).await.unwrap();
    let done = h.wait_for_queue(&queue.id, |q| !q.processing).await;

    assert!(all_required_success(&done));
    assert_eq!(done.stage_status(Stage::RenderChat), TaskStatus::Success);
    assert_eq!(done.stage_status(Stage::MoveChat), TaskStatus::Success);
    assert_eq!(h.toolchain.renders(), 0);

    let video = h.videos.get_video(&video.id).await.unwrap();
    assert!(video.chat_path.is_none());
    assert!(video.chat_video_path.is_none());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.notifier.count("video_success"), 1);
    assert!(
        h.ctx
            .client
            .repository()
            .list_jobs_by_kind("move_chat")
            .await
            .unwrap()
            .is_empty()
    );

    runtime.shutdown().await;
}

#[tokio::test]
async fn video_only_archive_never_touches_chat() {
    let h = Harness::new(FakeToolchain::with_vod_chat(json!([]))).await;
    let (_channel, _video, queue) = h.seed_archive(false, false, false).await;
    let runtime = h.start_runtime().await;

    tasks::start_archive(&h.ctx, &queue).await.unwrap();
    let done = h.wait_for_queue(&queue.id, |q| !q.processing).await;

    assert_eq!(done.stage_status(Stage::DownloadChat), TaskStatus::Pending);
    assert_eq!(done.stage_status(Stage::MoveVideo), TaskStatus::Success);
    assert!(
        h.ctx
            .client
            .repository()
            .list_jobs_by_kind("download_chat")
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(h.notifier.count("video_success"), 1);

    runtime.shutdown().await;
}

#[tokio::test]
async fn live_archive_records_until_stream_ends() {
    let mut toolchain = FakeToolchain::with_vod_chat(json!([]));
    toolchain.live_chat = vec![
        json!({
            "id": "m1", "sent_at": 1_700_000_001_000_i64, "user_id": "u1",
            "user_login": "bob", "display_name": "Bob", "message": "hello"
        }),
        json!({
            "id": "m2", "sent_at": 1_700_000_002_000_i64, "user_id": "u2",
            "user_login": "eve", "display_name": "Eve", "message": "PogChamp"
        }),
    ];
    let h = Harness::new(toolchain).await;
    let (channel, video, queue) = h.seed_archive(true, true, true).await;
    let runtime = h.start_runtime().await;

    tasks::start_archive(&h.ctx, &queue).await.unwrap();

    // Wait for the chat capture to be running with both messages on disk.
    let raw_chat = video.tmp_live_chat_download_path.clone();
    for _ in 0..400 {
        let q = h.queues.get_queue(&queue.id).await.unwrap();
        let captured = read_json_array(Path::new(&raw_chat)).await.unwrap_or_default();
        if q.stage_status(Stage::DownloadChat) == TaskStatus::Running && captured.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let recording = h.queues.get_queue(&queue.id).await.unwrap();
    assert_eq!(recording.stage_status(Stage::DownloadVideo), TaskStatus::Running);
    assert!(recording.chat_start.is_some());
    assert!(recording.live_video_job_id.is_some());
    assert!(recording.live_chat_job_id.is_some());
    assert!(h.channels.get_channel(&channel.id).await.unwrap().is_live);

    h.toolchain.stream_end.notify_one();
    let done = h.wait_for_queue(&queue.id, |q| !q.processing).await;

    assert!(all_required_success(&done));
    assert_eq!(done.stage_status(Stage::ConvertChat), TaskStatus::Success);
    assert!(!h.channels.get_channel(&channel.id).await.unwrap().is_live);
    assert_eq!(h.toolchain.renders(), 1);

    let video = h.videos.get_video(&video.id).await.unwrap();
    assert_eq!(video.ext_stream_id.as_deref(), Some("stream-1"));
    let chat: serde_json::Value =
        serde_json::from_slice(&std::fs::read(video.chat_path.as_deref().unwrap()).unwrap())
            .unwrap();
    assert_eq!(chat["comments"].as_array().unwrap().len(), 2);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.notifier.count("is_live"), 1);
    assert_eq!(h.notifier.count("live_success"), 1);
    assert_eq!(h.notifier.count("video_success"), 0);

    runtime.shutdown().await;
}
