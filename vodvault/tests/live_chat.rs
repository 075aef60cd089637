mod common;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{FakeToolchain, Harness};
use vodvault::database::models::{Stage, TaskStatus};
use vodvault::database::repositories::{
    ChannelRepository, JobRepository, QueueRepository, SqlxJobRepository,
};
use vodvault::database::time::now_ms;
use vodvault::jobs::JobHandler;
use vodvault::tasks::{TaskHandler, TaskKind};

async fn run_live_chat_once(h: &Harness, queue_id: &str) {
    let repo = SqlxJobRepository::new(h.pool.clone());
    h.ctx.enqueue(TaskKind::DownloadLiveChat, queue_id, None).await.unwrap();
    let job = repo.claim_next("default", now_ms()).await.unwrap().unwrap();

    // Already cancelled: capture ends at once and phase 2 runs.
    let cancel = CancellationToken::new();
    cancel.cancel();
    TaskHandler::new(TaskKind::DownloadLiveChat, h.ctx.clone())
        .run(&job, cancel)
        .await
        .unwrap();
}

#[tokio::test]
async fn chatroom_id_is_resolved_and_stored_before_capture() {
    let mut toolchain = FakeToolchain::with_vod_chat(json!([]));
    toolchain.needs_chatroom_id = true;
    let h = Harness::new(toolchain).await;
    let (channel, _video, queue) = h.seed_archive(true, true, false).await;
    assert!(channel.chatroom_id.is_none());

    run_live_chat_once(&h, &queue.id).await;

    assert_eq!(*h.toolchain.chat_rooms.lock(), vec![Some("5005".to_string())]);
    let stored = h.channels.get_channel(&channel.id).await.unwrap();
    assert_eq!(stored.chatroom_id.as_deref(), Some("5005"));
    assert_ne!(stored.chatroom_id.as_deref(), Some(stored.ext_id.as_str()));
    assert_eq!(
        h.queues.get_queue(&queue.id).await.unwrap().stage_status(Stage::DownloadChat),
        TaskStatus::Success
    );
}

#[tokio::test]
async fn irc_chat_skips_chatroom_lookup() {
    let h = Harness::new(FakeToolchain::with_vod_chat(json!([]))).await;
    let (channel, _video, queue) = h.seed_archive(true, true, false).await;

    run_live_chat_once(&h, &queue.id).await;

    assert_eq!(*h.toolchain.chat_rooms.lock(), vec![None]);
    assert!(h.channels.get_channel(&channel.id).await.unwrap().chatroom_id.is_none());
}
