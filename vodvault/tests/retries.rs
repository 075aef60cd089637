mod common;

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{FakeToolchain, Harness};
use vodvault::database::models::{JobDbModel, Stage, TaskStatus};
use vodvault::database::repositories::{JobRepository, QueueRepository, SqlxJobRepository};
use vodvault::database::time::now_ms;
use vodvault::jobs::JobHandler;
use vodvault::tasks::{TaskHandler, TaskKind};

async fn claim(repo: &SqlxJobRepository, queue: &str) -> JobDbModel {
    repo.claim_next(queue, now_ms()).await.unwrap().unwrap()
}

#[tokio::test]
async fn retry_of_succeeded_stage_enqueues_missing_successor_once() {
    let h = Harness::new(FakeToolchain::with_vod_chat(json!([]))).await;
    let (_channel, _video, queue) = h.seed_archive(false, false, false).await;
    let repo = SqlxJobRepository::new(h.pool.clone());
    let handler = TaskHandler::new(TaskKind::DownloadVideo, h.ctx.clone());

    // First attempt marked the stage, then failed before inserting the next job.
    h.ctx.enqueue(TaskKind::DownloadVideo, &queue.id, None).await.unwrap();
    let job = claim(&repo, "video-download").await;
    h.queues
        .set_stage_status(&queue.id, Stage::DownloadVideo, TaskStatus::Success)
        .await
        .unwrap();

    handler.run(&job, CancellationToken::new()).await.unwrap();
    assert_eq!(repo.list_jobs_by_kind("post_process_video").await.unwrap().len(), 1);

    // A further re-run does not fork the chain.
    handler.run(&job, CancellationToken::new()).await.unwrap();
    assert_eq!(repo.list_jobs_by_kind("post_process_video").await.unwrap().len(), 1);
    assert_eq!(
        h.queues.get_queue(&queue.id).await.unwrap().stage_status(Stage::DownloadVideo),
        TaskStatus::Success
    );
}

#[tokio::test]
async fn late_attempt_after_failure_does_not_continue_chain() {
    let h = Harness::new(FakeToolchain::with_vod_chat(json!([]))).await;
    let (_channel, _video, queue) = h.seed_archive(false, false, false).await;
    let repo = SqlxJobRepository::new(h.pool.clone());

    h.ctx.enqueue(TaskKind::DownloadVideo, &queue.id, None).await.unwrap();
    let job = claim(&repo, "video-download").await;
    h.queues
        .set_stage_status(&queue.id, Stage::DownloadVideo, TaskStatus::Failed)
        .await
        .unwrap();

    TaskHandler::new(TaskKind::DownloadVideo, h.ctx.clone())
        .run(&job, CancellationToken::new())
        .await
        .unwrap();

    assert!(repo.list_jobs_by_kind("post_process_video").await.unwrap().is_empty());
    assert_eq!(
        h.queues.get_queue(&queue.id).await.unwrap().stage_status(Stage::DownloadVideo),
        TaskStatus::Failed
    );
}

#[tokio::test]
async fn move_video_retry_after_partial_move_succeeds() {
    let h = Harness::new(FakeToolchain::with_vod_chat(json!([]))).await;
    let (_channel, video, queue) = h.seed_archive(false, false, false).await;
    let repo = SqlxJobRepository::new(h.pool.clone());

    // The file reached the archive but the attempt failed afterwards.
    let archived = Path::new(&video.video_path);
    tokio::fs::create_dir_all(archived.parent().unwrap()).await.unwrap();
    tokio::fs::write(archived, b"mp4").await.unwrap();
    assert!(!Path::new(&video.tmp_video_convert_path).exists());

    h.ctx.enqueue(TaskKind::MoveVideo, &queue.id, None).await.unwrap();
    let job = claim(&repo, "default").await;
    let handler: Arc<dyn JobHandler> = Arc::new(TaskHandler::new(TaskKind::MoveVideo, h.ctx.clone()));
    handler.run(&job, CancellationToken::new()).await.unwrap();

    let queue = h.queues.get_queue(&queue.id).await.unwrap();
    assert_eq!(queue.stage_status(Stage::MoveVideo), TaskStatus::Success);
    assert!(!queue.video_processing);
    assert_eq!(tokio::fs::read(archived).await.unwrap(), b"mp4");
}
