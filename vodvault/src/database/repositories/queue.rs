//! Queue repository: the per-archive stage state store.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{QueueDbModel, Stage, TaskStatus};
use crate::database::time::now_ms;
use crate::{Error, Result};

#[async_trait]
pub trait QueueRepository: Send + Sync {
    async fn create_queue(&self, queue: &QueueDbModel) -> Result<()>;
    async fn get_queue(&self, id: &str) -> Result<QueueDbModel>;
    async fn list_processing(&self) -> Result<Vec<QueueDbModel>>;

    /// Move a stage forward. Returns `false` when the transition is not
    /// allowed from the stored status; nothing is written in that case.
    async fn set_stage_status(&self, id: &str, stage: Stage, status: TaskStatus) -> Result<bool>;

    /// Operator escape hatch: `failed -> pending`.
    async fn reset_failed_stage(&self, id: &str, stage: Stage) -> Result<bool>;

    /// Stamp the live chat epoch if it is not set yet.
    async fn set_chat_start_once(&self, id: &str, chat_start_ms: i64) -> Result<bool>;

    async fn set_live_video_job_id(&self, id: &str, job_id: &str) -> Result<()>;
    async fn set_live_chat_job_id(&self, id: &str, job_id: &str) -> Result<()>;
    async fn set_video_processing(&self, id: &str, value: bool) -> Result<()>;
    async fn set_chat_processing(&self, id: &str, value: bool) -> Result<()>;
    async fn set_on_hold(&self, id: &str, value: bool) -> Result<()>;

    /// Clear `processing` and the per-branch flags. Returns `true` only for
    /// the single call that observed `processing = 1`.
    async fn clear_processing(&self, id: &str) -> Result<bool>;
}

pub struct SqlxQueueRepository {
    pool: SqlitePool,
}

impl SqlxQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn set_flag(&self, id: &str, column: &'static str, value: bool) -> Result<()> {
        let sql = format!("UPDATE queue SET {column} = ?, updated_at = ? WHERE id = ?");
        let result = sqlx::query(&sql)
            .bind(value)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Queue", id));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueRepository for SqlxQueueRepository {
    async fn create_queue(&self, queue: &QueueDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO queue (
                id, video_id, live_archive, on_hold, video_processing, chat_processing,
                processing, archive_chat, render_chat,
                task_create_folder, task_download_thumbnail, task_save_info,
                task_download_video, task_convert_video, task_move_video,
                task_download_chat, task_convert_chat, task_render_chat, task_move_chat,
                chat_start, live_video_job_id, live_chat_job_id, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&queue.id)
        .bind(&queue.video_id)
        .bind(queue.live_archive)
        .bind(queue.on_hold)
        .bind(queue.video_processing)
        .bind(queue.chat_processing)
        .bind(queue.processing)
        .bind(queue.archive_chat)
        .bind(queue.render_chat)
        .bind(&queue.task_create_folder)
        .bind(&queue.task_download_thumbnail)
        .bind(&queue.task_save_info)
        .bind(&queue.task_download_video)
        .bind(&queue.task_convert_video)
        .bind(&queue.task_move_video)
        .bind(&queue.task_download_chat)
        .bind(&queue.task_convert_chat)
        .bind(&queue.task_render_chat)
        .bind(&queue.task_move_chat)
        .bind(queue.chat_start)
        .bind(&queue.live_video_job_id)
        .bind(&queue.live_chat_job_id)
        .bind(queue.created_at)
        .bind(queue.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_queue(&self, id: &str) -> Result<QueueDbModel> {
        sqlx::query_as::<_, QueueDbModel>("SELECT * FROM queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Queue", id))
    }

    async fn list_processing(&self) -> Result<Vec<QueueDbModel>> {
        let queues = sqlx::query_as::<_, QueueDbModel>(
            "SELECT * FROM queue WHERE processing = 1 ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(queues)
    }

    async fn set_stage_status(&self, id: &str, stage: Stage, status: TaskStatus) -> Result<bool> {
        let allowed = status.allowed_predecessors();
        if allowed.is_empty() {
            return Ok(false);
        }
        let placeholders = vec!["?"; allowed.len()].join(", ");
        let column = stage.column();
        let sql = format!(
            "UPDATE queue SET {column} = ?, updated_at = ? WHERE id = ? AND {column} IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(now_ms())
            .bind(id);
        for from in allowed {
            query = query.bind(from.as_str());
        }
        let result = query.execute(&self.pool).await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        // Distinguish a rejected transition from a missing row.
        let current = self.get_queue(id).await?.stage_status(stage);
        tracing::debug!(
            queue_id = %id,
            %stage,
            from = %current,
            to = %status,
            "Stage transition rejected"
        );
        Ok(false)
    }

    async fn reset_failed_stage(&self, id: &str, stage: Stage) -> Result<bool> {
        let column = stage.column();
        let sql = format!(
            "UPDATE queue SET {column} = 'pending', on_hold = 0, processing = 1, updated_at = ? \
             WHERE id = ? AND {column} = 'failed'"
        );
        let result = sqlx::query(&sql)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_chat_start_once(&self, id: &str, chat_start_ms: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE queue SET chat_start = ?, updated_at = ? WHERE id = ? AND chat_start IS NULL",
        )
        .bind(chat_start_ms)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_live_video_job_id(&self, id: &str, job_id: &str) -> Result<()> {
        sqlx::query("UPDATE queue SET live_video_job_id = ?, updated_at = ? WHERE id = ?")
            .bind(job_id)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_live_chat_job_id(&self, id: &str, job_id: &str) -> Result<()> {
        sqlx::query("UPDATE queue SET live_chat_job_id = ?, updated_at = ? WHERE id = ?")
            .bind(job_id)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_video_processing(&self, id: &str, value: bool) -> Result<()> {
        self.set_flag(id, "video_processing", value).await
    }

    async fn set_chat_processing(&self, id: &str, value: bool) -> Result<()> {
        self.set_flag(id, "chat_processing", value).await
    }

    async fn set_on_hold(&self, id: &str, value: bool) -> Result<()> {
        self.set_flag(id, "on_hold", value).await
    }

    async fn clear_processing(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE queue SET processing = 0, video_processing = 0, chat_processing = 0, \
             updated_at = ? WHERE id = ? AND processing = 1",
        )
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
