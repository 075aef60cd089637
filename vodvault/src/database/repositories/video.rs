//! Video repository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteQueryResult;

use crate::database::models::VideoDbModel;
use crate::database::time::now_ms;
use crate::{Error, Result};

#[async_trait]
pub trait VideoRepository: Send + Sync {
    async fn create_video(&self, video: &VideoDbModel) -> Result<()>;
    async fn get_video(&self, id: &str) -> Result<VideoDbModel>;
    async fn update_duration(&self, id: &str, duration_secs: i64) -> Result<()>;
    async fn update_ext_id(&self, id: &str, ext_id: &str) -> Result<()>;
    async fn update_ext_stream_id(&self, id: &str, ext_stream_id: &str) -> Result<()>;
    async fn update_thumbnail_url(&self, id: &str, url: &str) -> Result<()>;
    /// Drop `chat_path` and `chat_video_path`; used when no chat was captured.
    async fn clear_chat_paths(&self, id: &str) -> Result<()>;
}

pub struct SqlxVideoRepository {
    pool: SqlitePool,
}

impl SqlxVideoRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

}

fn ensure_updated(result: SqliteQueryResult, id: &str) -> Result<()> {
    if result.rows_affected() == 0 {
        return Err(Error::not_found("Video", id));
    }
    Ok(())
}

#[async_trait]
impl VideoRepository for SqlxVideoRepository {
    async fn create_video(&self, video: &VideoDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO video (
                id, channel_id, ext_id, ext_stream_id, title, video_type, resolution,
                duration_secs, thumbnail_url, thumbnail_path, info_path,
                tmp_video_download_path, tmp_video_convert_path, tmp_video_hls_path,
                video_path, video_hls_path, tmp_chat_download_path,
                tmp_live_chat_download_path, tmp_live_chat_convert_path, tmp_chat_render_path,
                chat_path, chat_video_path, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&video.id)
        .bind(&video.channel_id)
        .bind(&video.ext_id)
        .bind(&video.ext_stream_id)
        .bind(&video.title)
        .bind(&video.video_type)
        .bind(&video.resolution)
        .bind(video.duration_secs)
        .bind(&video.thumbnail_url)
        .bind(&video.thumbnail_path)
        .bind(&video.info_path)
        .bind(&video.tmp_video_download_path)
        .bind(&video.tmp_video_convert_path)
        .bind(&video.tmp_video_hls_path)
        .bind(&video.video_path)
        .bind(&video.video_hls_path)
        .bind(&video.tmp_chat_download_path)
        .bind(&video.tmp_live_chat_download_path)
        .bind(&video.tmp_live_chat_convert_path)
        .bind(&video.tmp_chat_render_path)
        .bind(&video.chat_path)
        .bind(&video.chat_video_path)
        .bind(video.created_at)
        .bind(video.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_video(&self, id: &str) -> Result<VideoDbModel> {
        sqlx::query_as::<_, VideoDbModel>("SELECT * FROM video WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Video", id))
    }

    async fn update_duration(&self, id: &str, duration_secs: i64) -> Result<()> {
        let result = sqlx::query("UPDATE video SET duration_secs = ?, updated_at = ? WHERE id = ?")
            .bind(duration_secs)
            .bind(now_ms())
            .bind(id)
        .execute(&self.pool)
        .await?;
        ensure_updated(result, id)
    }

    async fn update_ext_id(&self, id: &str, ext_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE video SET ext_id = ?, updated_at = ? WHERE id = ?")
            .bind(ext_id)
            .bind(now_ms())
            .bind(id)
        .execute(&self.pool)
        .await?;
        ensure_updated(result, id)
    }

    async fn update_ext_stream_id(&self, id: &str, ext_stream_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE video SET ext_stream_id = ?, updated_at = ? WHERE id = ?")
            .bind(ext_stream_id)
            .bind(now_ms())
            .bind(id)
        .execute(&self.pool)
        .await?;
        ensure_updated(result, id)
    }

    async fn update_thumbnail_url(&self, id: &str, url: &str) -> Result<()> {
        let result = sqlx::query("UPDATE video SET thumbnail_url = ?, updated_at = ? WHERE id = ?")
            .bind(url)
            .bind(now_ms())
            .bind(id)
        .execute(&self.pool)
        .await?;
        ensure_updated(result, id)
    }

    async fn clear_chat_paths(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE video SET chat_path = NULL, chat_video_path = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        ensure_updated(result, id)
    }
}
