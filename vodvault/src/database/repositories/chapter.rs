//! Chapter and muted segment repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{ChapterDbModel, MutedSegmentDbModel};

#[async_trait]
pub trait ChapterRepository: Send + Sync {
    /// Replace every chapter of a video.
    async fn replace_chapters(&self, video_id: &str, chapters: &[ChapterDbModel]) -> Result<()>;
    async fn list_chapters(&self, video_id: &str) -> Result<Vec<ChapterDbModel>>;
    /// Replace every muted segment of a video.
    async fn replace_muted_segments(
        &self,
        video_id: &str,
        segments: &[MutedSegmentDbModel],
    ) -> Result<()>;
    async fn list_muted_segments(&self, video_id: &str) -> Result<Vec<MutedSegmentDbModel>>;
}

pub struct SqlxChapterRepository {
    pool: SqlitePool,
}

impl SqlxChapterRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChapterRepository for SqlxChapterRepository {
    async fn replace_chapters(&self, video_id: &str, chapters: &[ChapterDbModel]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chapter WHERE video_id = ?")
            .bind(video_id)
            .execute(&mut *tx)
            .await?;
        for chapter in chapters {
            sqlx::query(
                "INSERT INTO chapter (id, video_id, chapter_type, title, start_secs, end_secs) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&chapter.id)
            .bind(video_id)
            .bind(&chapter.chapter_type)
            .bind(&chapter.title)
            .bind(chapter.start_secs)
            .bind(chapter.end_secs)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_chapters(&self, video_id: &str) -> Result<Vec<ChapterDbModel>> {
        let chapters = sqlx::query_as::<_, ChapterDbModel>(
            "SELECT * FROM chapter WHERE video_id = ? ORDER BY start_secs",
        )
        .bind(video_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(chapters)
    }

    async fn replace_muted_segments(
        &self,
        video_id: &str,
        segments: &[MutedSegmentDbModel],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM muted_segment WHERE video_id = ?")
            .bind(video_id)
            .execute(&mut *tx)
            .await?;
        for segment in segments {
            sqlx::query(
                "INSERT INTO muted_segment (id, video_id, start_secs, end_secs) VALUES (?, ?, ?, ?)",
            )
            .bind(&segment.id)
            .bind(video_id)
            .bind(segment.start_secs)
            .bind(segment.end_secs)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_muted_segments(&self, video_id: &str) -> Result<Vec<MutedSegmentDbModel>> {
        let segments = sqlx::query_as::<_, MutedSegmentDbModel>(
            "SELECT * FROM muted_segment WHERE video_id = ? ORDER BY start_secs",
        )
        .bind(video_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(segments)
    }
}
