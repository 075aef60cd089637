//! Channel repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::ChannelDbModel;
use crate::database::time::now_ms;
use crate::{Error, Result};

#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn create_channel(&self, channel: &ChannelDbModel) -> Result<()>;
    async fn get_channel(&self, id: &str) -> Result<ChannelDbModel>;
    async fn set_is_live(&self, id: &str, is_live: bool) -> Result<()>;
    async fn set_chatroom_id(&self, id: &str, chatroom_id: &str) -> Result<()>;
}

pub struct SqlxChannelRepository {
    pool: SqlitePool,
}

impl SqlxChannelRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelRepository for SqlxChannelRepository {
    async fn create_channel(&self, channel: &ChannelDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO channel (
                id, ext_id, chatroom_id, login, display_name, is_live, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&channel.id)
        .bind(&channel.ext_id)
        .bind(&channel.chatroom_id)
        .bind(&channel.login)
        .bind(&channel.display_name)
        .bind(channel.is_live)
        .bind(channel.created_at)
        .bind(channel.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_channel(&self, id: &str) -> Result<ChannelDbModel> {
        sqlx::query_as::<_, ChannelDbModel>("SELECT * FROM channel WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Channel", id))
    }

    async fn set_is_live(&self, id: &str, is_live: bool) -> Result<()> {
        let result = sqlx::query("UPDATE channel SET is_live = ?, updated_at = ? WHERE id = ?")
            .bind(is_live)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Channel", id));
        }
        Ok(())
    }

    async fn set_chatroom_id(&self, id: &str, chatroom_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE channel SET chatroom_id = ?, updated_at = ? WHERE id = ?")
            .bind(chatroom_id)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Channel", id));
        }
        Ok(())
    }
}
