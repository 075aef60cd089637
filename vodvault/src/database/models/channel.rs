//! Channel database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelDbModel {
    pub id: String,
    /// Platform user id.
    pub ext_id: String,
    /// Chat room id on platforms whose chat is not addressed by `ext_id`.
    pub chatroom_id: Option<String>,
    pub login: String,
    pub display_name: String,
    pub is_live: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ChannelDbModel {
    pub fn new(
        ext_id: impl Into<String>,
        login: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ext_id: ext_id.into(),
            chatroom_id: None,
            login: login.into(),
            display_name: display_name.into(),
            is_live: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_chatroom_id(mut self, chatroom_id: impl Into<String>) -> Self {
        self.chatroom_id = Some(chatroom_id.into());
        self
    }
}
