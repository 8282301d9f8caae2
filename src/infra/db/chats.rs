use async_trait::async_trait;

use crate::{
    application::repos::{ChatsRepo, RepoError, WriteReceipt},
    domain::entities::{ChatId, ChatRecord},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct ChatRow {
    id: i64,
    display_name: String,
    original_name: Option<String>,
}

impl From<ChatRow> for ChatRecord {
    fn from(row: ChatRow) -> Self {
        Self {
            original_name: row.original_name.unwrap_or_else(|| row.display_name.clone()),
            id: row.id,
            display_name: row.display_name,
        }
    }
}

#[async_trait]
impl ChatsRepo for PostgresRepositories {
    async fn upsert_chat(&self, chat: &ChatRecord) -> Result<WriteReceipt, RepoError> {
        let result = sqlx::query(
            r#"
            INSERT INTO chats (id, display_name, original_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                original_name = EXCLUDED.original_name
            "#,
        )
        .bind(chat.id)
        .bind(&chat.display_name)
        .bind(&chat.original_name)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(WriteReceipt::new(result.rows_affected()))
    }

    async fn get_chat(&self, id: ChatId) -> Result<Option<ChatRecord>, RepoError> {
        let row = sqlx::query_as::<_, ChatRow>(
            "SELECT id, display_name, original_name FROM chats WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(ChatRecord::from))
    }

    async fn delete_chat(&self, id: ChatId) -> Result<WriteReceipt, RepoError> {
        let result = sqlx::query("DELETE FROM chats WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(WriteReceipt::new(result.rows_affected()))
    }

    async fn list_chats(&self) -> Result<Vec<ChatRecord>, RepoError> {
        let rows = sqlx::query_as::<_, ChatRow>(
            "SELECT id, display_name, original_name FROM chats ORDER BY id",
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ChatRecord::from).collect())
    }
}
