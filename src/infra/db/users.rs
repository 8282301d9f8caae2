use async_trait::async_trait;

use crate::{
    application::repos::{AccessEdgesRepo, RepoError, UsersRepo, WriteReceipt},
    domain::{
        entities::{ChatId, UserId, UserRecord},
        types::Role,
    },
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    name: String,
    role: Option<String>,
}

impl UserRow {
    fn into_record(self) -> Result<UserRecord, RepoError> {
        let role = match self.role.as_deref().map(str::trim) {
            None | Some("") => Role::Guest,
            Some(value) => value.parse().map_err(|err| {
                RepoError::integrity(format!("user `{}` has an invalid role: {err}", self.id))
            })?,
        };
        Ok(UserRecord::new(self.id, self.name, role))
    }
}

#[async_trait]
impl UsersRepo for PostgresRepositories {
    async fn upsert_user(&self, user: &UserRecord) -> Result<WriteReceipt, RepoError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, name, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, role = EXCLUDED.role
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(user.role.as_str())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(WriteReceipt::new(result.rows_affected()))
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserRecord>, RepoError> {
        let row = sqlx::query_as::<_, UserRow>("SELECT id, name, role FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut user = row.into_record()?;
        user.chat_access = self.list_chat_grants(id).await?.into_iter().collect();
        user.template_groups = self.list_group_grants(id).await?.into_iter().collect();
        Ok(Some(user))
    }

    async fn delete_user(&self, id: UserId) -> Result<WriteReceipt, RepoError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(WriteReceipt::new(result.rows_affected()))
    }

    /// Rows only; use `get_user` for grants.
    async fn list_users(&self) -> Result<Vec<UserRecord>, RepoError> {
        let rows = sqlx::query_as::<_, UserRow>("SELECT id, name, role FROM users ORDER BY id")
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(UserRow::into_record).collect()
    }
}

#[async_trait]
impl AccessEdgesRepo for PostgresRepositories {
    async fn grant_chat(&self, user: UserId, chat: ChatId) -> Result<WriteReceipt, RepoError> {
        let result = sqlx::query(
            "INSERT INTO user_chats (user_id, chat_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user)
        .bind(chat)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(WriteReceipt::new(result.rows_affected()))
    }

    async fn revoke_chat(&self, user: UserId, chat: ChatId) -> Result<WriteReceipt, RepoError> {
        let result = sqlx::query("DELETE FROM user_chats WHERE user_id = $1 AND chat_id = $2")
            .bind(user)
            .bind(chat)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(WriteReceipt::new(result.rows_affected()))
    }

    async fn grant_group(&self, user: UserId, group: &str) -> Result<WriteReceipt, RepoError> {
        let result = sqlx::query(
            "INSERT INTO user_groups (user_id, group_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user)
        .bind(group)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(WriteReceipt::new(result.rows_affected()))
    }

    async fn revoke_group(&self, user: UserId, group: &str) -> Result<WriteReceipt, RepoError> {
        let result = sqlx::query("DELETE FROM user_groups WHERE user_id = $1 AND group_id = $2")
            .bind(user)
            .bind(group)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(WriteReceipt::new(result.rows_affected()))
    }

    async fn list_chat_grants(&self, user: UserId) -> Result<Vec<ChatId>, RepoError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT chat_id FROM user_chats WHERE user_id = $1 ORDER BY chat_id",
        )
        .bind(user)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn list_group_grants(&self, user: UserId) -> Result<Vec<String>, RepoError> {
        sqlx::query_scalar::<_, String>(
            "SELECT group_id FROM user_groups WHERE user_id = $1 ORDER BY group_id",
        )
        .bind(user)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }
}
