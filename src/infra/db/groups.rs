use async_trait::async_trait;

use crate::{
    application::repos::{GroupsRepo, RepoError, WriteReceipt},
    domain::entities::GroupRecord,
};

use super::{
    PostgresRepositories, map_sqlx_error,
    util::{decode_json_list, encode_json_list},
};

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: String,
    name: Option<String>,
    allowed_users: Option<String>,
}

impl TryFrom<GroupRow> for GroupRecord {
    type Error = RepoError;

    fn try_from(row: GroupRow) -> Result<Self, Self::Error> {
        Ok(Self {
            allowed_users: decode_json_list("allowed_users", row.allowed_users.as_deref())?,
            name: row.name.unwrap_or_else(|| row.id.clone()),
            id: row.id,
        })
    }
}

#[async_trait]
impl GroupsRepo for PostgresRepositories {
    async fn upsert_group(&self, group: &GroupRecord) -> Result<WriteReceipt, RepoError> {
        let result = sqlx::query(
            r#"
            INSERT INTO groups (id, name, allowed_users)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                allowed_users = EXCLUDED.allowed_users
            "#,
        )
        .bind(&group.id)
        .bind(&group.name)
        .bind(encode_json_list(&group.allowed_users)?)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(WriteReceipt::new(result.rows_affected()))
    }

    async fn get_group(&self, id: &str) -> Result<Option<GroupRecord>, RepoError> {
        let row = sqlx::query_as::<_, GroupRow>(
            "SELECT id, name, allowed_users FROM groups WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(GroupRecord::try_from).transpose()
    }

    async fn list_groups(&self) -> Result<Vec<GroupRecord>, RepoError> {
        let rows =
            sqlx::query_as::<_, GroupRow>("SELECT id, name, allowed_users FROM groups ORDER BY id")
                .fetch_all(self.pool())
                .await
                .map_err(map_sqlx_error)?;

        rows.into_iter().map(GroupRecord::try_from).collect()
    }
}
