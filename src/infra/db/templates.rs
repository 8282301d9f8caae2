use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};

use crate::{
    application::repos::{RepoError, TemplateFilter, TemplatesRepo, WriteReceipt},
    domain::entities::TemplateRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

const TEMPLATE_COLUMNS: &str =
    "id, name, group_id, text, image_ref, created_by, created_at, subgroup";

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: String,
    name: String,
    group_id: String,
    text: Option<String>,
    image_ref: Option<String>,
    created_by: i64,
    created_at: DateTime<Utc>,
    subgroup: Option<String>,
}

impl From<TemplateRow> for TemplateRecord {
    fn from(row: TemplateRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            group_id: row.group_id,
            text: row.text.unwrap_or_default(),
            image_ref: row.image_ref.filter(|path| !path.is_empty()),
            created_by: row.created_by,
            created_at: row.created_at,
            subgroup: row.subgroup,
        }
    }
}

#[async_trait]
impl TemplatesRepo for PostgresRepositories {
    async fn upsert_template(&self, template: &TemplateRecord) -> Result<WriteReceipt, RepoError> {
        let result = sqlx::query(
            r#"
            INSERT INTO templates (id, name, group_id, text, image_ref, created_by, created_at, subgroup)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                group_id = EXCLUDED.group_id,
                text = EXCLUDED.text,
                image_ref = EXCLUDED.image_ref,
                created_by = EXCLUDED.created_by,
                created_at = EXCLUDED.created_at,
                subgroup = EXCLUDED.subgroup
            "#,
        )
        .bind(&template.id)
        .bind(&template.name)
        .bind(&template.group_id)
        .bind(&template.text)
        .bind(template.image_ref.as_deref())
        .bind(template.created_by)
        .bind(template.created_at)
        .bind(template.subgroup.as_deref())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(WriteReceipt::new(result.rows_affected()))
    }

    async fn get_template(&self, id: &str) -> Result<Option<TemplateRecord>, RepoError> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = $1");
        let row = sqlx::query_as::<_, TemplateRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(TemplateRecord::from))
    }

    async fn delete_template(&self, id: &str) -> Result<WriteReceipt, RepoError> {
        let result = sqlx::query("DELETE FROM templates WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(WriteReceipt::new(result.rows_affected()))
    }

    async fn list_templates(
        &self,
        filter: &TemplateFilter,
    ) -> Result<Vec<TemplateRecord>, RepoError> {
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE TRUE"));

        if let Some(groups) = filter.group_ids.as_ref() {
            if groups.is_empty() {
                return Ok(Vec::new());
            }
            qb.push(" AND group_id = ANY(");
            qb.push_bind(groups.iter().cloned().collect::<Vec<String>>());
            qb.push(")");
        }
        qb.push(" ORDER BY created_at DESC, id ASC");

        let rows = qb
            .build_query_as::<TemplateRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(TemplateRecord::from).collect())
    }
}
