use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};
use tracing::warn;

use crate::{
    application::repos::{RepoError, TaskFilter, TasksRepo, WriteReceipt},
    domain::{
        entities::TaskRecord,
        schedule::{ScheduleColumns, ScheduleRule},
        types::{Cadence, ScheduleKind},
    },
};

use super::{
    PostgresRepositories, map_sqlx_error,
    util::{decode_json_list, encode_json_list},
};

const TASK_COLUMNS: &str = "id, template_id, template_name, template_text, template_image, \
    group_id, schedule_type, times, week_days, month_days, cadence, created_by, created_at, \
    is_active, is_test, last_executed, next_execution, target_chat_id";

/// Columns added after the first schema are nullable; decoding fills defaults.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    template_id: String,
    template_name: String,
    template_text: Option<String>,
    template_image: Option<String>,
    group_id: String,
    schedule_type: Option<String>,
    times: Option<String>,
    week_days: Option<String>,
    month_days: Option<String>,
    cadence: Option<String>,
    created_by: i64,
    created_at: DateTime<Utc>,
    is_active: Option<bool>,
    is_test: Option<bool>,
    last_executed: Option<DateTime<Utc>>,
    next_execution: Option<DateTime<Utc>>,
    target_chat_id: Option<i64>,
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = RepoError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let invalid = |err: crate::domain::error::DomainError| {
            RepoError::integrity(format!("task `{}` has an invalid schedule: {err}", row.id))
        };

        let schedule_type = match row.schedule_type.as_deref().map(str::trim) {
            None | Some("") => ScheduleKind::Weekly,
            Some(value) => value.parse().map_err(invalid)?,
        };
        let cadence = match row.cadence.as_deref().map(str::trim) {
            None | Some("") => Cadence::Weekly,
            Some(value) => value.parse().map_err(invalid)?,
        };
        let columns = ScheduleColumns {
            schedule_type,
            times: decode_json_list("times", row.times.as_deref())?,
            week_days: decode_json_list("week_days", row.week_days.as_deref())?,
            month_days: decode_json_list("month_days", row.month_days.as_deref())?,
            cadence,
        };
        let schedule = ScheduleRule::try_from(columns).map_err(invalid)?;

        Ok(Self {
            id: row.id,
            template_id: row.template_id,
            template_name: row.template_name,
            template_text: row.template_text.unwrap_or_default(),
            template_image: row.template_image.filter(|path| !path.is_empty()),
            group_id: row.group_id,
            created_by: row.created_by,
            created_at: row.created_at,
            is_active: row.is_active.unwrap_or(true),
            is_test: row.is_test.unwrap_or(false),
            target_chat_id: row.target_chat_id,
            schedule,
            last_executed: row.last_executed,
            next_execution: row.next_execution,
        })
    }
}

/// Decode rows one at a time. Rows that do not decode are logged and
/// returned by id so the rest of the table stays usable.
fn decode_rows(rows: Vec<TaskRow>) -> (Vec<TaskRecord>, Vec<String>) {
    let mut tasks = Vec::with_capacity(rows.len());
    let mut rejected = Vec::new();
    for row in rows {
        let id = row.id.clone();
        match TaskRecord::try_from(row) {
            Ok(task) => tasks.push(task),
            Err(err) => {
                warn!(
                    target = "tidings::infra::db",
                    task_id = %id,
                    error = %err,
                    "skipping task row that does not decode"
                );
                rejected.push(id);
            }
        }
    }
    (tasks, rejected)
}

#[async_trait]
impl TasksRepo for PostgresRepositories {
    async fn upsert_task(&self, task: &TaskRecord) -> Result<WriteReceipt, RepoError> {
        let columns = ScheduleColumns::from(task.schedule.clone());
        let result = sqlx::query(
            r#"
            INSERT INTO tasks (
                id, template_id, template_name, template_text, template_image, group_id,
                schedule_type, times, week_days, month_days, cadence, created_by, created_at,
                is_active, is_test, last_executed, next_execution, target_chat_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (id) DO UPDATE SET
                template_id = EXCLUDED.template_id,
                template_name = EXCLUDED.template_name,
                template_text = EXCLUDED.template_text,
                template_image = EXCLUDED.template_image,
                group_id = EXCLUDED.group_id,
                schedule_type = EXCLUDED.schedule_type,
                times = EXCLUDED.times,
                week_days = EXCLUDED.week_days,
                month_days = EXCLUDED.month_days,
                cadence = EXCLUDED.cadence,
                created_by = EXCLUDED.created_by,
                created_at = EXCLUDED.created_at,
                is_active = EXCLUDED.is_active,
                is_test = EXCLUDED.is_test,
                last_executed = EXCLUDED.last_executed,
                next_execution = EXCLUDED.next_execution,
                target_chat_id = EXCLUDED.target_chat_id
            "#,
        )
        .bind(&task.id)
        .bind(&task.template_id)
        .bind(&task.template_name)
        .bind(&task.template_text)
        .bind(task.template_image.as_deref())
        .bind(&task.group_id)
        .bind(columns.schedule_type.as_str())
        .bind(encode_json_list(&columns.times)?)
        .bind(encode_json_list(&columns.week_days)?)
        .bind(encode_json_list(&columns.month_days)?)
        .bind(columns.cadence.as_str())
        .bind(task.created_by)
        .bind(task.created_at)
        .bind(task.is_active)
        .bind(task.is_test)
        .bind(task.last_executed)
        .bind(task.next_execution)
        .bind(task.target_chat_id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(WriteReceipt::new(result.rows_affected()))
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>, RepoError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1");
        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        row.map(TaskRecord::try_from).transpose()
    }

    async fn delete_task(&self, id: &str) -> Result<WriteReceipt, RepoError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(WriteReceipt::new(result.rows_affected()))
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, RepoError> {
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {TASK_COLUMNS} FROM tasks WHERE TRUE"));

        if let Some(group_id) = filter.group_id.as_ref() {
            qb.push(" AND group_id = ");
            qb.push_bind(group_id.clone());
        }
        if let Some(created_by) = filter.created_by {
            qb.push(" AND created_by = ");
            qb.push_bind(created_by);
        }
        if let Some(chat) = filter.target_chat_id {
            qb.push(" AND target_chat_id = ");
            qb.push_bind(chat);
        }
        if let Some(active) = filter.is_active {
            qb.push(" AND COALESCE(is_active, TRUE) = ");
            qb.push_bind(active);
        }
        if let Some(test) = filter.is_test {
            qb.push(" AND COALESCE(is_test, FALSE) = ");
            qb.push_bind(test);
        }
        qb.push(" ORDER BY created_at DESC, id ASC");

        let rows = qb
            .build_query_as::<TaskRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(decode_rows(rows).0)
    }

    async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<TaskRecord>, RepoError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE COALESCE(is_active, TRUE) AND next_execution IS NOT NULL AND next_execution <= $1 \
             ORDER BY next_execution ASC, id ASC"
        );
        let rows = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(now)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let (due, rejected) = decode_rows(rows);
        if !rejected.is_empty() {
            self.deactivate_undecodable(&rejected).await;
        }
        Ok(due)
    }

    async fn image_in_use(&self, blob_ref: &str) -> Result<bool, RepoError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM tasks WHERE template_image = $1)",
        )
        .bind(blob_ref)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }
}

impl PostgresRepositories {
    /// Take undecodable rows out of the due set so they are not re-read every tick.
    async fn deactivate_undecodable(&self, ids: &[String]) {
        let result = sqlx::query("UPDATE tasks SET is_active = FALSE WHERE id = ANY($1)")
            .bind(ids)
            .execute(self.pool())
            .await;
        match result {
            Ok(done) => warn!(
                target = "tidings::infra::db",
                deactivated = done.rows_affected(),
                "undecodable tasks deactivated"
            ),
            Err(err) => warn!(
                target = "tidings::infra::db",
                error = %err,
                "failed to deactivate undecodable tasks"
            ),
        }
    }
}
