//! Postgres-backed repository implementations.

mod chats;
mod groups;
mod tasks;
mod templates;
mod users;
mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{
    Postgres, QueryBuilder,
    postgres::{PgPool, PgPoolOptions},
    query,
};
use tracing::info;

use crate::application::repos::{RepoError, StoreHealth};

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    /// Create or upgrade the schema and seed one row per default group.
    /// Safe to run against a database that already holds data.
    pub async fn init(&self, default_groups: &[String]) -> Result<(), sqlx::Error> {
        Self::run_migrations(self.pool()).await?;

        if default_groups.is_empty() {
            return Ok(());
        }

        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("INSERT INTO groups (id, name, allowed_users) ");
        qb.push_values(default_groups, |mut row, group| {
            row.push_bind(group).push_bind(group).push_bind("[]");
        });
        qb.push(" ON CONFLICT (id) DO NOTHING");
        let seeded = qb.build().execute(self.pool()).await?.rows_affected();

        info!(
            target = "tidings::infra::db",
            seeded,
            configured = default_groups.len(),
            "store initialised"
        );
        Ok(())
    }
}

#[async_trait]
impl StoreHealth for PostgresRepositories {
    async fn health_check(&self) -> Result<(), RepoError> {
        query("SELECT 1")
            .execute(self.pool())
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }
}
