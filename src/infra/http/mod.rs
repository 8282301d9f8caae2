//! Liveness and store health endpoints.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::warn;

use crate::application::repos::{RepoError, StoreHealth};

pub const LIVENESS_BODY: &str = "alive";

#[derive(Clone)]
pub struct HealthState {
    pub store: Arc<dyn StoreHealth>,
}

pub fn build_router(state: HealthState) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/health/db", get(db_health))
        .with_state(state)
}

async fn liveness() -> &'static str {
    LIVENESS_BODY
}

async fn db_health(State(state): State<HealthState>) -> Response {
    db_health_response(state.store.health_check().await)
}

fn db_health_response(result: Result<(), RepoError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            warn!(
                target = "tidings::infra::http::db_health",
                error = %err,
                transient = err.is_transient(),
                "store health check failed"
            );
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}
