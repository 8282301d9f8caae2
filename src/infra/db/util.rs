use serde::{Serialize, de::DeserializeOwned};

use crate::application::repos::RepoError;

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RepoError::Unavailable {
                message: err.to_string(),
            }
        }
        sqlx::Error::Tls(_) => RepoError::Unavailable {
            message: err.to_string(),
        },
        sqlx::Error::Database(db)
            if matches!(
                db.code().as_deref(),
                Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED)
            ) =>
        {
            RepoError::Conflict {
                message: db.message().to_string(),
            }
        }
        sqlx::Error::Database(db) if db.message().contains("duplicate key") => {
            RepoError::Duplicate {
                constraint: db.constraint().unwrap_or("unknown").to_string(),
            }
        }
        sqlx::Error::Database(db)
            if db.message().contains("violates foreign key constraint")
                || db.message().contains("invalid input syntax") =>
        {
            RepoError::InvalidInput {
                message: db.message().to_string(),
            }
        }
        sqlx::Error::Database(db) if db.message().contains("violates") => RepoError::Integrity {
            message: db.message().to_string(),
        },
        sqlx::Error::Database(db)
            if db
                .message()
                .contains("canceling statement due to user request") =>
        {
            RepoError::Timeout
        }
        other => RepoError::from_persistence(other),
    }
}

/// Array columns hold JSON text; NULL and empty strings read as empty lists.
pub fn decode_json_list<T: DeserializeOwned>(
    column: &'static str,
    value: Option<&str>,
) -> Result<Vec<T>, RepoError> {
    match value.map(str::trim) {
        None | Some("") => Ok(Vec::new()),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|err| RepoError::integrity(format!("column `{column}` is not a JSON list: {err}"))),
    }
}

pub fn encode_json_list<T: Serialize>(values: &[T]) -> Result<String, RepoError> {
    serde_json::to_string(values).map_err(RepoError::from_persistence)
}
