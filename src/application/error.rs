use thiserror::Error;

use crate::application::gateway::GatewayError;
use crate::application::repos::RepoError;
use crate::domain::error::DomainError;
use crate::infra::blobs::BlobError;
use crate::infra::error::InfraError;

/// Operator-visible classification of every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    PermissionDenied,
    NotFound,
    StoreTransient,
    GatewayTransient,
    GatewayPermanent,
    Internal,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("permission denied: {action}")]
    PermissionDenied { action: &'static str },
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn denied(action: &'static str) -> Self {
        Self::PermissionDenied { action }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Domain(DomainError::Validation { .. }) | AppError::Validation(_) => {
                ErrorKind::Validation
            }
            AppError::Domain(DomainError::NotFound { .. })
            | AppError::Repo(RepoError::NotFound)
            | AppError::NotFound { .. } => ErrorKind::NotFound,
            AppError::Domain(DomainError::Invariant { .. }) => ErrorKind::Internal,
            AppError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            AppError::Repo(RepoError::InvalidInput { .. }) => ErrorKind::Validation,
            AppError::Repo(err) if err.is_transient() => ErrorKind::StoreTransient,
            AppError::Repo(_) => ErrorKind::Internal,
            AppError::Gateway(GatewayError::Transient { .. }) => ErrorKind::GatewayTransient,
            AppError::Gateway(GatewayError::Permanent { .. }) => ErrorKind::GatewayPermanent,
            AppError::Blob(BlobError::EmptyPayload | BlobError::InvalidPath(_)) => {
                ErrorKind::Validation
            }
            AppError::Blob(BlobError::Io(_)) => ErrorKind::Internal,
            AppError::Infra(InfraError::Database { .. }) => ErrorKind::StoreTransient,
            AppError::Infra(InfraError::Http { .. }) => ErrorKind::GatewayTransient,
            AppError::Infra(_) | AppError::Unexpected(_) => ErrorKind::Internal,
        }
    }

    /// Single line suitable for replying to an operator.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                capitalize(&self.to_string())
            }
            ErrorKind::StoreTransient => "Storage is temporarily unavailable, try again shortly.".into(),
            ErrorKind::GatewayTransient => "Delivery is temporarily unavailable, try again shortly.".into(),
            ErrorKind::GatewayPermanent => format!("Delivery was rejected: {}", self.gateway_reason()),
            ErrorKind::Internal => "Something went wrong; the failure was logged.".into(),
        }
    }

    fn gateway_reason(&self) -> &str {
        match self {
            AppError::Gateway(err) => err.reason(),
            _ => "unknown reason",
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
