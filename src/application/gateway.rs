//! Outbound delivery contract implemented by the bot adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::domain::entities::ChatId;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Rate limit, server error, timeout or network failure.
    #[error("transient delivery failure: {reason}")]
    Transient { reason: String },
    /// The target or payload was rejected and retrying cannot help.
    #[error("permanent delivery failure: {reason}")]
    Permanent { reason: String },
}

impl GatewayError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent {
            reason: reason.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, GatewayError::Permanent { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            GatewayError::Transient { reason } | GatewayError::Permanent { reason } => reason,
        }
    }
}

#[async_trait]
pub trait Gateway: Send + Sync {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<(), GatewayError>;

    /// `blob_ref` names a file in blob storage; the caption may be empty.
    async fn send_photo(
        &self,
        chat_id: ChatId,
        blob_ref: &str,
        caption: &str,
    ) -> Result<(), GatewayError>;
}

/// A permanent delivery failure, published once per deactivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryFailure {
    pub task_id: String,
    pub chat_id: Option<ChatId>,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl DeliveryFailure {
    /// Operator-facing notice sent to the super-admin.
    pub fn notice(&self) -> String {
        let chat = self
            .chat_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "none".to_string());
        format!(
            "Task {} was deactivated: delivery to chat {} failed permanently ({}).",
            self.task_id, chat, self.reason
        )
    }
}
