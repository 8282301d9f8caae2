//! Repository traits describing persistence adapters.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::entities::{
    ChatId, ChatRecord, GroupRecord, TaskRecord, TemplateRecord, UserId, UserRecord,
};

#[derive(Debug, Error)]
pub enum RepoError {
    /// Connection lost or pool exhausted.
    #[error("store unavailable: {message}")]
    Unavailable { message: String },
    /// Serialization failure or deadlock; the write may be retried.
    #[error("conflicting write: {message}")]
    Conflict { message: String },
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RepoError::Unavailable { .. } | RepoError::Conflict { .. } | RepoError::Timeout
        )
    }
}

/// Outcome of a single-row write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteReceipt {
    pub rows_affected: u64,
}

impl WriteReceipt {
    pub fn new(rows_affected: u64) -> Self {
        Self { rows_affected }
    }

    pub fn applied(&self) -> bool {
        self.rows_affected > 0
    }
}

/// Unset fields do not constrain the listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub group_id: Option<String>,
    pub created_by: Option<UserId>,
    pub target_chat_id: Option<ChatId>,
    pub is_active: Option<bool>,
    pub is_test: Option<bool>,
}

impl TaskFilter {
    pub fn matches(&self, task: &TaskRecord) -> bool {
        self.group_id.as_ref().is_none_or(|g| *g == task.group_id)
            && self.created_by.is_none_or(|u| u == task.created_by)
            && self
                .target_chat_id
                .is_none_or(|c| task.target_chat_id == Some(c))
            && self.is_active.is_none_or(|a| a == task.is_active)
            && self.is_test.is_none_or(|t| t == task.is_test)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateFilter {
    /// `None` lists every group.
    pub group_ids: Option<BTreeSet<String>>,
}

impl TemplateFilter {
    pub fn matches(&self, template: &TemplateRecord) -> bool {
        self.group_ids
            .as_ref()
            .is_none_or(|groups| groups.contains(&template.group_id))
    }
}

// Listings of templates and tasks are ordered by `created_at` descending, then
// `id` ascending. Users, chats and groups are ordered by id.

#[async_trait]
pub trait TemplatesRepo: Send + Sync {
    async fn upsert_template(&self, template: &TemplateRecord) -> Result<WriteReceipt, RepoError>;

    async fn get_template(&self, id: &str) -> Result<Option<TemplateRecord>, RepoError>;

    async fn delete_template(&self, id: &str) -> Result<WriteReceipt, RepoError>;

    async fn list_templates(&self, filter: &TemplateFilter)
    -> Result<Vec<TemplateRecord>, RepoError>;
}

#[async_trait]
pub trait TasksRepo: Send + Sync {
    async fn upsert_task(&self, task: &TaskRecord) -> Result<WriteReceipt, RepoError>;

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>, RepoError>;

    async fn delete_task(&self, id: &str) -> Result<WriteReceipt, RepoError>;

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, RepoError>;

    /// Active tasks with `next_execution <= now`, ordered by
    /// `(next_execution, id)`.
    async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<TaskRecord>, RepoError>;

    /// Whether any task snapshot still points at `blob_ref`.
    async fn image_in_use(&self, blob_ref: &str) -> Result<bool, RepoError>;
}

#[async_trait]
pub trait UsersRepo: Send + Sync {
    /// Replaces the user row only; access edges are left untouched.
    async fn upsert_user(&self, user: &UserRecord) -> Result<WriteReceipt, RepoError>;

    /// Includes grants from both edge sets.
    async fn get_user(&self, id: UserId) -> Result<Option<UserRecord>, RepoError>;

    async fn delete_user(&self, id: UserId) -> Result<WriteReceipt, RepoError>;

    async fn list_users(&self) -> Result<Vec<UserRecord>, RepoError>;
}

#[async_trait]
pub trait ChatsRepo: Send + Sync {
    async fn upsert_chat(&self, chat: &ChatRecord) -> Result<WriteReceipt, RepoError>;

    async fn get_chat(&self, id: ChatId) -> Result<Option<ChatRecord>, RepoError>;

    async fn delete_chat(&self, id: ChatId) -> Result<WriteReceipt, RepoError>;

    async fn list_chats(&self) -> Result<Vec<ChatRecord>, RepoError>;
}

#[async_trait]
pub trait GroupsRepo: Send + Sync {
    async fn upsert_group(&self, group: &GroupRecord) -> Result<WriteReceipt, RepoError>;

    async fn get_group(&self, id: &str) -> Result<Option<GroupRecord>, RepoError>;

    async fn list_groups(&self) -> Result<Vec<GroupRecord>, RepoError>;
}

#[async_trait]
pub trait AccessEdgesRepo: Send + Sync {
    async fn grant_chat(&self, user: UserId, chat: ChatId) -> Result<WriteReceipt, RepoError>;

    async fn revoke_chat(&self, user: UserId, chat: ChatId) -> Result<WriteReceipt, RepoError>;

    async fn grant_group(&self, user: UserId, group: &str) -> Result<WriteReceipt, RepoError>;

    async fn revoke_group(&self, user: UserId, group: &str) -> Result<WriteReceipt, RepoError>;

    async fn list_chat_grants(&self, user: UserId) -> Result<Vec<ChatId>, RepoError>;

    async fn list_group_grants(&self, user: UserId) -> Result<Vec<String>, RepoError>;
}

#[async_trait]
pub trait StoreHealth: Send + Sync {
    async fn health_check(&self) -> Result<(), RepoError>;
}

/// Listing order shared by templates and tasks.
pub fn newest_first<T>(items: &mut [T], key: impl Fn(&T) -> (DateTime<Utc>, &str)) {
    items.sort_by(|a, b| {
        let (a_at, a_id) = key(a);
        let (b_at, b_id) = key(b);
        b_at.cmp(&a_at).then_with(|| a_id.cmp(b_id))
    });
}
