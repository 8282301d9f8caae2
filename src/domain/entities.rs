//! Persistent records shared across the application.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::schedule::ScheduleRule;
use super::types::Role;

pub type UserId = i64;
pub type ChatId = i64;

const SHORT_ID_LEN: usize = 8;

/// Fresh opaque identifier for templates and tasks.
pub fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(SHORT_ID_LEN);
    id
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub id: String,
    pub name: String,
    pub group_id: String,
    pub text: String,
    pub image_ref: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub subgroup: Option<String>,
}

/// Template fields copied into a task when it is bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSnapshot {
    pub name: String,
    pub text: String,
    pub image: Option<String>,
}

impl From<&TemplateRecord> for TemplateSnapshot {
    fn from(template: &TemplateRecord) -> Self {
        Self {
            name: template.name.clone(),
            text: template.text.clone(),
            image: template.image_ref.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    /// Original template; may no longer exist.
    pub template_id: String,
    pub template_name: String,
    pub template_text: String,
    pub template_image: Option<String>,
    pub group_id: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    pub is_test: bool,
    /// `None` only for legacy rows written before targets were stored.
    pub target_chat_id: Option<ChatId>,
    pub schedule: ScheduleRule,
    pub last_executed: Option<DateTime<Utc>>,
    pub next_execution: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.next_execution.is_some_and(|next| next <= now)
    }

    /// Set once the cursor has been stamped for the slot now pending.
    pub fn already_delivered_pending_slot(&self) -> bool {
        self.next_execution.is_some() && self.last_executed == self.next_execution
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub name: String,
    pub role: Role,
    pub template_groups: BTreeSet<String>,
    pub chat_access: BTreeSet<ChatId>,
}

impl UserRecord {
    pub fn new(id: UserId, name: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            name: name.into(),
            role,
            template_groups: BTreeSet::new(),
            chat_access: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: ChatId,
    pub display_name: String,
    pub original_name: String,
}

/// A template group as catalogued in the `groups` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: String,
    pub name: String,
    /// Legacy per-group allow-list; user grants live in the edge tables.
    pub allowed_users: Vec<UserId>,
}
