//! Access predicates over users, roles, template groups and chats.

use super::entities::{ChatId, UserId, UserRecord};
use super::types::Role;

/// Decides what an operator may do. Holds the configured super-admin id; every
/// other input comes from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessOracle {
    super_admin_id: UserId,
}

impl AccessOracle {
    pub fn new(super_admin_id: UserId) -> Self {
        Self { super_admin_id }
    }

    pub fn super_admin_id(&self) -> UserId {
        self.super_admin_id
    }

    /// Effective user for `user_id`: the stored row, a synthesised admin for the
    /// super-admin, or a guest without grants.
    pub fn effective_user(&self, user_id: UserId, stored: Option<UserRecord>) -> UserRecord {
        match stored {
            Some(mut user) => {
                if user.id == self.super_admin_id {
                    user.role = Role::Admin;
                }
                user
            }
            None if user_id == self.super_admin_id => UserRecord::new(user_id, "admin", Role::Admin),
            None => UserRecord::new(user_id, "", Role::Guest),
        }
    }

    pub fn is_admin(&self, user: &UserRecord) -> bool {
        user.id == self.super_admin_id || user.role == Role::Admin
    }

    pub fn can_read_group(&self, user: &UserRecord, group_id: &str) -> bool {
        if self.is_admin(user) {
            return true;
        }
        matches!(user.role, Role::Manager | Role::Operator) && user.template_groups.contains(group_id)
    }

    pub fn can_send_to_chat(&self, user: &UserRecord, chat_id: ChatId) -> bool {
        self.is_admin(user) || user.chat_access.contains(&chat_id)
    }

    pub fn can_manage_users(&self, user: &UserRecord) -> bool {
        self.is_admin(user)
    }

    pub fn can_create_template(&self, user: &UserRecord) -> bool {
        self.is_admin(user) || user.role == Role::Manager
    }
}
