//! Operator resolution and access administration.

use std::sync::Arc;

use tracing::info;

use crate::application::error::AppError;
use crate::application::repos::{AccessEdgesRepo, ChatsRepo, GroupsRepo, UsersRepo};
use crate::domain::access::AccessOracle;
use crate::domain::entities::{ChatId, ChatRecord, GroupRecord, UserId, UserRecord};
use crate::domain::error::DomainError;
use crate::domain::types::Role;

#[derive(Debug, Clone)]
pub struct UpsertUserCommand {
    pub id: UserId,
    pub name: String,
    pub role: Role,
}

#[derive(Clone)]
pub struct AccessService {
    oracle: AccessOracle,
    users: Arc<dyn UsersRepo>,
    chats: Arc<dyn ChatsRepo>,
    groups: Arc<dyn GroupsRepo>,
    edges: Arc<dyn AccessEdgesRepo>,
}

impl AccessService {
    pub fn new(
        oracle: AccessOracle,
        users: Arc<dyn UsersRepo>,
        chats: Arc<dyn ChatsRepo>,
        groups: Arc<dyn GroupsRepo>,
        edges: Arc<dyn AccessEdgesRepo>,
    ) -> Self {
        Self {
            oracle,
            users,
            chats,
            groups,
            edges,
        }
    }

    pub fn oracle(&self) -> &AccessOracle {
        &self.oracle
    }

    /// Effective user with grants, as seen by the access predicates.
    pub async fn resolve(&self, user_id: UserId) -> Result<UserRecord, AppError> {
        let stored = self.users.get_user(user_id).await?;
        Ok(self.oracle.effective_user(user_id, stored))
    }

    pub async fn chat(&self, chat_id: ChatId) -> Result<Option<ChatRecord>, AppError> {
        Ok(self.chats.get_chat(chat_id).await?)
    }

    pub async fn group(&self, group_id: &str) -> Result<Option<GroupRecord>, AppError> {
        Ok(self.groups.get_group(group_id).await?)
    }

    /// Every stored chat for admins, otherwise the stored chats the user may
    /// send to.
    pub async fn chats_accessible_to(&self, user: &UserRecord) -> Result<Vec<ChatRecord>, AppError> {
        let chats = self.chats.list_chats().await?;
        Ok(chats
            .into_iter()
            .filter(|chat| self.oracle.can_send_to_chat(user, chat.id))
            .collect())
    }

    pub async fn upsert_user(
        &self,
        operator: UserId,
        command: UpsertUserCommand,
    ) -> Result<UserRecord, AppError> {
        self.require_user_admin(operator).await?;
        let name = command.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("user name must not be empty").into());
        }

        let record = UserRecord::new(command.id, name, command.role);
        self.users.upsert_user(&record).await?;
        info!(
            target = "tidings::application::access",
            user_id = record.id,
            role = %record.role,
            "user saved"
        );
        self.resolve(record.id).await
    }

    pub async fn delete_user(&self, operator: UserId, id: UserId) -> Result<(), AppError> {
        self.require_user_admin(operator).await?;
        if !self.users.delete_user(id).await?.applied() {
            return Err(AppError::not_found("user", id));
        }
        info!(target = "tidings::application::access", user_id = id, "user deleted");
        Ok(())
    }

    pub async fn list_users(&self, operator: UserId) -> Result<Vec<UserRecord>, AppError> {
        self.require_user_admin(operator).await?;
        Ok(self.users.list_users().await?)
    }

    pub async fn upsert_chat(
        &self,
        operator: UserId,
        chat: ChatRecord,
    ) -> Result<ChatRecord, AppError> {
        self.require_user_admin(operator).await?;
        if chat.display_name.trim().is_empty() {
            return Err(DomainError::validation("chat display name must not be empty").into());
        }
        self.chats.upsert_chat(&chat).await?;
        info!(target = "tidings::application::access", chat_id = chat.id, "chat saved");
        Ok(chat)
    }

    pub async fn delete_chat(&self, operator: UserId, id: ChatId) -> Result<(), AppError> {
        self.require_user_admin(operator).await?;
        if !self.chats.delete_chat(id).await?.applied() {
            return Err(AppError::not_found("chat", id));
        }
        info!(target = "tidings::application::access", chat_id = id, "chat deleted");
        Ok(())
    }

    pub async fn list_chats(&self, operator: UserId) -> Result<Vec<ChatRecord>, AppError> {
        self.require_user_admin(operator).await?;
        Ok(self.chats.list_chats().await?)
    }

    pub async fn upsert_group(
        &self,
        operator: UserId,
        group: GroupRecord,
    ) -> Result<GroupRecord, AppError> {
        self.require_user_admin(operator).await?;
        if group.id.trim().is_empty() {
            return Err(DomainError::validation("group id must not be empty").into());
        }
        self.groups.upsert_group(&group).await?;
        Ok(group)
    }

    pub async fn list_groups(&self, operator: UserId) -> Result<Vec<GroupRecord>, AppError> {
        self.require_user_admin(operator).await?;
        Ok(self.groups.list_groups().await?)
    }

    pub async fn grant_chat(
        &self,
        operator: UserId,
        user: UserId,
        chat: ChatId,
    ) -> Result<(), AppError> {
        self.require_user_admin(operator).await?;
        self.require_user(user).await?;
        if self.chats.get_chat(chat).await?.is_none() {
            return Err(AppError::not_found("chat", chat));
        }
        self.edges.grant_chat(user, chat).await?;
        info!(target = "tidings::application::access", user_id = user, chat_id = chat, "chat granted");
        Ok(())
    }

    pub async fn revoke_chat(
        &self,
        operator: UserId,
        user: UserId,
        chat: ChatId,
    ) -> Result<(), AppError> {
        self.require_user_admin(operator).await?;
        self.edges.revoke_chat(user, chat).await?;
        info!(target = "tidings::application::access", user_id = user, chat_id = chat, "chat revoked");
        Ok(())
    }

    pub async fn grant_group(
        &self,
        operator: UserId,
        user: UserId,
        group: &str,
    ) -> Result<(), AppError> {
        self.require_user_admin(operator).await?;
        self.require_user(user).await?;
        if self.groups.get_group(group).await?.is_none() {
            return Err(AppError::not_found("group", group));
        }
        self.edges.grant_group(user, group).await?;
        info!(target = "tidings::application::access", user_id = user, group, "group granted");
        Ok(())
    }

    pub async fn revoke_group(
        &self,
        operator: UserId,
        user: UserId,
        group: &str,
    ) -> Result<(), AppError> {
        self.require_user_admin(operator).await?;
        self.edges.revoke_group(user, group).await?;
        info!(target = "tidings::application::access", user_id = user, group, "group revoked");
        Ok(())
    }

    async fn require_user_admin(&self, operator: UserId) -> Result<UserRecord, AppError> {
        let user = self.resolve(operator).await?;
        if !self.oracle.can_manage_users(&user) {
            return Err(AppError::denied("manage users"));
        }
        Ok(user)
    }

    async fn require_user(&self, user: UserId) -> Result<(), AppError> {
        match self.users.get_user(user).await? {
            Some(_) => Ok(()),
            None => Err(AppError::not_found("user", user)),
        }
    }
}
