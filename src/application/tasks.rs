//! Task creation and mutation; keeps `next_execution` aligned with the rule.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::info;

use crate::application::access::AccessService;
use crate::application::error::AppError;
use crate::application::repos::{TaskFilter, TasksRepo, TemplatesRepo};
use crate::domain::entities::{
    ChatId, ChatRecord, TaskRecord, TemplateSnapshot, UserId, UserRecord, short_id,
};
use crate::domain::error::DomainError;
use crate::domain::schedule::{ScheduleRule, next_fire};
use crate::util::timezone::localized_datetime;

#[derive(Debug, Clone)]
pub struct CreateTaskCommand {
    pub template_id: String,
    pub target_chat_id: ChatId,
    pub schedule: ScheduleRule,
    pub is_test: bool,
}

/// Field-level changes; `None` leaves a field as it is. `image: Some(None)`
/// drops the snapshot image.
#[derive(Debug, Clone, Default)]
pub struct UpdateTaskCommand {
    pub id: String,
    pub name: Option<String>,
    pub text: Option<String>,
    pub image: Option<Option<String>>,
    pub target_chat_id: Option<ChatId>,
    pub schedule: Option<ScheduleRule>,
    pub is_active: Option<bool>,
}

/// Next fire instant for `rule` in `timezone`, as an absolute instant.
pub fn next_execution_after(
    rule: &ScheduleRule,
    timezone: Tz,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    next_fire(rule, localized_datetime(now, timezone)).map(|instant| instant.with_timezone(&Utc))
}

#[derive(Clone)]
pub struct TaskService {
    access: AccessService,
    tasks: Arc<dyn TasksRepo>,
    templates: Arc<dyn TemplatesRepo>,
    timezone: Tz,
}

impl TaskService {
    pub fn new(
        access: AccessService,
        tasks: Arc<dyn TasksRepo>,
        templates: Arc<dyn TemplatesRepo>,
        timezone: Tz,
    ) -> Self {
        Self {
            access,
            tasks,
            templates,
            timezone,
        }
    }

    pub async fn create_task(
        &self,
        operator: UserId,
        command: CreateTaskCommand,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, AppError> {
        let user = self.access.resolve(operator).await?;
        let template = self
            .templates
            .get_template(&command.template_id)
            .await?
            .ok_or_else(|| AppError::not_found("template", &command.template_id))?;
        if !self.access.oracle().can_read_group(&user, &template.group_id) {
            return Err(AppError::denied("read template group"));
        }
        self.require_chat(&user, command.target_chat_id).await?;
        if command.is_test && !command.schedule.is_trivial() {
            return Err(DomainError::validation(
                "test tasks need one weekday, one time and a weekly cadence",
            )
            .into());
        }

        let snapshot = TemplateSnapshot::from(&template);
        let next_execution = next_execution_after(&command.schedule, self.timezone, now);
        let task = TaskRecord {
            id: short_id(),
            template_id: template.id,
            template_name: snapshot.name,
            template_text: snapshot.text,
            template_image: snapshot.image,
            group_id: template.group_id,
            created_by: user.id,
            created_at: now,
            is_active: true,
            is_test: command.is_test,
            target_chat_id: Some(command.target_chat_id),
            schedule: command.schedule,
            last_executed: None,
            next_execution,
        };

        if !self.tasks.upsert_task(&task).await?.applied() {
            return Err(AppError::unexpected("task write was not applied"));
        }

        info!(
            target = "tidings::application::tasks",
            task_id = %task.id,
            chat_id = command.target_chat_id,
            schedule = %task.schedule.describe(),
            next_execution = ?task.next_execution,
            is_test = task.is_test,
            "task created"
        );
        Ok(task)
    }

    pub async fn update_task(
        &self,
        operator: UserId,
        command: UpdateTaskCommand,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, AppError> {
        let user = self.access.resolve(operator).await?;
        let current = self.load(&command.id).await?;
        self.require_task_access(&user, &current)?;

        let mut next = current.clone();
        let mut rearm = false;

        if let Some(name) = command.name {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(DomainError::validation("task name must not be empty").into());
            }
            next.template_name = trimmed.to_string();
        }
        if let Some(text) = command.text {
            next.template_text = text;
        }
        if let Some(image) = command.image {
            next.template_image = image;
        }
        if next.template_text.trim().is_empty() && next.template_image.is_none() {
            return Err(DomainError::validation(
                "message text must not be empty without an image",
            )
            .into());
        }
        if let Some(chat) = command.target_chat_id {
            rearm |= next.target_chat_id != Some(chat);
            next.target_chat_id = Some(chat);
        }
        if let Some(schedule) = command.schedule {
            if next.is_test && !schedule.is_trivial() {
                return Err(DomainError::validation(
                    "test tasks need one weekday, one time and a weekly cadence",
                )
                .into());
            }
            rearm = true;
            next.schedule = schedule;
        }
        if let Some(active) = command.is_active {
            rearm |= next.is_active != active;
            next.is_active = active;
        }

        // Access is checked against the post-image.
        match next.target_chat_id {
            Some(chat) if next.target_chat_id != current.target_chat_id => {
                self.require_chat(&user, chat).await?;
            }
            Some(chat) => {
                if !self.access.oracle().can_send_to_chat(&user, chat) {
                    return Err(AppError::denied("send to chat"));
                }
            }
            None if next.is_active => {
                return Err(DomainError::validation("an active task needs a target chat").into());
            }
            None => {}
        }

        if rearm {
            next.next_execution = if next.is_active {
                next_execution_after(&next.schedule, self.timezone, now)
            } else {
                None
            };
        }

        if !self.tasks.upsert_task(&next).await?.applied() {
            return Err(AppError::unexpected("task write was not applied"));
        }

        info!(
            target = "tidings::application::tasks",
            task_id = %next.id,
            is_active = next.is_active,
            next_execution = ?next.next_execution,
            "task updated"
        );
        Ok(next)
    }

    pub async fn set_active(
        &self,
        operator: UserId,
        id: &str,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, AppError> {
        self.update_task(
            operator,
            UpdateTaskCommand {
                id: id.to_string(),
                is_active: Some(active),
                ..Default::default()
            },
            now,
        )
        .await
    }

    pub async fn delete_task(&self, operator: UserId, id: &str) -> Result<(), AppError> {
        let user = self.access.resolve(operator).await?;
        let task = self.load(id).await?;
        self.require_task_access(&user, &task)?;
        if let Some(chat) = task.target_chat_id {
            if !self.access.oracle().can_send_to_chat(&user, chat) {
                return Err(AppError::denied("send to chat"));
            }
        }

        if !self.tasks.delete_task(id).await?.applied() {
            return Err(AppError::not_found("task", id));
        }
        info!(target = "tidings::application::tasks", task_id = %id, "task deleted");
        Ok(())
    }

    pub async fn get_task(&self, operator: UserId, id: &str) -> Result<TaskRecord, AppError> {
        let user = self.access.resolve(operator).await?;
        let task = self.load(id).await?;
        self.require_task_access(&user, &task)?;
        Ok(task)
    }

    pub async fn list_tasks(
        &self,
        operator: UserId,
        filter: &TaskFilter,
    ) -> Result<Vec<TaskRecord>, AppError> {
        let user = self.access.resolve(operator).await?;
        let tasks = self.tasks.list_tasks(filter).await?;
        Ok(tasks
            .into_iter()
            .filter(|task| self.access.oracle().can_read_group(&user, &task.group_id))
            .collect())
    }

    pub async fn chats_accessible_to(&self, operator: UserId) -> Result<Vec<ChatRecord>, AppError> {
        let user = self.access.resolve(operator).await?;
        self.access.chats_accessible_to(&user).await
    }

    async fn load(&self, id: &str) -> Result<TaskRecord, AppError> {
        self.tasks
            .get_task(id)
            .await?
            .ok_or_else(|| AppError::not_found("task", id))
    }

    fn require_task_access(&self, user: &UserRecord, task: &TaskRecord) -> Result<(), AppError> {
        if self.access.oracle().can_read_group(user, &task.group_id) {
            Ok(())
        } else {
            Err(AppError::denied("read task group"))
        }
    }

    async fn require_chat(&self, user: &UserRecord, chat: ChatId) -> Result<(), AppError> {
        if !self.access.oracle().can_send_to_chat(user, chat) {
            return Err(AppError::denied("send to chat"));
        }
        if self.access.chat(chat).await?.is_none() {
            return Err(AppError::not_found("chat", chat));
        }
        Ok(())
    }
}
