//! In-memory repositories for service tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::application::access::AccessService;
use crate::application::repos::{
    AccessEdgesRepo, ChatsRepo, GroupsRepo, RepoError, StoreHealth, TaskFilter, TasksRepo,
    TemplateFilter, TemplatesRepo, UsersRepo, WriteReceipt, newest_first,
};
use crate::domain::access::AccessOracle;
use crate::domain::entities::{
    ChatId, ChatRecord, GroupRecord, TaskRecord, TemplateRecord, TemplateSnapshot, UserId,
    UserRecord,
};
use crate::domain::schedule::{ScheduleRule, WallTime};
use crate::domain::types::Cadence;

/// An active Monday 09:00 task bound to `template`, targeting chat -100.
pub fn task_from(template: &TemplateRecord) -> TaskRecord {
    let snapshot = TemplateSnapshot::from(template);
    TaskRecord {
        id: format!("task-{}", template.id),
        template_id: template.id.clone(),
        template_name: snapshot.name,
        template_text: snapshot.text,
        template_image: snapshot.image,
        group_id: template.group_id.clone(),
        created_by: template.created_by,
        created_at: template.created_at,
        is_active: true,
        is_test: false,
        target_chat_id: Some(-100),
        schedule: ScheduleRule::weekly(
            [chrono::Weekday::Mon],
            [WallTime::new(9, 0).unwrap()],
            Cadence::Weekly,
        )
        .unwrap(),
        last_executed: None,
        next_execution: None,
    }
}

#[derive(Default)]
struct State {
    templates: BTreeMap<String, TemplateRecord>,
    tasks: BTreeMap<String, TaskRecord>,
    users: BTreeMap<UserId, UserRecord>,
    chats: BTreeMap<ChatId, ChatRecord>,
    groups: BTreeMap<String, GroupRecord>,
    chat_edges: BTreeSet<(UserId, ChatId)>,
    group_edges: BTreeSet<(UserId, String)>,
    task_writes: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_task_writes: Mutex<bool>,
}

impl MemoryStore {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn access_service(self: &Arc<Self>, super_admin: UserId) -> AccessService {
        AccessService::new(
            AccessOracle::new(super_admin),
            self.clone(),
            self.clone(),
            self.clone(),
            self.clone(),
        )
    }

    pub fn put_chat(&self, id: ChatId, name: &str) {
        self.state.lock().unwrap().chats.insert(
            id,
            ChatRecord {
                id,
                display_name: name.to_string(),
                original_name: name.to_string(),
            },
        );
    }

    pub fn put_group(&self, id: &str) {
        self.state.lock().unwrap().groups.insert(
            id.to_string(),
            GroupRecord {
                id: id.to_string(),
                name: id.to_string(),
                allowed_users: Vec::new(),
            },
        );
    }

    pub fn put_user(&self, user: UserRecord) {
        let mut state = self.state.lock().unwrap();
        for chat in &user.chat_access {
            state.chat_edges.insert((user.id, *chat));
        }
        for group in &user.template_groups {
            state.group_edges.insert((user.id, group.clone()));
        }
        state.users.insert(user.id, user);
    }

    pub fn put_template(&self, template: TemplateRecord) {
        self.state
            .lock()
            .unwrap()
            .templates
            .insert(template.id.clone(), template);
    }

    pub fn put_task(&self, task: TaskRecord) {
        self.state.lock().unwrap().tasks.insert(task.id.clone(), task);
    }

    pub fn task(&self, id: &str) -> Option<TaskRecord> {
        self.state.lock().unwrap().tasks.get(id).cloned()
    }

    pub fn template(&self, id: &str) -> Option<TemplateRecord> {
        self.state.lock().unwrap().templates.get(id).cloned()
    }

    pub fn task_count(&self) -> usize {
        self.state.lock().unwrap().tasks.len()
    }

    pub fn task_writes(&self) -> usize {
        self.state.lock().unwrap().task_writes
    }

    pub fn fail_task_writes(&self, fail: bool) {
        *self.fail_task_writes.lock().unwrap() = fail;
    }
}

#[async_trait]
impl TemplatesRepo for MemoryStore {
    async fn upsert_template(&self, template: &TemplateRecord) -> Result<WriteReceipt, RepoError> {
        self.put_template(template.clone());
        Ok(WriteReceipt::new(1))
    }

    async fn get_template(&self, id: &str) -> Result<Option<TemplateRecord>, RepoError> {
        Ok(self.template(id))
    }

    async fn delete_template(&self, id: &str) -> Result<WriteReceipt, RepoError> {
        let removed = self.state.lock().unwrap().templates.remove(id);
        Ok(WriteReceipt::new(removed.is_some() as u64))
    }

    async fn list_templates(
        &self,
        filter: &TemplateFilter,
    ) -> Result<Vec<TemplateRecord>, RepoError> {
        let state = self.state.lock().unwrap();
        let mut items: Vec<_> = state
            .templates
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        newest_first(&mut items, |t| (t.created_at, t.id.as_str()));
        Ok(items)
    }
}

#[async_trait]
impl TasksRepo for MemoryStore {
    async fn upsert_task(&self, task: &TaskRecord) -> Result<WriteReceipt, RepoError> {
        if *self.fail_task_writes.lock().unwrap() {
            return Err(RepoError::Unavailable {
                message: "connection reset".into(),
            });
        }
        let mut state = self.state.lock().unwrap();
        state.task_writes += 1;
        state.tasks.insert(task.id.clone(), task.clone());
        Ok(WriteReceipt::new(1))
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>, RepoError> {
        Ok(self.task(id))
    }

    async fn delete_task(&self, id: &str) -> Result<WriteReceipt, RepoError> {
        let removed = self.state.lock().unwrap().tasks.remove(id);
        Ok(WriteReceipt::new(removed.is_some() as u64))
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, RepoError> {
        let state = self.state.lock().unwrap();
        let mut items: Vec<_> = state
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        newest_first(&mut items, |t| (t.created_at, t.id.as_str()));
        Ok(items)
    }

    async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<TaskRecord>, RepoError> {
        let state = self.state.lock().unwrap();
        let mut due: Vec<_> = state
            .tasks
            .values()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.next_execution
                .cmp(&b.next_execution)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(due)
    }

    async fn image_in_use(&self, blob_ref: &str) -> Result<bool, RepoError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tasks
            .values()
            .any(|t| t.template_image.as_deref() == Some(blob_ref)))
    }
}

#[async_trait]
impl UsersRepo for MemoryStore {
    async fn upsert_user(&self, user: &UserRecord) -> Result<WriteReceipt, RepoError> {
        let mut row = user.clone();
        row.chat_access.clear();
        row.template_groups.clear();
        self.state.lock().unwrap().users.insert(row.id, row);
        Ok(WriteReceipt::new(1))
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserRecord>, RepoError> {
        let state = self.state.lock().unwrap();
        Ok(state.users.get(&id).cloned().map(|mut user| {
            user.chat_access = state
                .chat_edges
                .iter()
                .filter(|(u, _)| *u == id)
                .map(|(_, c)| *c)
                .collect();
            user.template_groups = state
                .group_edges
                .iter()
                .filter(|(u, _)| *u == id)
                .map(|(_, g)| g.clone())
                .collect();
            user
        }))
    }

    async fn delete_user(&self, id: UserId) -> Result<WriteReceipt, RepoError> {
        let mut state = self.state.lock().unwrap();
        let removed = state.users.remove(&id);
        state.chat_edges.retain(|(u, _)| *u != id);
        state.group_edges.retain(|(u, _)| *u != id);
        Ok(WriteReceipt::new(removed.is_some() as u64))
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, RepoError> {
        Ok(self.state.lock().unwrap().users.values().cloned().collect())
    }
}

#[async_trait]
impl ChatsRepo for MemoryStore {
    async fn upsert_chat(&self, chat: &ChatRecord) -> Result<WriteReceipt, RepoError> {
        self.state.lock().unwrap().chats.insert(chat.id, chat.clone());
        Ok(WriteReceipt::new(1))
    }

    async fn get_chat(&self, id: ChatId) -> Result<Option<ChatRecord>, RepoError> {
        Ok(self.state.lock().unwrap().chats.get(&id).cloned())
    }

    async fn delete_chat(&self, id: ChatId) -> Result<WriteReceipt, RepoError> {
        let mut state = self.state.lock().unwrap();
        let removed = state.chats.remove(&id);
        state.chat_edges.retain(|(_, c)| *c != id);
        Ok(WriteReceipt::new(removed.is_some() as u64))
    }

    async fn list_chats(&self) -> Result<Vec<ChatRecord>, RepoError> {
        Ok(self.state.lock().unwrap().chats.values().cloned().collect())
    }
}

#[async_trait]
impl GroupsRepo for MemoryStore {
    async fn upsert_group(&self, group: &GroupRecord) -> Result<WriteReceipt, RepoError> {
        self.state
            .lock()
            .unwrap()
            .groups
            .insert(group.id.clone(), group.clone());
        Ok(WriteReceipt::new(1))
    }

    async fn get_group(&self, id: &str) -> Result<Option<GroupRecord>, RepoError> {
        Ok(self.state.lock().unwrap().groups.get(id).cloned())
    }

    async fn list_groups(&self) -> Result<Vec<GroupRecord>, RepoError> {
        Ok(self.state.lock().unwrap().groups.values().cloned().collect())
    }
}

#[async_trait]
impl AccessEdgesRepo for MemoryStore {
    async fn grant_chat(&self, user: UserId, chat: ChatId) -> Result<WriteReceipt, RepoError> {
        let inserted = self.state.lock().unwrap().chat_edges.insert((user, chat));
        Ok(WriteReceipt::new(inserted as u64))
    }

    async fn revoke_chat(&self, user: UserId, chat: ChatId) -> Result<WriteReceipt, RepoError> {
        let removed = self.state.lock().unwrap().chat_edges.remove(&(user, chat));
        Ok(WriteReceipt::new(removed as u64))
    }

    async fn grant_group(&self, user: UserId, group: &str) -> Result<WriteReceipt, RepoError> {
        let inserted = self
            .state
            .lock()
            .unwrap()
            .group_edges
            .insert((user, group.to_string()));
        Ok(WriteReceipt::new(inserted as u64))
    }

    async fn revoke_group(&self, user: UserId, group: &str) -> Result<WriteReceipt, RepoError> {
        let removed = self
            .state
            .lock()
            .unwrap()
            .group_edges
            .remove(&(user, group.to_string()));
        Ok(WriteReceipt::new(removed as u64))
    }

    async fn list_chat_grants(&self, user: UserId) -> Result<Vec<ChatId>, RepoError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .chat_edges
            .iter()
            .filter(|(u, _)| *u == user)
            .map(|(_, c)| *c)
            .collect())
    }

    async fn list_group_grants(&self, user: UserId) -> Result<Vec<String>, RepoError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .group_edges
            .iter()
            .filter(|(u, _)| *u == user)
            .map(|(_, g)| g.clone())
            .collect())
    }
}

#[async_trait]
impl StoreHealth for MemoryStore {
    async fn health_check(&self) -> Result<(), RepoError> {
        Ok(())
    }
}
