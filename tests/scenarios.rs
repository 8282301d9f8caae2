use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc, Weekday};
use chrono_tz::{Europe::Moscow, Tz};
use tokio::sync::{Mutex, mpsc};

use tidings::application::access::AccessService;
use tidings::application::dispatch::{DispatchEngine, DispatchSettings};
use tidings::application::error::ErrorKind;
use tidings::application::gateway::{DeliveryFailure, Gateway, GatewayError};
use tidings::application::repos::{
    AccessEdgesRepo, ChatsRepo, GroupsRepo, RepoError, TaskFilter, TasksRepo, TemplateFilter,
    TemplatesRepo, UsersRepo, WriteReceipt,
};
use tidings::application::tasks::{CreateTaskCommand, TaskService};
use tidings::application::templates::{
    CreateTemplateCommand, ImageChange, ImageUpload, TemplateService, UpdateTemplateCommand,
};
use tidings::domain::access::AccessOracle;
use tidings::domain::entities::{
    ChatId, ChatRecord, GroupRecord, TaskRecord, TemplateRecord, UserId, UserRecord,
};
use tidings::domain::schedule::{ScheduleRule, WallTime};
use tidings::domain::types::{Cadence, Role};
use tidings::infra::blobs::BlobStorage;

const ADMIN: UserId = 1;
const OPERATOR: UserId = 20;
const CHAT_A: ChatId = -1001;
const CHAT_B: ChatId = -1002;
const GROUP: &str = "general";

#[derive(Default)]
struct Tables {
    templates: BTreeMap<String, TemplateRecord>,
    tasks: BTreeMap<String, TaskRecord>,
    users: BTreeMap<UserId, UserRecord>,
    chats: BTreeMap<ChatId, ChatRecord>,
    groups: BTreeMap<String, GroupRecord>,
    chat_edges: BTreeSet<(UserId, ChatId)>,
    group_edges: BTreeSet<(UserId, String)>,
}

#[derive(Default)]
struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    async fn task(&self, id: &str) -> TaskRecord {
        self.tables
            .lock()
            .await
            .tasks
            .get(id)
            .cloned()
            .expect("task present")
    }

    async fn task_count(&self) -> usize {
        self.tables.lock().await.tasks.len()
    }
}

#[async_trait]
impl TemplatesRepo for InMemoryStore {
    async fn upsert_template(&self, template: &TemplateRecord) -> Result<WriteReceipt, RepoError> {
        let mut tables = self.tables.lock().await;
        tables
            .templates
            .insert(template.id.clone(), template.clone());
        Ok(WriteReceipt::new(1))
    }

    async fn get_template(&self, id: &str) -> Result<Option<TemplateRecord>, RepoError> {
        Ok(self.tables.lock().await.templates.get(id).cloned())
    }

    async fn delete_template(&self, id: &str) -> Result<WriteReceipt, RepoError> {
        let removed = self.tables.lock().await.templates.remove(id);
        Ok(WriteReceipt::new(u64::from(removed.is_some())))
    }

    async fn list_templates(
        &self,
        filter: &TemplateFilter,
    ) -> Result<Vec<TemplateRecord>, RepoError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .templates
            .values()
            .filter(|template| filter.matches(template))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TasksRepo for InMemoryStore {
    async fn upsert_task(&self, task: &TaskRecord) -> Result<WriteReceipt, RepoError> {
        let mut tables = self.tables.lock().await;
        tables.tasks.insert(task.id.clone(), task.clone());
        Ok(WriteReceipt::new(1))
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>, RepoError> {
        Ok(self.tables.lock().await.tasks.get(id).cloned())
    }

    async fn delete_task(&self, id: &str) -> Result<WriteReceipt, RepoError> {
        let removed = self.tables.lock().await.tasks.remove(id);
        Ok(WriteReceipt::new(u64::from(removed.is_some())))
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, RepoError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .tasks
            .values()
            .filter(|task| filter.matches(task))
            .cloned()
            .collect())
    }

    async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<TaskRecord>, RepoError> {
        let tables = self.tables.lock().await;
        let mut due: Vec<_> = tables
            .tasks
            .values()
            .filter(|task| task.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| (a.next_execution, &a.id).cmp(&(b.next_execution, &b.id)));
        Ok(due)
    }

    async fn image_in_use(&self, blob_ref: &str) -> Result<bool, RepoError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .tasks
            .values()
            .any(|task| task.template_image.as_deref() == Some(blob_ref)))
    }
}

#[async_trait]
impl UsersRepo for InMemoryStore {
    async fn upsert_user(&self, user: &UserRecord) -> Result<WriteReceipt, RepoError> {
        let mut row = user.clone();
        row.chat_access.clear();
        row.template_groups.clear();
        self.tables.lock().await.users.insert(row.id, row);
        Ok(WriteReceipt::new(1))
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserRecord>, RepoError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.get(&id).cloned().map(|mut user| {
            user.chat_access = tables
                .chat_edges
                .iter()
                .filter(|(owner, _)| *owner == id)
                .map(|(_, chat)| *chat)
                .collect();
            user.template_groups = tables
                .group_edges
                .iter()
                .filter(|(owner, _)| *owner == id)
                .map(|(_, group)| group.clone())
                .collect();
            user
        }))
    }

    async fn delete_user(&self, id: UserId) -> Result<WriteReceipt, RepoError> {
        let removed = self.tables.lock().await.users.remove(&id);
        Ok(WriteReceipt::new(u64::from(removed.is_some())))
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, RepoError> {
        Ok(self.tables.lock().await.users.values().cloned().collect())
    }
}

#[async_trait]
impl ChatsRepo for InMemoryStore {
    async fn upsert_chat(&self, chat: &ChatRecord) -> Result<WriteReceipt, RepoError> {
        self.tables.lock().await.chats.insert(chat.id, chat.clone());
        Ok(WriteReceipt::new(1))
    }

    async fn get_chat(&self, id: ChatId) -> Result<Option<ChatRecord>, RepoError> {
        Ok(self.tables.lock().await.chats.get(&id).cloned())
    }

    async fn delete_chat(&self, id: ChatId) -> Result<WriteReceipt, RepoError> {
        let removed = self.tables.lock().await.chats.remove(&id);
        Ok(WriteReceipt::new(u64::from(removed.is_some())))
    }

    async fn list_chats(&self) -> Result<Vec<ChatRecord>, RepoError> {
        Ok(self.tables.lock().await.chats.values().cloned().collect())
    }
}

#[async_trait]
impl GroupsRepo for InMemoryStore {
    async fn upsert_group(&self, group: &GroupRecord) -> Result<WriteReceipt, RepoError> {
        let mut tables = self.tables.lock().await;
        tables.groups.insert(group.id.clone(), group.clone());
        Ok(WriteReceipt::new(1))
    }

    async fn get_group(&self, id: &str) -> Result<Option<GroupRecord>, RepoError> {
        Ok(self.tables.lock().await.groups.get(id).cloned())
    }

    async fn list_groups(&self) -> Result<Vec<GroupRecord>, RepoError> {
        Ok(self.tables.lock().await.groups.values().cloned().collect())
    }
}

#[async_trait]
impl AccessEdgesRepo for InMemoryStore {
    async fn grant_chat(&self, user: UserId, chat: ChatId) -> Result<WriteReceipt, RepoError> {
        let inserted = self.tables.lock().await.chat_edges.insert((user, chat));
        Ok(WriteReceipt::new(u64::from(inserted)))
    }

    async fn revoke_chat(&self, user: UserId, chat: ChatId) -> Result<WriteReceipt, RepoError> {
        let removed = self.tables.lock().await.chat_edges.remove(&(user, chat));
        Ok(WriteReceipt::new(u64::from(removed)))
    }

    async fn grant_group(&self, user: UserId, group: &str) -> Result<WriteReceipt, RepoError> {
        let mut tables = self.tables.lock().await;
        let inserted = tables.group_edges.insert((user, group.to_string()));
        Ok(WriteReceipt::new(u64::from(inserted)))
    }

    async fn revoke_group(&self, user: UserId, group: &str) -> Result<WriteReceipt, RepoError> {
        let mut tables = self.tables.lock().await;
        let removed = tables.group_edges.remove(&(user, group.to_string()));
        Ok(WriteReceipt::new(u64::from(removed)))
    }

    async fn list_chat_grants(&self, user: UserId) -> Result<Vec<ChatId>, RepoError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .chat_edges
            .iter()
            .filter(|(owner, _)| *owner == user)
            .map(|(_, chat)| *chat)
            .collect())
    }

    async fn list_group_grants(&self, user: UserId) -> Result<Vec<String>, RepoError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .group_edges
            .iter()
            .filter(|(owner, _)| *owner == user)
            .map(|(_, group)| group.clone())
            .collect())
    }
}

/// Records every send and answers from a script, then with success.
#[derive(Default)]
struct RecordingGateway {
    sent: Mutex<Vec<(ChatId, String)>>,
    photos: Mutex<Vec<String>>,
    script: Mutex<VecDeque<Result<(), GatewayError>>>,
}

impl RecordingGateway {
    fn scripted(replies: Vec<Result<(), GatewayError>>) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::default(),
            photos: Mutex::default(),
            script: Mutex::new(replies.into()),
        })
    }

    async fn sent(&self) -> Vec<(ChatId, String)> {
        self.sent.lock().await.clone()
    }

    async fn photos(&self) -> Vec<String> {
        self.photos.lock().await.clone()
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<(), GatewayError> {
        self.sent.lock().await.push((chat_id, text.to_string()));
        self.script.lock().await.pop_front().unwrap_or(Ok(()))
    }

    async fn send_photo(
        &self,
        chat_id: ChatId,
        blob_ref: &str,
        caption: &str,
    ) -> Result<(), GatewayError> {
        self.photos.lock().await.push(blob_ref.to_string());
        self.send_text(chat_id, caption).await
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    gateway: Arc<RecordingGateway>,
    tasks: TaskService,
    templates: TemplateService,
    blobs: Arc<BlobStorage>,
    engine: DispatchEngine,
    failures: mpsc::UnboundedReceiver<DeliveryFailure>,
    _blobs_dir: tempfile::TempDir,
}

async fn harness(gateway: Arc<RecordingGateway>) -> Harness {
    let store = Arc::new(InMemoryStore::default());
    seed(&store).await;

    let access = AccessService::new(
        AccessOracle::new(ADMIN),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
    );
    let blobs_dir = tempfile::tempdir().expect("temp dir");
    let blobs = Arc::new(BlobStorage::new(blobs_dir.path().to_path_buf()).expect("blob root"));
    let tasks = TaskService::new(access.clone(), store.clone(), store.clone(), Moscow);
    let templates = TemplateService::new(
        access.clone(),
        store.clone(),
        store.clone(),
        blobs.clone(),
    );

    let (sender, failures) = mpsc::unbounded_channel();
    let engine = DispatchEngine::new(
        store.clone(),
        gateway.clone(),
        blobs.clone(),
        access,
        DispatchSettings {
            timezone: Moscow,
            send_timeout: Duration::from_secs(5),
            restart_delay: Duration::from_secs(60),
        },
    )
    .with_failure_channel(sender);

    Harness {
        store,
        gateway,
        tasks,
        templates,
        blobs,
        engine,
        failures,
        _blobs_dir: blobs_dir,
    }
}

async fn seed(store: &InMemoryStore) {
    let mut tables = store.tables.lock().await;
    for (id, name) in [(CHAT_A, "Chat A"), (CHAT_B, "Chat B")] {
        tables.chats.insert(
            id,
            ChatRecord {
                id,
                display_name: name.to_string(),
                original_name: name.to_string(),
            },
        );
    }
    tables.groups.insert(
        GROUP.to_string(),
        GroupRecord {
            id: GROUP.to_string(),
            name: GROUP.to_string(),
            allowed_users: vec![OPERATOR],
        },
    );
    tables.templates.insert(
        "tpl1".to_string(),
        TemplateRecord {
            id: "tpl1".to_string(),
            name: "Standup".to_string(),
            group_id: GROUP.to_string(),
            text: "Standup in five minutes".to_string(),
            image_ref: None,
            created_by: ADMIN,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            subgroup: None,
        },
    );
    tables.users.insert(
        OPERATOR,
        UserRecord::new(OPERATOR, "operator", Role::Operator),
    );
    tables.chat_edges.insert((OPERATOR, CHAT_A));
    tables.group_edges.insert((OPERATOR, GROUP.to_string()));
}

fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Moscow
        .with_ymd_and_hms(y, m, d, h, min, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn at(hour: u32, minute: u32) -> WallTime {
    WallTime::new(hour, minute).unwrap()
}

fn task_with(id: &str, schedule: ScheduleRule, next: DateTime<Utc>) -> TaskRecord {
    TaskRecord {
        id: id.to_string(),
        template_id: "tpl1".to_string(),
        template_name: "Standup".to_string(),
        template_text: "Standup in five minutes".to_string(),
        template_image: None,
        group_id: GROUP.to_string(),
        created_by: ADMIN,
        created_at: local(2026, 1, 1, 0, 0),
        is_active: true,
        is_test: false,
        target_chat_id: Some(CHAT_A),
        schedule,
        last_executed: None,
        next_execution: Some(next),
    }
}

fn every_day(times: Vec<WallTime>) -> ScheduleRule {
    let days = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ];
    ScheduleRule::weekly(days, times, Cadence::Weekly).unwrap()
}

async fn create(h: &Harness, schedule: ScheduleRule, now: DateTime<Utc>) -> TaskRecord {
    h.tasks
        .create_task(
            ADMIN,
            CreateTaskCommand {
                template_id: "tpl1".to_string(),
                target_chat_id: CHAT_A,
                schedule,
                is_test: false,
            },
            now,
        )
        .await
        .expect("task created")
}

fn assert_zone(instant: DateTime<Utc>, tz: Tz, expected: &str) {
    assert_eq!(
        instant.with_timezone(&tz).format("%Y-%m-%d %H:%M %a").to_string(),
        expected
    );
}

#[tokio::test]
async fn weekly_single_time_fires_later_in_the_same_week() {
    let h = harness(RecordingGateway::scripted(vec![])).await;
    // Monday 10:00.
    let now = local(2026, 3, 2, 10, 0);
    let rule = ScheduleRule::weekly([Weekday::Wed], [at(9, 0)], Cadence::Weekly).unwrap();

    let task = create(&h, rule, now).await;

    assert_zone(task.next_execution.unwrap(), Moscow, "2026-03-04 09:00 Wed");
}

#[tokio::test]
async fn biweekly_rule_skips_to_the_next_odd_iso_week() {
    let h = harness(RecordingGateway::scripted(vec![])).await;
    // Monday 08:00 of ISO week 14.
    let now = local(2026, 3, 30, 8, 0);
    let rule = ScheduleRule::weekly([Weekday::Mon], [at(9, 0)], Cadence::Biweekly).unwrap();

    let task = create(&h, rule, now).await;

    assert_zone(task.next_execution.unwrap(), Moscow, "2026-04-06 09:00 Mon");
}

#[tokio::test]
async fn month_day_missing_from_february_skips_to_march() {
    let h = harness(RecordingGateway::scripted(vec![])).await;
    let now = local(2026, 2, 10, 12, 0);
    let rule = ScheduleRule::monthly([31], [at(12, 0)], Cadence::Weekly).unwrap();

    let task = create(&h, rule, now).await;

    assert_zone(task.next_execution.unwrap(), Moscow, "2026-03-31 12:00 Tue");
}

#[tokio::test]
async fn missed_slots_after_downtime_deliver_once() {
    let mut h = harness(RecordingGateway::scripted(vec![])).await;
    let yesterday = local(2026, 3, 2, 9, 0);
    let rule = every_day(vec![at(9, 0), at(18, 0)]);
    TasksRepo::upsert_task(h.store.as_ref(), &task_with("t1", rule, yesterday))
        .await
        .unwrap();

    let now = local(2026, 3, 3, 14, 0);
    let report = h.engine.tick(now).await.unwrap();
    assert_eq!(report.delivered, 1);

    let task = h.store.task("t1").await;
    assert_eq!(task.last_executed, Some(yesterday));
    assert_zone(task.next_execution.unwrap(), Moscow, "2026-03-03 18:00 Tue");
    assert_eq!(h.gateway.sent().await.len(), 1);

    let again = h.engine.tick(now + chrono::Duration::minutes(1)).await.unwrap();
    assert!(again.is_empty());
    assert_eq!(h.gateway.sent().await.len(), 1);
    assert!(h.failures.try_recv().is_err());
}

#[tokio::test]
async fn permanent_failure_deactivates_and_reports_once() {
    let gateway = RecordingGateway::scripted(vec![Err(GatewayError::permanent(
        "Bad Request: chat not found",
    ))]);
    let mut h = harness(gateway).await;
    let slot = local(2026, 3, 2, 9, 0);
    let rule = every_day(vec![at(9, 0)]);
    TasksRepo::upsert_task(h.store.as_ref(), &task_with("t1", rule, slot))
        .await
        .unwrap();

    let now = local(2026, 3, 2, 9, 1);
    let report = h.engine.tick(now).await.unwrap();
    assert_eq!(report.deactivated, 1);

    let task = h.store.task("t1").await;
    assert!(!task.is_active);
    assert_eq!(task.last_executed, Some(now));
    assert_eq!(task.next_execution, Some(slot));

    let failure = h.failures.try_recv().expect("failure published");
    assert_eq!(failure.task_id, "t1");
    assert_eq!(failure.chat_id, Some(CHAT_A));
    assert!(failure.reason.contains("chat not found"));

    h.engine.tick(now + chrono::Duration::minutes(1)).await.unwrap();
    assert!(h.failures.try_recv().is_err());
    assert_eq!(h.gateway.sent().await.len(), 1);
}

#[tokio::test]
async fn operator_cannot_target_a_chat_outside_their_access() {
    let h = harness(RecordingGateway::scripted(vec![])).await;
    let rule = every_day(vec![at(9, 0)]);

    let err = h
        .tasks
        .create_task(
            OPERATOR,
            CreateTaskCommand {
                template_id: "tpl1".to_string(),
                target_chat_id: CHAT_B,
                schedule: rule,
                is_test: false,
            },
            local(2026, 3, 2, 10, 0),
        )
        .await
        .expect_err("chat B is not granted");

    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert_eq!(h.store.task_count().await, 0);
}

#[tokio::test]
async fn transient_failure_leaves_the_task_due_for_the_next_tick() {
    let gateway = RecordingGateway::scripted(vec![Err(GatewayError::transient("HTTP 502"))]);
    let h = harness(gateway).await;
    let slot = local(2026, 3, 2, 9, 0);
    TasksRepo::upsert_task(
        h.store.as_ref(),
        &task_with("t1", every_day(vec![at(9, 0)]), slot),
    )
    .await
    .unwrap();

    let first = h.engine.tick(local(2026, 3, 2, 9, 0)).await.unwrap();
    assert_eq!(first.retried, 1);
    let untouched = h.store.task("t1").await;
    assert_eq!(untouched.next_execution, Some(slot));
    assert_eq!(untouched.last_executed, None);

    let second = h.engine.tick(local(2026, 3, 2, 9, 1)).await.unwrap();
    assert_eq!(second.delivered, 1);
    let task = h.store.task("t1").await;
    assert_eq!(task.last_executed, Some(slot));
    assert_zone(task.next_execution.unwrap(), Moscow, "2026-03-03 09:00 Tue");
    assert_eq!(h.gateway.sent().await.len(), 2);
}

#[tokio::test]
async fn already_delivered_slot_is_not_sent_twice() {
    let h = harness(RecordingGateway::scripted(vec![])).await;
    let slot = local(2026, 3, 2, 9, 0);
    let mut task = task_with("t1", every_day(vec![at(9, 0)]), slot);
    task.last_executed = Some(slot);
    TasksRepo::upsert_task(h.store.as_ref(), &task).await.unwrap();

    let report = h.engine.tick(local(2026, 3, 2, 9, 1)).await.unwrap();

    assert_eq!(report.suppressed, 1);
    assert!(h.gateway.sent().await.is_empty());
    let task = h.store.task("t1").await;
    assert_zone(task.next_execution.unwrap(), Moscow, "2026-03-03 09:00 Tue");
}

#[tokio::test]
async fn test_task_fires_once_then_goes_inert() {
    let h = harness(RecordingGateway::scripted(vec![])).await;
    let now = local(2026, 3, 2, 10, 0);
    let rule = ScheduleRule::weekly([Weekday::Mon], [at(10, 5)], Cadence::Weekly).unwrap();
    let created = h
        .tasks
        .create_task(
            ADMIN,
            CreateTaskCommand {
                template_id: "tpl1".to_string(),
                target_chat_id: CHAT_A,
                schedule: rule,
                is_test: true,
            },
            now,
        )
        .await
        .unwrap();
    assert!(created.is_test);

    let report = h.engine.tick(local(2026, 3, 2, 10, 5)).await.unwrap();
    assert_eq!(report.delivered, 1);

    let task = h.store.task(&created.id).await;
    assert!(!task.is_active);
    assert_eq!(task.next_execution, None);

    let later = h.engine.tick(local(2026, 3, 9, 10, 5)).await.unwrap();
    assert!(later.is_empty());
    assert_eq!(h.gateway.sent().await, vec![(CHAT_A, "Standup in five minutes".to_string())]);
}

#[tokio::test]
async fn task_without_a_target_chat_is_deactivated_without_sending() {
    let mut h = harness(RecordingGateway::scripted(vec![])).await;
    let slot = local(2026, 3, 2, 9, 0);
    let mut task = task_with("t1", every_day(vec![at(9, 0)]), slot);
    task.target_chat_id = None;
    TasksRepo::upsert_task(h.store.as_ref(), &task).await.unwrap();

    let report = h.engine.tick(slot).await.unwrap();

    assert_eq!(report.deactivated, 1);
    assert!(h.gateway.sent().await.is_empty());
    assert!(!h.store.task("t1").await.is_active);
    let failure = h.failures.try_recv().expect("failure published");
    assert_eq!(failure.chat_id, None);
}

#[tokio::test]
async fn template_image_edit_does_not_reach_existing_tasks() {
    let h = harness(RecordingGateway::scripted(vec![])).await;
    let now = local(2026, 3, 2, 10, 0);
    let upload = |name: &str| ImageUpload {
        file_name: name.to_string(),
        bytes: bytes::Bytes::from_static(b"\x89PNG"),
    };
    let template = h
        .templates
        .create_template(
            ADMIN,
            CreateTemplateCommand {
                name: "Route".to_string(),
                group_id: GROUP.to_string(),
                text: "Today's route".to_string(),
                image: Some(upload("route-a.png")),
                subgroup: None,
            },
            now,
        )
        .await
        .unwrap();
    let original = template.image_ref.clone().unwrap();

    let rule = ScheduleRule::weekly([Weekday::Mon], [at(10, 5)], Cadence::Weekly).unwrap();
    let task = h
        .tasks
        .create_task(
            ADMIN,
            CreateTaskCommand {
                template_id: template.id.clone(),
                target_chat_id: CHAT_A,
                schedule: rule,
                is_test: false,
            },
            now,
        )
        .await
        .unwrap();

    h.templates
        .update_template(
            ADMIN,
            UpdateTemplateCommand {
                id: template.id.clone(),
                image: ImageChange::Replace(upload("route-b.png")),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(h.blobs.exists(&original).await.unwrap());

    let report = h.engine.tick(local(2026, 3, 2, 10, 5)).await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(h.gateway.photos().await, vec![original.clone()]);
    assert_eq!(
        h.store.task(&task.id).await.template_image.as_deref(),
        Some(original.as_str())
    );
}
