//! Minute-quantum dispatch loop: finds due tasks, sends them, moves cursors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use metrics::{counter, histogram};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::application::access::AccessService;
use crate::application::error::AppError;
use crate::application::gateway::{DeliveryFailure, Gateway, GatewayError};
use crate::application::repos::TasksRepo;
use crate::application::tasks::next_execution_after;
use crate::domain::entities::{ChatId, TaskRecord, UserId};
use crate::infra::blobs::BlobStorage;
use crate::infra::telemetry::{
    METRIC_DELIVERIES_TOTAL, METRIC_DISPATCH_TICK_MS, METRIC_DISPATCH_TICKS_TOTAL,
};
use crate::util::timezone::until_next_minute;

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub timezone: Tz,
    pub send_timeout: Duration,
    pub restart_delay: Duration,
}

/// Per-tick tally. `failed` counts tasks whose state could not be read or written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub delivered: usize,
    pub retried: usize,
    pub deactivated: usize,
    pub suppressed: usize,
    pub failed: usize,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Delivered => self.delivered += 1,
            Outcome::Retried => self.retried += 1,
            Outcome::Deactivated => self.deactivated += 1,
            Outcome::Suppressed => self.suppressed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Delivered,
    Retried,
    Deactivated,
    Suppressed,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Delivered => "delivered",
            Outcome::Retried => "retried",
            Outcome::Deactivated => "deactivated",
            Outcome::Suppressed => "suppressed",
        }
    }
}

pub struct DispatchEngine {
    tasks: Arc<dyn TasksRepo>,
    gateway: Arc<dyn Gateway>,
    blobs: Arc<BlobStorage>,
    access: AccessService,
    settings: DispatchSettings,
    failures: Option<mpsc::UnboundedSender<DeliveryFailure>>,
}

impl DispatchEngine {
    pub fn new(
        tasks: Arc<dyn TasksRepo>,
        gateway: Arc<dyn Gateway>,
        blobs: Arc<BlobStorage>,
        access: AccessService,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            tasks,
            gateway,
            blobs,
            access,
            settings,
            failures: None,
        }
    }

    /// Publish permanent failures on `sender`.
    pub fn with_failure_channel(mut self, sender: mpsc::UnboundedSender<DeliveryFailure>) -> Self {
        self.failures = Some(sender);
        self
    }

    /// Process every task due at `now`, in `(next_execution, id)` order.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, AppError> {
        self.tick_until(now, None).await
    }

    async fn tick_until(
        &self,
        now: DateTime<Utc>,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<TickReport, AppError> {
        let due = self.tasks.list_due_tasks(now).await?;
        let mut report = TickReport::default();

        for task in due {
            if shutdown.is_some_and(|signal| *signal.borrow()) {
                info!(
                    target = "tidings::application::dispatch",
                    "shutdown requested; leaving remaining due tasks for the next start"
                );
                break;
            }

            let task_id = task.id.clone();
            match self.dispatch(task, now).await {
                Ok(outcome) => {
                    counter!(METRIC_DELIVERIES_TOTAL, "outcome" => outcome.as_str()).increment(1);
                    report.record(outcome);
                }
                Err(err) => {
                    counter!(METRIC_DELIVERIES_TOTAL, "outcome" => "failed").increment(1);
                    report.failed += 1;
                    error!(
                        target = "tidings::application::dispatch",
                        task_id = %task_id,
                        error = %err,
                        "task dispatch failed"
                    );
                }
            }
        }

        Ok(report)
    }

    async fn dispatch(&self, mut task: TaskRecord, now: DateTime<Utc>) -> Result<Outcome, AppError> {
        if task.already_delivered_pending_slot() {
            task.next_execution = self.next_after(&task, now);
            self.tasks.upsert_task(&task).await?;
            debug!(
                target = "tidings::application::dispatch",
                task_id = %task.id,
                next_execution = ?task.next_execution,
                "slot already delivered; cursor advanced"
            );
            return Ok(Outcome::Suppressed);
        }

        let Some(chat_id) = task.target_chat_id else {
            self.deactivate(&mut task, None, GatewayError::permanent("no target chat"), now)
                .await?;
            return Ok(Outcome::Deactivated);
        };

        match self.deliver(&task, chat_id).await {
            Ok(()) => {
                task.last_executed = task.next_execution;
                if task.is_test {
                    task.is_active = false;
                    task.next_execution = None;
                } else {
                    task.next_execution = self.next_after(&task, now);
                }
                self.tasks.upsert_task(&task).await?;
                info!(
                    target = "tidings::application::dispatch",
                    task_id = %task.id,
                    chat_id,
                    next_execution = ?task.next_execution,
                    "message delivered"
                );
                Ok(Outcome::Delivered)
            }
            Err(err @ GatewayError::Transient { .. }) => {
                warn!(
                    target = "tidings::application::dispatch",
                    task_id = %task.id,
                    chat_id,
                    error = %err,
                    "delivery deferred to the next tick"
                );
                Ok(Outcome::Retried)
            }
            Err(err) => {
                self.deactivate(&mut task, Some(chat_id), err, now).await?;
                Ok(Outcome::Deactivated)
            }
        }
    }

    /// Send `task` right away, whatever its schedule says.
    pub async fn fire_now(
        &self,
        operator: UserId,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, AppError> {
        let user = self.access.resolve(operator).await?;
        let mut task = self
            .tasks
            .get_task(task_id)
            .await?
            .ok_or_else(|| AppError::not_found("task", task_id))?;
        if !self.access.oracle().can_read_group(&user, &task.group_id) {
            return Err(AppError::denied("read task group"));
        }
        let chat_id = task
            .target_chat_id
            .ok_or_else(|| AppError::validation("task has no target chat"))?;
        if !self.access.oracle().can_send_to_chat(&user, chat_id) {
            return Err(AppError::denied("send to chat"));
        }

        match self.deliver(&task, chat_id).await {
            Ok(()) => {
                task.last_executed = Some(now);
                if task.is_test {
                    task.is_active = false;
                    task.next_execution = None;
                } else if task.is_active {
                    task.next_execution = self.next_after(&task, now);
                }
                self.tasks.upsert_task(&task).await?;
                info!(
                    target = "tidings::application::dispatch",
                    task_id = %task.id,
                    chat_id,
                    operator,
                    "message delivered on request"
                );
                Ok(task)
            }
            Err(err @ GatewayError::Transient { .. }) => Err(err.into()),
            Err(err) => {
                self.deactivate(&mut task, Some(chat_id), err.clone(), now)
                    .await?;
                Err(err.into())
            }
        }
    }

    /// Tick on every minute boundary until `shutdown` turns true. The first
    /// tick runs immediately and catches up on slots missed while stopped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            target = "tidings::application::dispatch",
            timezone = %self.settings.timezone,
            "dispatch engine started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let started = Instant::now();
            let wait = match self.tick_until(Utc::now(), Some(&shutdown)).await {
                Ok(report) => {
                    counter!(METRIC_DISPATCH_TICKS_TOTAL, "result" => "ok").increment(1);
                    histogram!(METRIC_DISPATCH_TICK_MS)
                        .record(started.elapsed().as_secs_f64() * 1000.0);
                    if !report.is_empty() {
                        info!(
                            target = "tidings::application::dispatch",
                            delivered = report.delivered,
                            retried = report.retried,
                            deactivated = report.deactivated,
                            suppressed = report.suppressed,
                            failed = report.failed,
                            "dispatch tick finished"
                        );
                    }
                    until_next_minute(Utc::now())
                }
                Err(err) => {
                    counter!(METRIC_DISPATCH_TICKS_TOTAL, "result" => "error").increment(1);
                    error!(
                        target = "tidings::application::dispatch",
                        error = %err,
                        delay_secs = self.settings.restart_delay.as_secs(),
                        "dispatch tick failed; restarting after delay"
                    );
                    self.settings.restart_delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(target = "tidings::application::dispatch", "dispatch engine stopped");
    }

    async fn deliver(&self, task: &TaskRecord, chat_id: ChatId) -> Result<(), GatewayError> {
        let image = match task.template_image.as_deref() {
            Some(blob_ref) => match self.blobs.exists(blob_ref).await {
                Ok(true) => Some(blob_ref),
                Ok(false) => {
                    debug!(
                        target = "tidings::application::dispatch",
                        task_id = %task.id,
                        blob_ref,
                        "snapshot image is gone; sending text only"
                    );
                    None
                }
                Err(err) => {
                    warn!(
                        target = "tidings::application::dispatch",
                        task_id = %task.id,
                        blob_ref,
                        error = %err,
                        "snapshot image is unreadable; sending text only"
                    );
                    None
                }
            },
            None => None,
        };

        if image.is_none() && task.template_text.trim().is_empty() {
            return Err(GatewayError::permanent("message has neither text nor image"));
        }

        let send = async {
            match image {
                Some(blob_ref) => {
                    self.gateway
                        .send_photo(chat_id, blob_ref, &task.template_text)
                        .await
                }
                None => self.gateway.send_text(chat_id, &task.template_text).await,
            }
        };

        match tokio::time::timeout(self.settings.send_timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::transient(format!(
                "no response within {}s",
                self.settings.send_timeout.as_secs()
            ))),
        }
    }

    async fn deactivate(
        &self,
        task: &mut TaskRecord,
        chat_id: Option<ChatId>,
        err: GatewayError,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        task.is_active = false;
        task.last_executed = Some(now);
        self.tasks.upsert_task(task).await?;

        warn!(
            target = "tidings::application::dispatch",
            task_id = %task.id,
            chat_id = ?chat_id,
            error = %err,
            "task deactivated after permanent delivery failure"
        );

        if let Some(sender) = &self.failures {
            let failure = DeliveryFailure {
                task_id: task.id.clone(),
                chat_id,
                reason: err.reason().to_string(),
                at: now,
            };
            if sender.send(failure).is_err() {
                debug!(
                    target = "tidings::application::dispatch",
                    "failure channel closed; notice dropped"
                );
            }
        }
        Ok(())
    }

    fn next_after(&self, task: &TaskRecord, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        next_execution_after(&task.schedule, self.settings.timezone, now)
    }
}
