//! Delayed cleanup of command/reply message pairs.
//!
//! The task record in the key-value store is the single source of truth: the
//! request that creates a task polls it until it is ready, performs the
//! deletions and removes the record. A missing record means some other
//! execution already consumed the task, so the poller stops without acting.
//! Duplicate webhook deliveries therefore delete each pair at most once.
//!
//! Lifecycle: `Scheduled -> Ready -> Consumed`.

use crate::bot::messenger::Messenger;
use crate::clock::Clock;
use crate::storage::{deletion_task_key, save_json, KeyValueStore, StorageError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which messages a task removes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeletionKind {
    /// Delete both the command and the bot's reply
    CommandCleanup,
    /// Delete only the bot's cooldown notice, keep the user's message
    CooldownNotice,
}

/// Persisted cleanup task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeletionTask {
    /// Chat holding both messages
    pub chat_id: i64,
    /// The user's triggering message
    pub command_message_id: i32,
    /// The bot's reply
    pub bot_reply_message_id: i32,
    /// Epoch millis after which the task may run
    pub ready_at_timestamp: i64,
    /// Cleanup flavor
    pub kind: DeletionKind,
}

impl DeletionTask {
    /// KV key of this task
    #[must_use]
    pub fn key(&self) -> String {
        deletion_task_key(self.chat_id, self.command_message_id, self.bot_reply_message_id)
    }
}

/// Observed state of a task record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Present, not yet due
    Scheduled,
    /// Present and due
    Ready,
    /// Absent: executed by someone
    Consumed,
}

/// Classifies a freshly read record at time `now_ms`
#[must_use]
pub fn observe(record: Option<&DeletionTask>, now_ms: i64) -> TaskState {
    match record {
        None => TaskState::Consumed,
        Some(task) if now_ms < task.ready_at_timestamp => TaskState::Scheduled,
        Some(_) => TaskState::Ready,
    }
}

/// How a wait on a task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionOutcome {
    /// This execution ran the deletions and removed the record
    Executed,
    /// The record was gone on re-read
    AlreadyConsumed,
    /// The poll budget ran out with the record still pending
    Abandoned,
}

/// Timing of the poll loop
#[derive(Debug, Clone, Copy)]
pub struct SchedulerTiming {
    /// Delay from creation until a task is ready
    pub delay: Duration,
    /// Sleep between polls
    pub poll_interval: Duration,
    /// Polls before giving up
    pub max_polls: u32,
}

impl Default for SchedulerTiming {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(3000),
            poll_interval: Duration::from_millis(1000),
            max_polls: 30,
        }
    }
}

/// KV-backed delayed deletion
#[derive(Clone)]
pub struct DeferredDeletionScheduler {
    kv: Arc<dyn KeyValueStore>,
    messenger: Arc<dyn Messenger>,
    clock: Arc<dyn Clock>,
    timing: SchedulerTiming,
}

impl DeferredDeletionScheduler {
    /// Build a scheduler
    #[must_use]
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        messenger: Arc<dyn Messenger>,
        clock: Arc<dyn Clock>,
        timing: SchedulerTiming,
    ) -> Self {
        Self {
            kv,
            messenger,
            clock,
            timing,
        }
    }

    /// Persist a task that becomes ready after the configured delay
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub async fn schedule(
        &self,
        chat_id: i64,
        command_message_id: i32,
        bot_reply_message_id: i32,
        kind: DeletionKind,
    ) -> Result<DeletionTask, StorageError> {
        let delay_ms = i64::try_from(self.timing.delay.as_millis()).unwrap_or(i64::MAX);
        let task = DeletionTask {
            chat_id,
            command_message_id,
            bot_reply_message_id,
            ready_at_timestamp: self.clock.now_ms().saturating_add(delay_ms),
            kind,
        };
        save_json(self.kv.as_ref(), &task.key(), &task).await?;
        debug!(key = %task.key(), ?kind, "Deletion task scheduled");
        Ok(task)
    }

    /// Schedule a task and hold the caller until it has been consumed
    ///
    /// # Errors
    ///
    /// Returns an error if the task cannot be persisted.
    pub async fn schedule_and_wait(
        &self,
        chat_id: i64,
        command_message_id: i32,
        bot_reply_message_id: i32,
        kind: DeletionKind,
    ) -> Result<DeletionOutcome, StorageError> {
        let task = self
            .schedule(chat_id, command_message_id, bot_reply_message_id, kind)
            .await?;
        Ok(self.run(&task.key()).await)
    }

    /// Poll the task at `key` until it is consumed or the poll budget runs out
    pub async fn run(&self, key: &str) -> DeletionOutcome {
        for _ in 0..self.timing.max_polls {
            let record = match self.read(key).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(key, error = %e, "Deletion task read failed, retrying");
                    self.clock.sleep(self.timing.poll_interval).await;
                    continue;
                }
            };

            match observe(record.as_ref(), self.clock.now_ms()) {
                TaskState::Consumed => {
                    debug!(key, "Deletion task already consumed");
                    return DeletionOutcome::AlreadyConsumed;
                }
                TaskState::Scheduled => self.clock.sleep(self.timing.poll_interval).await,
                TaskState::Ready => {
                    if let Some(task) = record {
                        self.execute(&task).await;
                    }
                    if let Err(e) = self.kv.delete(key).await {
                        warn!(key, error = %e, "Failed to remove executed deletion task");
                    }
                    return DeletionOutcome::Executed;
                }
            }
        }

        warn!(key, max_polls = self.timing.max_polls, "Deletion task abandoned");
        DeletionOutcome::Abandoned
    }

    async fn read(&self, key: &str) -> Result<Option<DeletionTask>, StorageError> {
        match self.kv.get(key).await? {
            // A record that no longer parses can never become ready
            Some(value) => Ok(serde_json::from_value(value).ok()),
            None => Ok(None),
        }
    }

    async fn execute(&self, task: &DeletionTask) {
        if task.kind == DeletionKind::CommandCleanup {
            self.delete_message(task.chat_id, task.command_message_id).await;
        }
        self.delete_message(task.chat_id, task.bot_reply_message_id).await;
        info!(chat_id = task.chat_id, kind = ?task.kind, "Deletion task executed");
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) {
        if let Err(e) = self.messenger.delete(chat_id, message_id).await {
            // Usually already deleted by a user or admin
            warn!(chat_id, message_id, error = %e, "Message deletion failed");
        }
    }
}
