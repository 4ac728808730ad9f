//! Per-update entry point.
//!
//! [`DispatchController`] parses an update, reads the stored facts the
//! classifier needs, and hands the message to the handler of its intent.
//! Handlers live in [`crate::bot::handlers`] and [`crate::bot::questions`].

use crate::access::{AccessControl, AccessList};
use crate::bot::classifier::{classify, BotIdentity, ClassifierFacts, Intent};
use crate::bot::messaging::notify_maintainers;
use crate::bot::messenger::Messenger;
use crate::bot::update::{IncomingMessage, Update};
use crate::clock::Clock;
use crate::config::Settings;
use crate::context::ConversationContextStore;
use crate::cooldown::{parse_duration, CooldownGate};
use crate::llm::ChatCompletionClient;
use crate::scheduler::{DeferredDeletionScheduler, SchedulerTiming};
use crate::storage::{last_bot_message_key, load_json, BlobStore, KeyValueStore, StorageError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

/// External services the controller talks to
#[derive(Clone)]
pub struct Collaborators {
    /// Persistent JSON state
    pub kv: Arc<dyn KeyValueStore>,
    /// Image payloads
    pub blobs: Arc<dyn BlobStore>,
    /// Telegram Bot API
    pub messenger: Arc<dyn Messenger>,
    /// Chat-completion backend
    pub ai: Arc<dyn ChatCompletionClient>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

/// Terminal result of handling one update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handled, including deliberate silence and cooldown notices
    HandledOk,
    /// Sender blacklisted or lacking permission
    Denied,
    /// A configuration or storage failure aborted handling
    Error,
}

/// Failures that abort handling of one update
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
    /// The key-value or blob store failed a write
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Model selection and reply mode
#[derive(Debug, Clone)]
pub(super) struct ReplySettings {
    pub(super) model: String,
    pub(super) search_model: String,
    pub(super) stream_replies: bool,
    pub(super) system_message: Option<String>,
}

/// Orchestrates classification, gating and handling of inbound updates
pub struct DispatchController {
    pub(super) identity: BotIdentity,
    pub(super) maintainers: Vec<i64>,
    pub(super) replies: ReplySettings,
    pub(super) kv: Arc<dyn KeyValueStore>,
    pub(super) blobs: Arc<dyn BlobStore>,
    pub(super) messenger: Arc<dyn Messenger>,
    pub(super) ai: Arc<dyn ChatCompletionClient>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) access: AccessControl,
    pub(super) cooldowns: CooldownGate,
    pub(super) context: ConversationContextStore,
    pub(super) scheduler: DeferredDeletionScheduler,
}

impl DispatchController {
    /// Wire the components from settings and collaborators
    #[must_use]
    pub fn new(settings: &Settings, deps: Collaborators) -> Self {
        let access = AccessControl::new(deps.kv.clone());
        let cooldowns = CooldownGate::new(
            deps.kv.clone(),
            access.clone(),
            deps.clock.clone(),
            parse_duration(&settings.cooldown_duration),
            parse_duration(&settings.search_cooldown_duration),
        );
        let context = ConversationContextStore::new(
            deps.kv.clone(),
            deps.blobs.clone(),
            settings.max_context_length,
        );
        let scheduler = DeferredDeletionScheduler::new(
            deps.kv.clone(),
            deps.messenger.clone(),
            deps.clock.clone(),
            SchedulerTiming {
                delay: Duration::from_millis(settings.deletion_delay_ms),
                poll_interval: Duration::from_millis(settings.deletion_poll_interval_ms),
                max_polls: settings.deletion_max_polls,
            },
        );

        Self {
            identity: BotIdentity {
                name: settings.bot_name.clone(),
                id: settings.bot_id,
            },
            maintainers: settings.maintainer_ids(),
            replies: ReplySettings {
                model: settings.model.clone(),
                search_model: settings.search_model.clone(),
                stream_replies: settings.stream_replies,
                system_message: settings.system_message.clone(),
            },
            kv: deps.kv,
            blobs: deps.blobs,
            messenger: deps.messenger,
            ai: deps.ai,
            clock: deps.clock,
            access,
            cooldowns,
            context,
            scheduler,
        }
    }

    /// Handle one webhook update
    pub async fn handle_update(&self, update: &Update) -> Disposition {
        let Some(wire) = &update.message else {
            debug!(update_id = update.update_id, "Update without message skipped");
            return Disposition::HandledOk;
        };
        let Some(message) = IncomingMessage::parse(wire, &self.identity.name) else {
            debug!(update_id = update.update_id, "Message without sender skipped");
            return Disposition::HandledOk;
        };
        self.handle_message(&message).await
    }

    /// Handle one parsed message. Failures are logged and reported to the maintainers.
    pub async fn handle_message(&self, message: &IncomingMessage) -> Disposition {
        match self.dispatch(message).await {
            Ok(disposition) => disposition,
            Err(e) => {
                error!(
                    chat_id = message.chat_id,
                    user_id = message.sender_id,
                    error = %e,
                    "Failed to handle message"
                );
                let notice = format!(
                    "Error while handling message {} in chat {}: {e}",
                    message.message_id, message.chat_id
                );
                notify_maintainers(self.messenger.as_ref(), &self.maintainers, &notice).await;
                Disposition::Error
            }
        }
    }

    async fn facts(&self, message: &IncomingMessage) -> ClassifierFacts {
        let sender_blacklisted = self.access.is_blacklisted(message.sender_id).await;
        if sender_blacklisted || message.is_private() {
            return ClassifierFacts {
                sender_blacklisted,
                ..ClassifierFacts::default()
            };
        }

        let group_whitelisted = self
            .access
            .is_listed(AccessList::GroupWhitelist, message.chat_id)
            .await;
        let last_bot_message_id = if message.reply_to.is_some() {
            load_json(
                self.kv.as_ref(),
                &last_bot_message_key(message.chat_id, message.sender_id),
            )
            .await
        } else {
            None
        };
        ClassifierFacts {
            sender_blacklisted,
            group_whitelisted,
            last_bot_message_id,
        }
    }

    async fn dispatch(&self, message: &IncomingMessage) -> Result<Disposition, DispatchError> {
        let facts = self.facts(message).await;
        let intent = classify(message, &facts, &self.identity);
        info!(
            chat_id = message.chat_id,
            user_id = message.sender_id,
            message_id = message.message_id,
            ?intent,
            "Message classified"
        );

        match intent {
            Intent::Denied => Ok(self.deny(message).await),
            Intent::Private(action) => Ok(self.handle_private(message, action).await),
            Intent::Command { command, args } => {
                self.publish_menu(message.chat_id).await;
                self.handle_command(message, command, &args, facts.group_whitelisted)
                    .await
            }
            Intent::UnknownCommand { name } => {
                self.publish_menu(message.chat_id).await;
                self.handle_unknown_command(message, &name, facts.group_whitelisted)
                    .await
            }
            Intent::Unsupported => Ok(self.reply_unsupported(message).await),
            Intent::ReplyQuestion => self.answer_one_shot(message).await,
            Intent::MentionQuestion | Intent::Continuation => {
                self.answer_with_context(message).await
            }
            Intent::Plain => self.remember_plain(message).await,
            Intent::Ignored => Ok(Disposition::HandledOk),
        }
    }
}
