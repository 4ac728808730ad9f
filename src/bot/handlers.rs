//! Command, private-chat and bookkeeping handlers.

use crate::access::{command_allowed, AccessList, CommandScope};
use crate::bot::classifier::PrivateAction;
use crate::bot::commands::{menu, Command};
use crate::bot::dispatch::{DispatchController, DispatchError, Disposition};
use crate::bot::messaging::send_reply;
use crate::bot::update::{IncomingMessage, Payload};
use crate::cooldown::{CooldownStatus, CooldownTrack};
use crate::llm::{ContentPart, Message};
use crate::scheduler::{DeletionKind, DeletionOutcome};
use crate::storage::new_image_blob_key;
use bytes::Bytes;
use tracing::{debug, info, warn};

pub(super) const DENIED_TEXT: &str = "Sorry, you have been banned from using this bot.";
pub(super) const NO_PERMISSION_TEXT: &str = "You don't have permission to use this command.";
pub(super) const UNSUPPORTED_TEXT: &str =
    "Sorry, I can't handle this kind of content yet. Please ask with text, a photo or a text file.";
pub(super) const UNKNOWN_COMMAND_TEXT: &str = "Unknown command, try /help.";
pub(super) const CONTEXT_CLEARED_TEXT: &str = "Your conversation context has been cleared.";

const INTRO_TEXT: &str = "Hi! I'm a group assistant. Mention me in a whitelisted group to ask a \
    question, or reply to my answers to keep the conversation going. Messages you send me here are \
    passed on to the maintainers.";

const HELP_TEXT: &str = "**How to use me**\n\
    - Mention me with a question, a photo or a text file.\n\
    - Reply to a message and mention me to ask about it.\n\
    - Reply to my last answer to continue the conversation.\n\
    - /search <query> searches the web.\n\
    - /clear_user_context forgets our conversation.";

pub(super) fn cooldown_text(remaining_secs: u64) -> String {
    format!("The bot is cooling down, please try again in {remaining_secs} seconds.")
}

fn user_id_usage(command: Command) -> String {
    format!("Usage: /{} <user_id>", command.name())
}

impl DispatchController {
    pub(super) async fn reply(&self, message: &IncomingMessage, text: &str) -> Option<i32> {
        send_reply(
            self.messenger.as_ref(),
            &self.maintainers,
            message.chat_id,
            text,
            Some(message.message_id),
        )
        .await
        .map(|sent| sent.message_id)
    }

    /// Replies, then holds the request until the pair is cleaned up
    pub(super) async fn reply_and_cleanup(
        &self,
        message: &IncomingMessage,
        text: &str,
        kind: DeletionKind,
    ) {
        let Some(reply_id) = self.reply(message, text).await else {
            return;
        };
        match self
            .scheduler
            .schedule_and_wait(message.chat_id, message.message_id, reply_id, kind)
            .await
        {
            Ok(DeletionOutcome::Executed) => debug!(chat_id = message.chat_id, "Reply cleaned up"),
            Ok(outcome) => debug!(chat_id = message.chat_id, ?outcome, "Reply cleanup not executed here"),
            Err(e) => warn!(chat_id = message.chat_id, error = %e, "Failed to schedule reply cleanup"),
        }
    }

    /// Answers with a cooldown notice when the track is active. Returns
    /// whether the caller must stop.
    pub(super) async fn hold_for_cooldown(
        &self,
        message: &IncomingMessage,
        track: CooldownTrack,
    ) -> bool {
        match self
            .cooldowns
            .status(message.chat_id, message.sender_id, track)
            .await
        {
            CooldownStatus::Clear => false,
            CooldownStatus::Active { remaining_secs } => {
                info!(chat_id = message.chat_id, ?track, remaining_secs, "Request held by cooldown");
                self.reply_and_cleanup(
                    message,
                    &cooldown_text(remaining_secs),
                    DeletionKind::CooldownNotice,
                )
                .await;
                true
            }
        }
    }

    pub(super) async fn deny(&self, message: &IncomingMessage) -> Disposition {
        info!(user_id = message.sender_id, chat_id = message.chat_id, "Blacklisted sender denied");
        self.reply(message, DENIED_TEXT).await;
        Disposition::Denied
    }

    pub(super) async fn reply_unsupported(&self, message: &IncomingMessage) -> Disposition {
        self.reply(message, UNSUPPORTED_TEXT).await;
        Disposition::HandledOk
    }

    pub(super) async fn handle_private(
        &self,
        message: &IncomingMessage,
        action: PrivateAction,
    ) -> Disposition {
        match action {
            PrivateAction::Introduce => {
                self.reply(message, INTRO_TEXT).await;
            }
            PrivateAction::Ignore => {
                debug!(user_id = message.sender_id, "Private command ignored");
            }
            PrivateAction::Forward => {
                if self.maintainers.is_empty() {
                    info!(user_id = message.sender_id, "No maintainers configured, private message dropped");
                }
                for &maintainer in &self.maintainers {
                    match self
                        .messenger
                        .forward(maintainer, message.chat_id, message.message_id)
                        .await
                    {
                        Ok(()) => info!(maintainer, user_id = message.sender_id, "Private message forwarded"),
                        Err(e) => warn!(maintainer, error = %e, "Failed to forward private message"),
                    }
                }
            }
        }
        Disposition::HandledOk
    }

    pub(super) async fn publish_menu(&self, chat_id: i64) {
        if let Err(e) = self.messenger.set_commands(chat_id, menu()).await {
            warn!(chat_id, error = %e, "Failed to publish command menu");
        }
    }

    async fn permitted(
        &self,
        message: &IncomingMessage,
        scope: CommandScope,
        group_whitelisted: bool,
    ) -> bool {
        let user_whitelisted = self
            .access
            .is_listed(AccessList::UserWhitelist, message.sender_id)
            .await;
        command_allowed(scope, group_whitelisted, user_whitelisted)
    }

    pub(super) async fn handle_command(
        &self,
        message: &IncomingMessage,
        command: Command,
        args: &str,
        group_whitelisted: bool,
    ) -> Result<Disposition, DispatchError> {
        if !self
            .permitted(message, command.scope(), group_whitelisted)
            .await
        {
            info!(
                user_id = message.sender_id,
                command = command.name(),
                "Command refused"
            );
            self.reply_and_cleanup(message, NO_PERMISSION_TEXT, DeletionKind::CommandCleanup)
                .await;
            return Ok(Disposition::Denied);
        }

        match command {
            Command::Start => {
                self.reply(message, INTRO_TEXT).await;
            }
            Command::Help => {
                self.reply(message, HELP_TEXT).await;
            }
            Command::Search => self.run_search(message, args).await?,
            Command::ClearUserContext => {
                self.context
                    .clear(message.chat_id, message.sender_id)
                    .await?;
                info!(chat_id = message.chat_id, user_id = message.sender_id, "Context cleared");
                self.reply_and_cleanup(message, CONTEXT_CLEARED_TEXT, DeletionKind::CommandCleanup)
                    .await;
            }
            Command::WhitelistGroup => {
                self.access
                    .add(AccessList::GroupWhitelist, message.chat_id)
                    .await?;
                self.reply_and_cleanup(
                    message,
                    &format!("Group {} has been whitelisted.", message.chat_id),
                    DeletionKind::CommandCleanup,
                )
                .await;
            }
            Command::UnwhitelistGroup => {
                self.access
                    .remove(AccessList::GroupWhitelist, message.chat_id)
                    .await?;
                self.reply_and_cleanup(
                    message,
                    &format!("Group {} has been removed from the whitelist.", message.chat_id),
                    DeletionKind::CommandCleanup,
                )
                .await;
            }
            Command::WhitelistUser | Command::UnwhitelistUser | Command::Ban | Command::Unban => {
                self.update_user_list(message, command, args).await?;
            }
        }
        Ok(Disposition::HandledOk)
    }

    async fn update_user_list(
        &self,
        message: &IncomingMessage,
        command: Command,
        args: &str,
    ) -> Result<(), DispatchError> {
        let Some(user_id) = args
            .split_whitespace()
            .next()
            .and_then(|raw| raw.parse::<i64>().ok())
        else {
            self.reply(message, &user_id_usage(command)).await;
            return Ok(());
        };

        let text = match command {
            Command::WhitelistUser => {
                self.access.add(AccessList::UserWhitelist, user_id).await?;
                format!("User {user_id} has been whitelisted.")
            }
            Command::UnwhitelistUser => {
                self.access
                    .remove(AccessList::UserWhitelist, user_id)
                    .await?;
                format!("User {user_id} has been removed from the whitelist.")
            }
            Command::Ban => {
                self.access.add(AccessList::UserBlacklist, user_id).await?;
                format!("User {user_id} has been banned.")
            }
            _ => {
                self.access
                    .remove(AccessList::UserBlacklist, user_id)
                    .await?;
                format!("User {user_id} has been unbanned.")
            }
        };
        self.reply_and_cleanup(message, &text, DeletionKind::CommandCleanup)
            .await;
        Ok(())
    }

    pub(super) async fn handle_unknown_command(
        &self,
        message: &IncomingMessage,
        name: &str,
        group_whitelisted: bool,
    ) -> Result<Disposition, DispatchError> {
        if !self
            .permitted(message, CommandScope::Admin, group_whitelisted)
            .await
        {
            self.reply_and_cleanup(message, NO_PERMISSION_TEXT, DeletionKind::CommandCleanup)
                .await;
            return Ok(Disposition::Denied);
        }
        debug!(command = name, "Unknown command");
        self.reply_and_cleanup(message, UNKNOWN_COMMAND_TEXT, DeletionKind::CommandCleanup)
            .await;
        Ok(Disposition::HandledOk)
    }

    /// Stores a plain group message so later questions have its context
    pub(super) async fn remember_plain(
        &self,
        message: &IncomingMessage,
    ) -> Result<Disposition, DispatchError> {
        let entry = match &message.payload {
            Payload::Text { text } => Message::user(text),
            Payload::Photo { file_id, caption } => {
                let bytes = match self.messenger.download_file(file_id).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(chat_id = message.chat_id, error = %e, "Photo download failed, not remembered");
                        return Ok(Disposition::HandledOk);
                    }
                };
                let key = new_image_blob_key();
                self.blobs.put_blob(&key, Bytes::from(bytes)).await?;
                let mut parts = Vec::with_capacity(2);
                if let Some(caption) = caption.as_deref().filter(|c| !c.trim().is_empty()) {
                    parts.push(ContentPart::text(caption.trim()));
                }
                parts.push(ContentPart::image(key));
                Message::user_parts(parts)
            }
            _ => return Ok(Disposition::HandledOk),
        };

        self.context
            .append(message.chat_id, message.sender_id, vec![entry])
            .await?;
        debug!(chat_id = message.chat_id, user_id = message.sender_id, "Plain message remembered");
        Ok(Disposition::HandledOk)
    }
}
