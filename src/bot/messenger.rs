//! Outbound Telegram operations.
//!
//! [`Messenger`] is the seam the dispatcher talks to; [`TelegramMessenger`]
//! implements it on a teloxide [`Bot`] with automatic retry of transient
//! network failures.

use crate::utils::retry_telegram_operation;
use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    BotCommand, BotCommandScope, FileId, MessageId, ParseMode, Recipient, ReplyParameters,
};
use teloxide::{DownloadError, RequestError};
use thiserror::Error;
use tracing::debug;

/// Text rendering mode of an outgoing message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatMode {
    /// Telegram HTML subset
    Html,
    /// Escaped MarkdownV2
    MarkdownV2,
    /// No entity parsing
    Plain,
}

impl FormatMode {
    const fn parse_mode(self) -> Option<ParseMode> {
        match self {
            Self::Html => Some(ParseMode::Html),
            Self::MarkdownV2 => Some(ParseMode::MarkdownV2),
            Self::Plain => None,
        }
    }
}

/// A message the bot has sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    /// Telegram message id
    pub message_id: i32,
}

/// Errors from the Telegram Bot API
#[derive(Debug, Error)]
pub enum MessengerError {
    /// The API rejected or failed the request
    #[error("Telegram API error: {0}")]
    Api(String),
    /// A file could not be downloaded
    #[error("Telegram download error: {0}")]
    Download(String),
    /// Both the HTML attempt and the MarkdownV2 retry were rejected
    #[error("Delivery failed in every format: {0}")]
    FallbackExhausted(String),
}

/// Telegram Bot API operations used by the bot
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a message, optionally as a reply
    async fn send(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i32>,
        format: FormatMode,
    ) -> Result<SentMessage, MessengerError>;

    /// Replace the text of a sent message
    async fn edit(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        format: FormatMode,
    ) -> Result<(), MessengerError>;

    /// Delete a message
    async fn delete(&self, chat_id: i64, message_id: i32) -> Result<(), MessengerError>;

    /// Forward a message into another chat
    async fn forward(
        &self,
        target_chat_id: i64,
        source_chat_id: i64,
        message_id: i32,
    ) -> Result<(), MessengerError>;

    /// Download a file by its Telegram file id
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, MessengerError>;

    /// Publish the command menu for one chat, as (command, description) pairs
    async fn set_commands(
        &self,
        chat_id: i64,
        commands: Vec<(String, String)>,
    ) -> Result<(), MessengerError>;
}

/// Network-level failures are worth retrying, API rejections are not.
const fn is_transient(error: &RequestError) -> bool {
    matches!(
        error,
        RequestError::Network(_) | RequestError::Io(_) | RequestError::RetryAfter(_)
    )
}

const fn is_transient_download(error: &DownloadError) -> bool {
    matches!(error, DownloadError::Network(_) | DownloadError::Io(_))
}

/// [`Messenger`] over the Telegram Bot API
#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    /// Wrap a teloxide bot
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i32>,
        format: FormatMode,
    ) -> Result<SentMessage, MessengerError> {
        let message = retry_telegram_operation(
            || async {
                let mut req = self.bot.send_message(ChatId(chat_id), text);
                if let Some(mode) = format.parse_mode() {
                    req = req.parse_mode(mode);
                }
                if let Some(id) = reply_to {
                    req = req.reply_parameters(
                        ReplyParameters::new(MessageId(id)).allow_sending_without_reply(),
                    );
                }
                req.await
            },
            is_transient,
        )
        .await
        .map_err(|e| MessengerError::Api(e.to_string()))?;

        debug!(chat_id, message_id = message.id.0, "Message sent");
        Ok(SentMessage {
            message_id: message.id.0,
        })
    }

    async fn edit(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        format: FormatMode,
    ) -> Result<(), MessengerError> {
        retry_telegram_operation(
            || async {
                let mut req = self
                    .bot
                    .edit_message_text(ChatId(chat_id), MessageId(message_id), text);
                if let Some(mode) = format.parse_mode() {
                    req = req.parse_mode(mode);
                }
                req.await
            },
            is_transient,
        )
        .await
        .map(|_| ())
        .map_err(|e| MessengerError::Api(e.to_string()))
    }

    async fn delete(&self, chat_id: i64, message_id: i32) -> Result<(), MessengerError> {
        retry_telegram_operation(
            || async {
                self.bot
                    .delete_message(ChatId(chat_id), MessageId(message_id))
                    .await
            },
            is_transient,
        )
        .await
        .map(|_| ())
        .map_err(|e| MessengerError::Api(e.to_string()))
    }

    async fn forward(
        &self,
        target_chat_id: i64,
        source_chat_id: i64,
        message_id: i32,
    ) -> Result<(), MessengerError> {
        retry_telegram_operation(
            || async {
                self.bot
                    .forward_message(
                        ChatId(target_chat_id),
                        ChatId(source_chat_id),
                        MessageId(message_id),
                    )
                    .await
            },
            is_transient,
        )
        .await
        .map(|_| ())
        .map_err(|e| MessengerError::Api(e.to_string()))
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, MessengerError> {
        let file = retry_telegram_operation(
            || async { self.bot.get_file(FileId(file_id.to_string())).await },
            is_transient,
        )
        .await
        .map_err(|e| MessengerError::Api(e.to_string()))?;

        retry_telegram_operation(
            || async {
                let mut buf = Vec::new();
                self.bot.download_file(&file.path, &mut buf).await?;
                Ok(buf)
            },
            is_transient_download,
        )
        .await
        .map_err(|e| MessengerError::Download(e.to_string()))
    }

    async fn set_commands(
        &self,
        chat_id: i64,
        commands: Vec<(String, String)>,
    ) -> Result<(), MessengerError> {
        let commands: Vec<BotCommand> = commands
            .into_iter()
            .map(|(command, description)| BotCommand::new(command, description))
            .collect();
        self.bot
            .set_my_commands(commands)
            .scope(BotCommandScope::Chat {
                chat_id: Recipient::Id(ChatId(chat_id)),
            })
            .await
            .map(|_| ())
            .map_err(|e| MessengerError::Api(e.to_string()))
    }
}
