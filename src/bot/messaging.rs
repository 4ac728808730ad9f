//! Common messaging utilities for the Telegram bot.
//!
//! Sends formatted replies with a MarkdownV2 fallback, splits long answers,
//! and reports undeliverable messages to the maintainers.

use crate::bot::messenger::{FormatMode, Messenger, MessengerError, SentMessage};
use crate::config::TELEGRAM_CHUNK_SIZE;
use crate::utils;
use tracing::{error, warn};

/// Sends `text` rendered as HTML, retrying once as escaped MarkdownV2.
///
/// # Errors
///
/// Returns [`MessengerError::FallbackExhausted`] if both attempts fail.
pub async fn send_formatted(
    messenger: &dyn Messenger,
    chat_id: i64,
    text: &str,
    reply_to: Option<i32>,
) -> Result<SentMessage, MessengerError> {
    let html = utils::format_text(text);
    match messenger.send(chat_id, &html, reply_to, FormatMode::Html).await {
        Ok(sent) => Ok(sent),
        Err(html_err) => {
            warn!(chat_id, error = %html_err, "HTML send failed, retrying as MarkdownV2");
            let escaped = utils::escape_markdown_v2(text);
            messenger
                .send(chat_id, &escaped, reply_to, FormatMode::MarkdownV2)
                .await
                .map_err(|e| MessengerError::FallbackExhausted(format!("{html_err}; {e}")))
        }
    }
}

/// Edits a sent message with the same HTML-then-MarkdownV2 fallback.
///
/// # Errors
///
/// Returns [`MessengerError::FallbackExhausted`] if both attempts fail.
pub async fn edit_formatted(
    messenger: &dyn Messenger,
    chat_id: i64,
    message_id: i32,
    text: &str,
) -> Result<(), MessengerError> {
    let html = utils::format_text(text);
    match messenger
        .edit(chat_id, message_id, &html, FormatMode::Html)
        .await
    {
        Ok(()) => Ok(()),
        Err(html_err) => {
            warn!(chat_id, message_id, error = %html_err, "HTML edit failed, retrying as MarkdownV2");
            let escaped = utils::escape_markdown_v2(text);
            messenger
                .edit(chat_id, message_id, &escaped, FormatMode::MarkdownV2)
                .await
                .map_err(|e| MessengerError::FallbackExhausted(format!("{html_err}; {e}")))
        }
    }
}

/// Sends a plain-text notice to every maintainer. Failures are only logged.
pub async fn notify_maintainers(messenger: &dyn Messenger, maintainers: &[i64], text: &str) {
    for &maintainer in maintainers {
        if let Err(e) = messenger.send(maintainer, text, None, FormatMode::Plain).await {
            warn!(maintainer, error = %e, "Failed to notify maintainer");
        }
    }
}

/// Sends one reply. Undeliverable replies are logged and reported to the
/// maintainers, and `None` is returned so the caller can carry on.
pub async fn send_reply(
    messenger: &dyn Messenger,
    maintainers: &[i64],
    chat_id: i64,
    text: &str,
    reply_to: Option<i32>,
) -> Option<SentMessage> {
    match send_formatted(messenger, chat_id, text, reply_to).await {
        Ok(sent) => Some(sent),
        Err(e) => {
            error!(chat_id, error = %e, "Reply could not be delivered");
            let notice = format!(
                "Reply undeliverable in chat {chat_id}: {}",
                utils::truncate_str(e.to_string(), 300)
            );
            notify_maintainers(messenger, maintainers, &notice).await;
            None
        }
    }
}

/// Sends a long message by splitting it into multiple parts.
///
/// The raw Markdown is split first so code fences are closed per part, then
/// each part is rendered on its own. Returns the last delivered part.
pub async fn send_long_reply(
    messenger: &dyn Messenger,
    maintainers: &[i64],
    chat_id: i64,
    text: &str,
    reply_to: Option<i32>,
) -> Option<SentMessage> {
    let mut last = None;
    for part in utils::split_long_message(text, TELEGRAM_CHUNK_SIZE) {
        if let Some(sent) = send_reply(messenger, maintainers, chat_id, &part, reply_to).await {
            last = Some(sent);
        }
    }
    last
}
