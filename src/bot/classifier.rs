//! Assigns every inbound message exactly one handling path.
//!
//! [`classify`] is a pure function: the dispatcher reads the few stored facts
//! it needs (blacklist membership, group whitelist, the last bot reply id)
//! and passes them in, so the priority order can be tested without storage.

use crate::bot::commands::Command;
use crate::bot::update::{CommandTarget, IncomingMessage, Payload};
use crate::config::MAX_DOCUMENT_BYTES;
use crate::utils::strip_bot_mention;

/// Stored facts the classifier depends on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifierFacts {
    /// Sender is on the user blacklist
    pub sender_blacklisted: bool,
    /// Chat is on the group whitelist
    pub group_whitelisted: bool,
    /// Id of the bot's latest reply to this (group, user)
    pub last_bot_message_id: Option<i32>,
}

/// Who the bot is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    /// Username without `@`
    pub name: String,
    /// Numeric account id
    pub id: i64,
}

/// What to do with a private-chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivateAction {
    /// `/start`: answer with the introduction
    Introduce,
    /// Forward to the maintainers
    Forward,
    /// Any other command
    Ignore,
}

/// The handling path of one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Sender is blacklisted
    Denied,
    /// One-to-one chat with the bot
    Private(PrivateAction),
    /// A known command addressed to this bot
    Command {
        /// Which command
        command: Command,
        /// Argument text
        args: String,
    },
    /// An unknown command addressed to this bot
    UnknownCommand {
        /// The name as typed, lower-cased
        name: String,
    },
    /// Mention without anything the bot can answer
    Unsupported,
    /// Mention inside a reply: one-shot, no stored context
    ReplyQuestion,
    /// Mention: context-bearing question
    MentionQuestion,
    /// Reply to the bot's latest answer, handled like a mention
    Continuation,
    /// Ordinary message in a whitelisted group, remembered silently
    Plain,
    /// Nothing to do
    Ignored,
}

/// Text-like document that can be inlined into a prompt
#[must_use]
pub fn is_supported_document(
    file_name: Option<&str>,
    mime_type: Option<&str>,
    file_size: Option<u64>,
) -> bool {
    const TEXT_EXTENSIONS: &[&str] = &[
        "txt", "md", "csv", "json", "log", "xml", "yaml", "yml", "html", "rs", "py", "js", "ts",
    ];

    if file_size.is_some_and(|size| size > MAX_DOCUMENT_BYTES) {
        return false;
    }
    if mime_type.is_some_and(|mime| mime.starts_with("text/")) {
        return true;
    }
    file_name
        .and_then(|name| name.rsplit_once('.'))
        .is_some_and(|(_, ext)| {
            TEXT_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Whether the payload holds something the model can answer.
fn carries_question(payload: &Payload, bot_name: &str) -> bool {
    match payload {
        Payload::Text { text } => !strip_bot_mention(text, bot_name).is_empty(),
        Payload::Photo { .. } => true,
        Payload::Document {
            file_name,
            mime_type,
            file_size,
            ..
        } => is_supported_document(file_name.as_deref(), mime_type.as_deref(), *file_size),
        Payload::Command { .. } | Payload::Other { .. } => false,
    }
}

fn private_action(payload: &Payload) -> PrivateAction {
    match payload {
        Payload::Command { name, target, .. } if target != &CommandTarget::OtherBot => {
            if Command::from_name(name) == Some(Command::Start) {
                PrivateAction::Introduce
            } else {
                PrivateAction::Ignore
            }
        }
        Payload::Command { .. } => PrivateAction::Ignore,
        _ => PrivateAction::Forward,
    }
}

fn command_intent(name: &str, args: &str, target: CommandTarget) -> Intent {
    if target != CommandTarget::ThisBot {
        return Intent::Ignored;
    }
    Command::from_name(name).map_or_else(
        || Intent::UnknownCommand {
            name: name.to_string(),
        },
        |command| Intent::Command {
            command,
            args: args.to_string(),
        },
    )
}

fn is_continuation(message: &IncomingMessage, facts: &ClassifierFacts, bot: &BotIdentity) -> bool {
    message.reply_to.as_ref().is_some_and(|replied| {
        replied.sender_id == Some(bot.id) && facts.last_bot_message_id == Some(replied.message_id)
    })
}

/// Classify a message. The first matching rule wins:
/// blacklist, private chat, command, mention, continuation, plain.
#[must_use]
pub fn classify(message: &IncomingMessage, facts: &ClassifierFacts, bot: &BotIdentity) -> Intent {
    if facts.sender_blacklisted {
        return Intent::Denied;
    }
    if message.is_private() {
        return Intent::Private(private_action(&message.payload));
    }
    if let Payload::Command { name, args, target } = &message.payload {
        return command_intent(name, args, *target);
    }

    if message.mentions_bot {
        // Any text mention is a question, even a bare one
        let answerable = matches!(message.payload, Payload::Text { .. })
            || carries_question(&message.payload, &bot.name);
        if !answerable {
            return Intent::Unsupported;
        }
        if !facts.group_whitelisted {
            return Intent::Ignored;
        }
        return if message.reply_to.is_some() {
            Intent::ReplyQuestion
        } else {
            Intent::MentionQuestion
        };
    }

    if !facts.group_whitelisted {
        return Intent::Ignored;
    }
    if is_continuation(message, facts, bot) && carries_question(&message.payload, &bot.name) {
        return Intent::Continuation;
    }
    match message.payload {
        Payload::Text { .. } | Payload::Photo { .. } => Intent::Plain,
        _ => Intent::Ignored,
    }
}
