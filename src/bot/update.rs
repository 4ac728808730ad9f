//! Inbound Telegram updates.
//!
//! The serde types mirror the subset of the Bot API `Update` object the bot
//! reads. [`IncomingMessage::parse`] turns one of them into a tagged
//! [`Payload`] so handlers never probe optional fields themselves.

use serde::Deserialize;

/// Bot API `Update`
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    /// Monotonic update id
    pub update_id: i64,
    /// New incoming message, if this update carries one
    pub message: Option<WireMessage>,
}

/// Bot API `Message` subset
#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    /// Message id within the chat
    pub message_id: i32,
    /// Sender, absent for channel posts
    pub from: Option<WireUser>,
    /// Chat the message belongs to
    pub chat: WireChat,
    /// Text of a text message
    pub text: Option<String>,
    /// Caption of a media message
    pub caption: Option<String>,
    /// Entities inside `text`
    #[serde(default)]
    pub entities: Vec<WireEntity>,
    /// Entities inside `caption`
    #[serde(default)]
    pub caption_entities: Vec<WireEntity>,
    /// Available photo sizes, smallest first
    #[serde(default)]
    pub photo: Vec<WirePhotoSize>,
    /// Attached general file
    pub document: Option<WireDocument>,
    /// The message this one replies to
    pub reply_to_message: Option<Box<WireMessage>>,
}

/// Bot API `User` subset
#[derive(Debug, Clone, Deserialize)]
pub struct WireUser {
    /// User id
    pub id: i64,
    /// Whether the user is a bot
    #[serde(default)]
    pub is_bot: bool,
    /// First name
    #[serde(default)]
    pub first_name: String,
    /// Username without `@`
    pub username: Option<String>,
}

/// Kind of chat
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    /// One-to-one chat with the bot
    Private,
    /// Basic group
    Group,
    /// Supergroup
    Supergroup,
    /// Broadcast channel
    Channel,
}

/// Bot API `Chat` subset
#[derive(Debug, Clone, Deserialize)]
pub struct WireChat {
    /// Chat id
    pub id: i64,
    /// Chat kind
    #[serde(rename = "type")]
    pub kind: ChatKind,
}

/// Bot API `MessageEntity` subset. Offsets count UTF-16 code units.
#[derive(Debug, Clone, Deserialize)]
pub struct WireEntity {
    /// Entity type, e.g. `mention` or `bot_command`
    #[serde(rename = "type")]
    pub kind: String,
    /// Start in UTF-16 code units
    pub offset: usize,
    /// Length in UTF-16 code units
    pub length: usize,
}

/// Bot API `PhotoSize` subset
#[derive(Debug, Clone, Deserialize)]
pub struct WirePhotoSize {
    /// Downloadable file id
    pub file_id: String,
    /// Width in pixels
    #[serde(default)]
    pub width: u32,
    /// Height in pixels
    #[serde(default)]
    pub height: u32,
}

/// Bot API `Document` subset
#[derive(Debug, Clone, Deserialize)]
pub struct WireDocument {
    /// Downloadable file id
    pub file_id: String,
    /// Original file name
    pub file_name: Option<String>,
    /// MIME type reported by the sender
    pub mime_type: Option<String>,
    /// Size in bytes
    pub file_size: Option<u64>,
}

/// What a message carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Plain text
    Text {
        /// Message text
        text: String,
    },
    /// A photo, identified by its largest size
    Photo {
        /// File id of the largest size
        file_id: String,
        /// Optional caption
        caption: Option<String>,
    },
    /// A general file
    Document {
        /// File id
        file_id: String,
        /// Original file name
        file_name: Option<String>,
        /// MIME type
        mime_type: Option<String>,
        /// Size in bytes
        file_size: Option<u64>,
        /// Optional caption
        caption: Option<String>,
    },
    /// A bot command
    Command {
        /// Lower-cased command name without `/` or `@bot`
        name: String,
        /// Text after the command entity, trimmed
        args: String,
        /// Who the command is addressed to
        target: CommandTarget,
    },
    /// Anything else (stickers, voice, ...), with its caption if any
    Other {
        /// Optional caption
        caption: Option<String>,
    },
}

impl Payload {
    /// Text or caption, whichever the payload has
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Photo { caption, .. }
            | Self::Document { caption, .. }
            | Self::Other { caption } => caption.as_deref(),
            Self::Command { .. } => None,
        }
    }
}

/// Addressee of a command entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTarget {
    /// `/cmd@this_bot`
    ThisBot,
    /// `/cmd@another_bot`
    OtherBot,
    /// Bare `/cmd`
    Unaddressed,
}

/// The message being replied to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepliedMessage {
    /// Its message id
    pub message_id: i32,
    /// Its sender, if known
    pub sender_id: Option<i64>,
    /// What it carries
    pub payload: Payload,
}

/// A parsed inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Message id
    pub message_id: i32,
    /// Chat id
    pub chat_id: i64,
    /// Chat kind
    pub chat_kind: ChatKind,
    /// Sender id
    pub sender_id: i64,
    /// Sender display name, for logs
    pub sender_name: String,
    /// What it carries
    pub payload: Payload,
    /// Whether a mention entity names this bot
    pub mentions_bot: bool,
    /// The message this one replies to
    pub reply_to: Option<RepliedMessage>,
}

impl IncomingMessage {
    /// Parse a wire message. Messages without a sender are not handled.
    #[must_use]
    pub fn parse(message: &WireMessage, bot_name: &str) -> Option<Self> {
        let sender = message.from.as_ref()?;
        let reply_to = message.reply_to_message.as_deref().map(|replied| RepliedMessage {
            message_id: replied.message_id,
            sender_id: replied.from.as_ref().map(|user| user.id),
            payload: parse_payload(replied, bot_name),
        });
        Some(Self {
            message_id: message.message_id,
            chat_id: message.chat.id,
            chat_kind: message.chat.kind,
            sender_id: sender.id,
            sender_name: sender
                .username
                .clone()
                .unwrap_or_else(|| sender.first_name.clone()),
            payload: parse_payload(message, bot_name),
            mentions_bot: mentions_bot(message, bot_name),
            reply_to,
        })
    }

    /// Whether the chat is a one-to-one chat
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.chat_kind == ChatKind::Private
    }
}

/// Slice `text` by UTF-16 offsets, `None` when the span is out of range or splits a pair.
#[must_use]
pub fn utf16_slice(text: &str, offset: usize, length: usize) -> Option<String> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let end = offset.checked_add(length)?;
    let span = units.get(offset..end)?;
    String::from_utf16(span).ok()
}

/// Byte index in `text` right after the first `units` UTF-16 code units
fn utf16_to_byte_offset(text: &str, units: usize) -> Option<usize> {
    let mut seen = 0;
    for (idx, ch) in text.char_indices() {
        if seen == units {
            return Some(idx);
        }
        seen += ch.len_utf16();
    }
    (seen == units).then_some(text.len())
}

fn mentions_bot(message: &WireMessage, bot_name: &str) -> bool {
    let expected = format!("@{bot_name}");
    let sources = [
        (message.text.as_deref(), &message.entities),
        (message.caption.as_deref(), &message.caption_entities),
    ];
    sources.iter().any(|(text, entities)| {
        text.is_some_and(|text| {
            entities
                .iter()
                .filter(|entity| entity.kind == "mention")
                .filter_map(|entity| utf16_slice(text, entity.offset, entity.length))
                .any(|mention| mention.eq_ignore_ascii_case(&expected))
        })
    })
}

/// Tokenizes the first `bot_command` entity: `/name@bot args`.
fn parse_command(text: &str, entities: &[WireEntity], bot_name: &str) -> Option<Payload> {
    let entity = entities.iter().find(|entity| entity.kind == "bot_command")?;
    let span = utf16_slice(text, entity.offset, entity.length)?;
    let command = span.strip_prefix('/')?;

    let (name, target) = match command.split_once('@') {
        Some((name, addressee)) if addressee.eq_ignore_ascii_case(bot_name) => {
            (name, CommandTarget::ThisBot)
        }
        Some((name, _)) => (name, CommandTarget::OtherBot),
        None => (command, CommandTarget::Unaddressed),
    };
    if name.is_empty() {
        return None;
    }

    let args_start = utf16_to_byte_offset(text, entity.offset + entity.length)?;
    Some(Payload::Command {
        name: name.to_lowercase(),
        args: text[args_start..].trim().to_string(),
        target,
    })
}

fn parse_payload(message: &WireMessage, bot_name: &str) -> Payload {
    if let Some(text) = message.text.as_deref() {
        if let Some(command) = parse_command(text, &message.entities, bot_name) {
            return command;
        }
        return Payload::Text {
            text: text.to_string(),
        };
    }
    if let Some(largest) = message.photo.last() {
        return Payload::Photo {
            file_id: largest.file_id.clone(),
            caption: message.caption.clone(),
        };
    }
    if let Some(document) = &message.document {
        return Payload::Document {
            file_id: document.file_id.clone(),
            file_name: document.file_name.clone(),
            mime_type: document.mime_type.clone(),
            file_size: document.file_size,
            caption: message.caption.clone(),
        };
    }
    Payload::Other {
        caption: message.caption.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire(value: serde_json::Value) -> WireMessage {
        serde_json::from_value(value).expect("valid message json")
    }

    #[test]
    fn test_utf16_slice_handles_astral_chars() {
        // "😀" is two UTF-16 units
        let text = "😀 @helper_bot hi";
        assert_eq!(utf16_slice(text, 3, 11).as_deref(), Some("@helper_bot"));
        assert_eq!(utf16_slice(text, 1, 2), None);
        assert_eq!(utf16_slice(text, 40, 2), None);
    }

    #[test]
    fn test_command_addressed_to_this_bot() {
        let message = wire(json!({
            "message_id": 5,
            "from": {"id": 7, "first_name": "Ann"},
            "chat": {"id": -100, "type": "supergroup"},
            "text": "/Ban@Helper_Bot 123",
            "entities": [{"type": "bot_command", "offset": 0, "length": 15}]
        }));
        let parsed = IncomingMessage::parse(&message, "helper_bot").expect("has sender");
        assert_eq!(
            parsed.payload,
            Payload::Command {
                name: "ban".to_string(),
                args: "123".to_string(),
                target: CommandTarget::ThisBot,
            }
        );
    }

    #[test]
    fn test_command_targets() {
        let other = parse_command(
            "/start@other_bot",
            &[WireEntity { kind: "bot_command".into(), offset: 0, length: 16 }],
            "helper_bot",
        );
        assert!(matches!(
            other,
            Some(Payload::Command { target: CommandTarget::OtherBot, .. })
        ));
        let bare = parse_command(
            "/help",
            &[WireEntity { kind: "bot_command".into(), offset: 0, length: 5 }],
            "helper_bot",
        );
        assert!(matches!(
            bare,
            Some(Payload::Command { target: CommandTarget::Unaddressed, ref name, .. }) if name == "help"
        ));
    }

    #[test]
    fn test_malformed_command_entity_falls_back_to_text() {
        let message = wire(json!({
            "message_id": 5,
            "from": {"id": 7},
            "chat": {"id": -100, "type": "group"},
            "text": "/x",
            "entities": [{"type": "bot_command", "offset": 0, "length": 40}]
        }));
        let parsed = IncomingMessage::parse(&message, "helper_bot").expect("has sender");
        assert_eq!(parsed.payload, Payload::Text { text: "/x".to_string() });
    }

    #[test]
    fn test_photo_mention_in_caption_and_reply() {
        let message = wire(json!({
            "message_id": 9,
            "from": {"id": 7, "username": "ann"},
            "chat": {"id": -100, "type": "supergroup"},
            "caption": "@HELPER_BOT what is this",
            "caption_entities": [{"type": "mention", "offset": 0, "length": 11}],
            "photo": [
                {"file_id": "small", "width": 90, "height": 90},
                {"file_id": "large", "width": 800, "height": 800}
            ],
            "reply_to_message": {
                "message_id": 8,
                "from": {"id": 42, "is_bot": true},
                "chat": {"id": -100, "type": "supergroup"},
                "text": "earlier answer"
            }
        }));
        let parsed = IncomingMessage::parse(&message, "helper_bot").expect("has sender");
        assert!(parsed.mentions_bot);
        assert_eq!(parsed.sender_name, "ann");
        assert_eq!(
            parsed.payload,
            Payload::Photo {
                file_id: "large".to_string(),
                caption: Some("@HELPER_BOT what is this".to_string()),
            }
        );
        let replied = parsed.reply_to.expect("reply present");
        assert_eq!(replied.sender_id, Some(42));
        assert_eq!(replied.payload.text(), Some("earlier answer"));
    }

    #[test]
    fn test_mention_of_other_user_is_not_bot_mention() {
        let message = wire(json!({
            "message_id": 1,
            "from": {"id": 7},
            "chat": {"id": -100, "type": "group"},
            "text": "@helper_bot_fan hello",
            "entities": [{"type": "mention", "offset": 0, "length": 15}]
        }));
        let parsed = IncomingMessage::parse(&message, "helper_bot").expect("has sender");
        assert!(!parsed.mentions_bot);
    }

    #[test]
    fn test_message_without_sender_is_skipped() {
        let message = wire(json!({
            "message_id": 1,
            "chat": {"id": -100, "type": "channel"},
            "text": "post"
        }));
        assert!(IncomingMessage::parse(&message, "helper_bot").is_none());
    }
}
