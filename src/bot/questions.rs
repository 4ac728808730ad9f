//! AI-backed answers: mention questions, continuations, reply questions and search.

use crate::bot::classifier::is_supported_document;
use crate::bot::dispatch::{DispatchController, DispatchError, Disposition};
use crate::bot::messaging::{edit_formatted, send_formatted, send_long_reply};
use crate::bot::messenger::{FormatMode, MessengerError, SentMessage};
use crate::bot::update::{IncomingMessage, Payload};
use crate::config::{MAX_DOCUMENT_BYTES, STREAM_EDIT_INTERVAL, TELEGRAM_CHUNK_SIZE};
use crate::context::jpeg_data_url;
use crate::cooldown::CooldownTrack;
use crate::llm::{ContentPart, LlmError, Message};
use crate::storage::{
    last_bot_message_key, new_image_blob_key, save_json, KNOWLEDGE_BASE_KEY, SYSTEM_PROMPT_KEY,
};
use crate::utils::{split_long_message, strip_bot_mention};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub(super) const AI_FAILURE_TEXT: &str =
    "Sorry, the AI service failed to answer. Please try again later.";
pub(super) const ATTACHMENT_FAILED_TEXT: &str =
    "Sorry, I couldn't download your attachment. Please try again.";
pub(super) const ATTACHMENT_TOO_LARGE_TEXT: &str =
    "Sorry, that file is too large. Text files up to 1 MiB are supported.";
const SEARCH_USAGE_TEXT: &str = "Usage: /search <query>";
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
const STREAM_PLACEHOLDER: &str = "…";

/// Why an attachment could not be turned into question material
#[derive(Debug, Error)]
enum GatherError {
    #[error(transparent)]
    Download(#[from] MessengerError),
    #[error("Document of {size} bytes exceeds the size limit")]
    TooLarge { size: usize },
}

impl GatherError {
    const fn reply_text(&self) -> &'static str {
        match self {
            Self::Download(_) => ATTACHMENT_FAILED_TEXT,
            Self::TooLarge { .. } => ATTACHMENT_TOO_LARGE_TEXT,
        }
    }
}

/// Question material pulled out of one message
#[derive(Debug, Default)]
struct Material {
    text: String,
    image: Option<Vec<u8>>,
    document: Option<(String, String)>,
}

impl Material {
    fn is_empty(&self) -> bool {
        self.text.is_empty() && self.image.is_none() && self.document.is_none()
    }

    /// Text sent to the model, with any document inlined
    fn prompt_text(&self) -> String {
        match &self.document {
            Some((name, content)) => {
                format!("{}\n\n[file: {name}]\n{content}", self.text)
                    .trim()
                    .to_string()
            }
            None => self.text.clone(),
        }
    }

    /// Text kept in the stored context, without document content
    fn stored_text(&self) -> String {
        match &self.document {
            Some((name, _)) => format!("{} [file: {name}]", self.text).trim().to_string(),
            None => self.text.clone(),
        }
    }

    /// One-shot user message with the image inlined
    fn inline_message(&self) -> Option<Message> {
        if self.is_empty() {
            return None;
        }
        let text = self.prompt_text();
        let Some(image) = &self.image else {
            return Some(Message::user(&text));
        };
        let mut parts = Vec::with_capacity(2);
        if !text.is_empty() {
            parts.push(ContentPart::text(text));
        }
        parts.push(ContentPart::image(jpeg_data_url(image)));
        Some(Message::user_parts(parts))
    }
}

/// The user's side of a context-bearing turn
struct Turn {
    prompt: Message,
    stored: Message,
    blob_key: Option<String>,
}

/// Reads a system prompt field stored either as a bare string or as `{field: "..."}`
fn prompt_field(value: &Value, field: &str) -> Option<String> {
    let text = match value {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => map.get(field).and_then(Value::as_str).map(ToString::to_string),
        _ => None,
    };
    text.filter(|text| !text.trim().is_empty())
}

impl DispatchController {
    async fn stored_prompt(&self, key: &str, field: &str) -> Option<String> {
        match self.kv.get(key).await {
            Ok(value) => value.as_ref().and_then(|value| prompt_field(value, field)),
            Err(e) => {
                warn!(key, error = %e, "Failed to read prompt configuration");
                None
            }
        }
    }

    /// Stored system prompt, then configured message, then the built-in default,
    /// followed by the knowledge base when one is stored.
    pub(super) async fn system_prompt(&self) -> String {
        let base = match self.stored_prompt(SYSTEM_PROMPT_KEY, "systemPrompt").await {
            Some(prompt) => prompt,
            None => self
                .replies
                .system_message
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        };
        match self.stored_prompt(KNOWLEDGE_BASE_KEY, "knowledgeBase").await {
            Some(knowledge) => format!("{base}\n\n## Knowledge base\n{knowledge}"),
            None => base,
        }
    }

    async fn gather(&self, payload: &Payload) -> Result<Material, GatherError> {
        let strip = |text: Option<&str>| {
            text.map(|text| strip_bot_mention(text, &self.identity.name))
                .unwrap_or_default()
        };
        let mut material = Material {
            text: strip(payload.text()),
            ..Material::default()
        };
        match payload {
            Payload::Photo { file_id, .. } => {
                material.image = Some(self.messenger.download_file(file_id).await?);
            }
            Payload::Document {
                file_id,
                file_name,
                mime_type,
                file_size,
                ..
            } if is_supported_document(file_name.as_deref(), mime_type.as_deref(), *file_size) => {
                let bytes = self.messenger.download_file(file_id).await?;
                // The declared size is optional, so check what actually arrived
                if u64::try_from(bytes.len()).map_or(true, |len| len > MAX_DOCUMENT_BYTES) {
                    return Err(GatherError::TooLarge { size: bytes.len() });
                }
                let name = file_name.clone().unwrap_or_else(|| "document".to_string());
                material.document = Some((name, String::from_utf8_lossy(&bytes).into_owned()));
            }
            _ => {}
        }
        Ok(material)
    }

    async fn build_turn(&self, material: Material) -> Result<Turn, DispatchError> {
        let prompt_text = material.prompt_text();
        let stored_text = material.stored_text();
        let Some(image) = material.image else {
            return Ok(Turn {
                prompt: Message::user(&prompt_text),
                stored: Message::user(&stored_text),
                blob_key: None,
            });
        };

        let key = new_image_blob_key();
        self.blobs.put_blob(&key, Bytes::from(image)).await?;
        let mut parts = Vec::with_capacity(2);
        if !stored_text.is_empty() {
            parts.push(ContentPart::text(stored_text));
        }
        parts.push(ContentPart::image(key.clone()));
        let entry = Message::user_parts(parts);
        Ok(Turn {
            prompt: entry.clone(),
            stored: entry,
            blob_key: Some(key),
        })
    }

    /// Delivers the apology for a failed AI call. Missing configuration is
    /// not the user's problem and aborts the request instead.
    async fn report_ai_failure(
        &self,
        message: &IncomingMessage,
        error: LlmError,
    ) -> Result<(), DispatchError> {
        if let LlmError::MissingConfig(detail) = error {
            return Err(DispatchError::Config(detail));
        }
        error!(
            chat_id = message.chat_id,
            user_id = message.sender_id,
            error = %error,
            "AI request failed"
        );
        self.reply(message, AI_FAILURE_TEXT).await;
        Ok(())
    }

    async fn remember_bot_reply(&self, message: &IncomingMessage, sent: Option<SentMessage>) {
        let Some(sent) = sent else {
            return;
        };
        let key = last_bot_message_key(message.chat_id, message.sender_id);
        if let Err(e) = save_json(self.kv.as_ref(), &key, &sent.message_id).await {
            warn!(key, error = %e, "Failed to record last bot message id");
        }
    }

    /// Mention questions and continuations: history plus the new turn
    pub(super) async fn answer_with_context(
        &self,
        message: &IncomingMessage,
    ) -> Result<Disposition, DispatchError> {
        if self.hold_for_cooldown(message, CooldownTrack::General).await {
            return Ok(Disposition::HandledOk);
        }
        let material = match self.gather(&message.payload).await {
            Ok(material) => material,
            Err(e) => {
                warn!(chat_id = message.chat_id, error = %e, "Attachment rejected");
                self.reply(message, e.reply_text()).await;
                return Ok(Disposition::HandledOk);
            }
        };
        let turn = self.build_turn(material).await?;

        let mut pending = self.context.get(message.chat_id, message.sender_id).await;
        pending.push(turn.prompt);
        let mut conversation = vec![Message::system(&self.system_prompt().await)];
        conversation.extend(self.context.resolve_images(&pending).await);

        let (answer, sent) = match self.ask(message, &conversation).await {
            Ok(done) => done,
            Err(e) => {
                if let Some(key) = &turn.blob_key {
                    if let Err(delete_err) = self.blobs.delete_blob(key).await {
                        warn!(key, error = %delete_err, "Failed to drop image of failed turn");
                    }
                }
                self.report_ai_failure(message, e).await?;
                return Ok(Disposition::HandledOk);
            }
        };

        self.remember_bot_reply(message, sent).await;
        self.context
            .append(
                message.chat_id,
                message.sender_id,
                vec![turn.stored, Message::assistant(&answer)],
            )
            .await?;
        self.cooldowns
            .record_request(message.chat_id, CooldownTrack::General)
            .await?;
        info!(
            chat_id = message.chat_id,
            user_id = message.sender_id,
            "Question answered"
        );
        Ok(Disposition::HandledOk)
    }

    /// Mention inside a reply: the replied-to message and the new one, no history
    pub(super) async fn answer_one_shot(
        &self,
        message: &IncomingMessage,
    ) -> Result<Disposition, DispatchError> {
        if self.hold_for_cooldown(message, CooldownTrack::General).await {
            return Ok(Disposition::HandledOk);
        }

        let mut conversation = vec![Message::system(&self.system_prompt().await)];
        let replied = message.reply_to.as_ref().map(|replied| &replied.payload);
        for payload in replied.into_iter().chain([&message.payload]) {
            match self.gather(payload).await {
                Ok(material) => conversation.extend(material.inline_message()),
                Err(e) => {
                    warn!(chat_id = message.chat_id, error = %e, "Attachment rejected");
                    self.reply(message, e.reply_text()).await;
                    return Ok(Disposition::HandledOk);
                }
            }
        }

        match self.ask(message, &conversation).await {
            Ok((_, sent)) => {
                self.remember_bot_reply(message, sent).await;
                self.cooldowns
                    .record_request(message.chat_id, CooldownTrack::General)
                    .await?;
                info!(
                    chat_id = message.chat_id,
                    user_id = message.sender_id,
                    "Reply question answered"
                );
            }
            Err(e) => self.report_ai_failure(message, e).await?,
        }
        Ok(Disposition::HandledOk)
    }

    pub(super) async fn run_search(
        &self,
        message: &IncomingMessage,
        query: &str,
    ) -> Result<(), DispatchError> {
        let query = query.trim();
        if query.is_empty() {
            self.reply(message, SEARCH_USAGE_TEXT).await;
            return Ok(());
        }
        if self.hold_for_cooldown(message, CooldownTrack::Search).await {
            return Ok(());
        }

        let system_prompt = self.system_prompt().await;
        match self
            .ai
            .search(&system_prompt, query, &self.replies.search_model)
            .await
        {
            Ok(answer) => {
                send_long_reply(
                    self.messenger.as_ref(),
                    &self.maintainers,
                    message.chat_id,
                    &answer,
                    Some(message.message_id),
                )
                .await;
                self.cooldowns
                    .record_request(message.chat_id, CooldownTrack::Search)
                    .await?;
                info!(chat_id = message.chat_id, "Search answered");
                Ok(())
            }
            Err(e) => self.report_ai_failure(message, e).await,
        }
    }

    /// Runs the completion and delivers the answer. Returns the answer text
    /// and the last message carrying it.
    async fn ask(
        &self,
        message: &IncomingMessage,
        conversation: &[Message],
    ) -> Result<(String, Option<SentMessage>), LlmError> {
        if self.replies.stream_replies {
            return self.ask_streaming(message, conversation).await;
        }
        let answer = self.ai.complete(conversation, &self.replies.model).await?;
        let sent = send_long_reply(
            self.messenger.as_ref(),
            &self.maintainers,
            message.chat_id,
            &answer,
            Some(message.message_id),
        )
        .await;
        Ok((answer, sent))
    }

    /// Streams into a placeholder message, editing at most once per interval.
    async fn ask_streaming(
        &self,
        message: &IncomingMessage,
        conversation: &[Message],
    ) -> Result<(String, Option<SentMessage>), LlmError> {
        let mut stream = self
            .ai
            .complete_streaming(conversation, &self.replies.model)
            .await?;
        let placeholder = match self
            .messenger
            .send(
                message.chat_id,
                STREAM_PLACEHOLDER,
                Some(message.message_id),
                FormatMode::Plain,
            )
            .await
        {
            Ok(sent) => Some(sent),
            Err(e) => {
                warn!(chat_id = message.chat_id, error = %e, "Placeholder send failed");
                None
            }
        };

        let interval_ms = i64::try_from(STREAM_EDIT_INTERVAL.as_millis()).unwrap_or(i64::MAX);
        let mut answer = String::new();
        let mut last_edit = self.clock.now_ms();
        while let Some(delta) = stream.next().await {
            let delta = match delta {
                Ok(delta) => delta,
                Err(e) => {
                    self.drop_placeholder(message.chat_id, placeholder).await;
                    return Err(e);
                }
            };
            answer.push_str(&delta);
            let now = self.clock.now_ms();
            if let Some(sent) = placeholder {
                if now - last_edit >= interval_ms && answer.chars().count() <= TELEGRAM_CHUNK_SIZE {
                    last_edit = now;
                    if let Err(e) = self
                        .messenger
                        .edit(message.chat_id, sent.message_id, &answer, FormatMode::Plain)
                        .await
                    {
                        debug!(error = %e, "Intermediate stream edit failed");
                    }
                }
            }
        }

        if answer.trim().is_empty() {
            self.drop_placeholder(message.chat_id, placeholder).await;
            return Err(LlmError::EmptyResponse);
        }
        let sent = self.finish_stream(message, placeholder, &answer).await;
        Ok((answer, sent))
    }

    async fn drop_placeholder(&self, chat_id: i64, placeholder: Option<SentMessage>) {
        if let Some(sent) = placeholder {
            if let Err(e) = self.messenger.delete(chat_id, sent.message_id).await {
                warn!(chat_id, error = %e, "Failed to remove stream placeholder");
            }
        }
    }

    /// Final formatted edit; overflow beyond the first chunk goes out as new messages.
    async fn finish_stream(
        &self,
        message: &IncomingMessage,
        placeholder: Option<SentMessage>,
        answer: &str,
    ) -> Option<SentMessage> {
        let Some(placeholder) = placeholder else {
            return send_long_reply(
                self.messenger.as_ref(),
                &self.maintainers,
                message.chat_id,
                answer,
                Some(message.message_id),
            )
            .await;
        };

        let parts = split_long_message(answer, TELEGRAM_CHUNK_SIZE);
        let mut last = Some(placeholder);
        for (index, part) in parts.iter().enumerate() {
            let delivered = if index == 0 {
                edit_formatted(
                    self.messenger.as_ref(),
                    message.chat_id,
                    placeholder.message_id,
                    part,
                )
                .await
                .map(|()| placeholder)
            } else {
                send_formatted(
                    self.messenger.as_ref(),
                    message.chat_id,
                    part,
                    Some(message.message_id),
                )
                .await
            };
            match delivered {
                Ok(sent) => last = Some(sent),
                Err(e) => warn!(
                    chat_id = message.chat_id,
                    error = %e,
                    "Streamed answer part undeliverable"
                ),
            }
        }
        last
    }
}
