//! End-to-end dispatch scenarios over in-memory collaborators.

use crate::access::{AccessControl, AccessList};
use crate::bot::dispatch::{Collaborators, DispatchController, Disposition};
use crate::bot::messenger::FormatMode;
use crate::bot::update::Update;
use crate::clock::ManualClock;
use crate::config::Settings;
use crate::context::{jpeg_data_url, ConversationContextStore, ContextEntry};
use crate::llm::{Content, ContentPart, LlmError, Message};
use crate::storage::memory::InMemoryStore;
use crate::storage::{
    context_key, cooldown_key, last_bot_message_key, search_cooldown_key, KeyValueStore,
};
use crate::testing::{RecordingMessenger, ScriptedAi};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const GROUP: i64 = -100_123;
const ADMIN: i64 = 7;
const USER: i64 = 8;
const BOT_ID: i64 = 42;
const MAINTAINER: i64 = 900;
const NOW: i64 = 1_700_000_000_000;
const MENTION: &str = "@helper_bot";

fn settings() -> Settings {
    Settings {
        bot_name: "helper_bot".to_string(),
        bot_id: BOT_ID,
        maintainer_user_ids_str: Some(MAINTAINER.to_string()),
        ..Settings::default()
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    messenger: Arc<RecordingMessenger>,
    ai: Arc<ScriptedAi>,
    clock: Arc<ManualClock>,
    controller: DispatchController,
}

impl Harness {
    fn new(messenger: RecordingMessenger, ai: ScriptedAi) -> Self {
        Self::with_settings(&settings(), messenger, ai)
    }

    fn with_settings(settings: &Settings, messenger: RecordingMessenger, ai: ScriptedAi) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let messenger = Arc::new(messenger);
        let ai = Arc::new(ai);
        let clock = Arc::new(ManualClock::new(NOW));
        let controller = DispatchController::new(
            settings,
            Collaborators {
                kv: store.clone(),
                blobs: store.clone(),
                messenger: messenger.clone(),
                ai: ai.clone(),
                clock: clock.clone(),
            },
        );
        Self {
            store,
            messenger,
            ai,
            clock,
            controller,
        }
    }

    fn access(&self) -> AccessControl {
        AccessControl::new(self.store.clone())
    }

    async fn list(&self, list: AccessList, id: i64) {
        self.access().add(list, id).await.expect("seed access list");
    }

    async fn context(&self, user: i64) -> Vec<ContextEntry> {
        ConversationContextStore::new(self.store.clone(), self.store.clone(), 10)
            .get(GROUP, user)
            .await
    }

    async fn value(&self, key: &str) -> Option<Value> {
        self.store.get(key).await.expect("read store")
    }

    async fn deliver(&self, message: Value) -> Disposition {
        let update: Update = serde_json::from_value(json!({"update_id": 1, "message": message}))
            .expect("valid update");
        self.controller.handle_update(&update).await
    }
}

fn entities(text: &str) -> Vec<Value> {
    let mut entities = Vec::new();
    let mut command_len = 0;
    if text.starts_with('/') {
        command_len = text.split_whitespace().next().map_or(0, str::len);
        entities.push(json!({
            "type": "bot_command",
            "offset": 0,
            "length": text[..command_len].encode_utf16().count()
        }));
    }
    for (idx, _) in text.match_indices(MENTION) {
        if idx < command_len {
            continue;
        }
        entities.push(json!({
            "type": "mention",
            "offset": text[..idx].encode_utf16().count(),
            "length": MENTION.len()
        }));
    }
    entities
}

fn chat(chat_id: i64) -> Value {
    let kind = if chat_id > 0 { "private" } else { "supergroup" };
    json!({"id": chat_id, "type": kind})
}

fn text_message(message_id: i32, chat_id: i64, from: i64, text: &str) -> Value {
    json!({
        "message_id": message_id,
        "from": {"id": from, "is_bot": false, "first_name": "Tester"},
        "chat": chat(chat_id),
        "text": text,
        "entities": entities(text),
    })
}

fn photo_message(message_id: i32, from: i64, caption: &str) -> Value {
    json!({
        "message_id": message_id,
        "from": {"id": from, "is_bot": false, "first_name": "Tester"},
        "chat": chat(GROUP),
        "caption": caption,
        "caption_entities": entities(caption),
        "photo": [
            {"file_id": "thumb", "width": 90, "height": 90},
            {"file_id": "full", "width": 1280, "height": 960}
        ],
    })
}

fn document_message(message_id: i32, from: i64, caption: &str) -> Value {
    json!({
        "message_id": message_id,
        "from": {"id": from, "is_bot": false, "first_name": "Tester"},
        "chat": chat(GROUP),
        "caption": caption,
        "caption_entities": entities(caption),
        "document": {"file_id": "notes", "file_name": "notes.txt", "mime_type": "text/plain"},
    })
}

fn replying_to(mut message: Value, replied: Value) -> Value {
    message["reply_to_message"] = replied;
    message
}

fn bot_reply(message_id: i32, text: &str) -> Value {
    json!({
        "message_id": message_id,
        "from": {"id": BOT_ID, "is_bot": true, "first_name": "Helper"},
        "chat": chat(GROUP),
        "text": text,
    })
}

#[tokio::test]
async fn test_unlisted_user_cannot_ban() {
    let harness = Harness::new(RecordingMessenger::new(), ScriptedAi::new());
    harness.list(AccessList::GroupWhitelist, GROUP).await;

    let disposition = harness
        .deliver(text_message(10, GROUP, USER, "/ban@helper_bot 123"))
        .await;

    assert_eq!(disposition, Disposition::Denied);
    assert!(harness.access().members(AccessList::UserBlacklist).await.is_empty());
    let sent = harness.messenger.sent_to(GROUP);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("permission"));
    assert_eq!(sent[0].reply_to, Some(10));
    // Refusal and command are both cleaned up
    assert_eq!(
        harness.messenger.deleted(),
        vec![(GROUP, 10), (GROUP, sent[0].message_id)]
    );
}

#[tokio::test]
async fn test_ban_then_denied_everywhere() {
    let harness = Harness::new(RecordingMessenger::new(), ScriptedAi::new());
    harness.list(AccessList::UserWhitelist, ADMIN).await;

    let disposition = harness
        .deliver(text_message(10, GROUP, ADMIN, "/ban@helper_bot 123"))
        .await;
    assert_eq!(disposition, Disposition::HandledOk);
    assert_eq!(
        harness.access().members(AccessList::UserBlacklist).await,
        vec![123]
    );

    let elsewhere = -555;
    let disposition = harness
        .deliver(text_message(11, elsewhere, 123, "@helper_bot hello"))
        .await;
    assert_eq!(disposition, Disposition::Denied);
    let denial = harness.messenger.sent_to(elsewhere);
    assert_eq!(denial.len(), 1);
    assert!(denial[0].text.contains("banned"));
    assert!(harness.ai.completions().is_empty());
    // The denial itself is not cleaned up
    assert!(!harness
        .messenger
        .deleted()
        .contains(&(elsewhere, denial[0].message_id)));
}

#[tokio::test]
async fn test_cooldown_blocks_question() {
    let harness = Harness::new(RecordingMessenger::new(), ScriptedAi::new());
    harness.list(AccessList::GroupWhitelist, GROUP).await;
    let record = json!({"lastRequestTimestamp": NOW - 10_000});
    harness
        .store
        .put(&cooldown_key(GROUP), record.clone())
        .await
        .expect("seed cooldown");

    harness
        .deliver(text_message(20, GROUP, USER, "@helper_bot hello"))
        .await;

    assert!(harness.ai.completions().is_empty());
    let sent = harness.messenger.sent_to(GROUP);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("80 seconds"), "got {}", sent[0].text);
    assert_eq!(harness.value(&cooldown_key(GROUP)).await, Some(record));
    // Only the notice is removed, the question stays
    assert_eq!(harness.messenger.deleted(), vec![(GROUP, sent[0].message_id)]);
}

#[tokio::test]
async fn test_whitelisted_user_skips_cooldown() {
    let harness = Harness::new(
        RecordingMessenger::new(),
        ScriptedAi::answering([Ok("sure".to_string())]),
    );
    harness.list(AccessList::GroupWhitelist, GROUP).await;
    harness.list(AccessList::UserWhitelist, USER).await;
    harness
        .store
        .put(&cooldown_key(GROUP), json!({"lastRequestTimestamp": NOW}))
        .await
        .expect("seed cooldown");

    harness
        .deliver(text_message(20, GROUP, USER, "@helper_bot again"))
        .await;
    assert_eq!(harness.ai.completions().len(), 1);
}

#[tokio::test]
async fn test_mention_question_round_trip() {
    let harness = Harness::new(
        RecordingMessenger::new(),
        ScriptedAi::answering([Ok("Hi there".to_string())]),
    );
    harness.list(AccessList::GroupWhitelist, GROUP).await;

    let disposition = harness
        .deliver(text_message(30, GROUP, USER, "@helper_bot hello"))
        .await;
    assert_eq!(disposition, Disposition::HandledOk);

    let completions = harness.ai.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].len(), 2);
    assert_eq!(completions[0][1], Message::user("hello"));

    assert_eq!(
        harness.context(USER).await,
        vec![Message::user("hello"), Message::assistant("Hi there")]
    );
    assert_eq!(
        harness.value(&cooldown_key(GROUP)).await,
        Some(json!({"lastRequestTimestamp": NOW}))
    );
    let reply = &harness.messenger.sent_to(GROUP)[0];
    assert_eq!(reply.format, FormatMode::Html);
    assert_eq!(
        harness.value(&last_bot_message_key(GROUP, USER)).await,
        Some(json!(reply.message_id))
    );
    assert!(harness.messenger.deleted().is_empty());
}

#[tokio::test]
async fn test_continuation_carries_history() {
    let harness = Harness::new(
        RecordingMessenger::new(),
        ScriptedAi::answering([Ok("First".to_string()), Ok("Second".to_string())]),
    );
    harness.list(AccessList::GroupWhitelist, GROUP).await;

    harness
        .deliver(text_message(30, GROUP, USER, "@helper_bot hello"))
        .await;
    let first_reply = harness.messenger.sent_to(GROUP)[0].message_id;
    harness.clock.advance(Duration::from_secs(91));

    let follow_up = replying_to(
        text_message(31, GROUP, USER, "and then?"),
        bot_reply(first_reply, "First"),
    );
    harness.deliver(follow_up).await;

    let completions = harness.ai.completions();
    assert_eq!(completions.len(), 2);
    // system, hello, First, and then?
    assert_eq!(completions[1].len(), 4);
    assert_eq!(completions[1][3], Message::user("and then?"));
    assert_eq!(harness.context(USER).await.len(), 4);
}

#[tokio::test]
async fn test_reply_to_stale_bot_message_is_plain() {
    let harness = Harness::new(RecordingMessenger::new(), ScriptedAi::new());
    harness.list(AccessList::GroupWhitelist, GROUP).await;
    harness
        .store
        .put(&last_bot_message_key(GROUP, USER), json!(500))
        .await
        .expect("seed last id");

    let reply = replying_to(text_message(31, GROUP, USER, "ok"), bot_reply(400, "old"));
    harness.deliver(reply).await;

    assert!(harness.ai.completions().is_empty());
    assert!(harness.messenger.sent().is_empty());
    assert_eq!(harness.context(USER).await, vec![Message::user("ok")]);
}

#[tokio::test]
async fn test_reply_question_is_one_shot() {
    let harness = Harness::new(
        RecordingMessenger::new(),
        ScriptedAi::answering([Ok("It is a language".to_string())]),
    );
    harness.list(AccessList::GroupWhitelist, GROUP).await;

    let question = replying_to(
        text_message(41, GROUP, USER, "@helper_bot what is this?"),
        text_message(40, GROUP, ADMIN, "Rust is great"),
    );
    harness.deliver(question).await;

    let completions = harness.ai.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(
        completions[0][1..],
        [Message::user("Rust is great"), Message::user("what is this?")]
    );
    assert!(harness.context(USER).await.is_empty());
    assert!(harness.value(&cooldown_key(GROUP)).await.is_some());
}

#[tokio::test]
async fn test_clear_user_context_cleans_up() {
    let harness = Harness::new(RecordingMessenger::new(), ScriptedAi::new());
    harness.list(AccessList::GroupWhitelist, GROUP).await;
    harness
        .store
        .put(&context_key(GROUP, USER), json!([{"role": "user", "content": "old"}]))
        .await
        .expect("seed context");

    let disposition = harness
        .deliver(text_message(50, GROUP, USER, "/clear_user_context@helper_bot"))
        .await;

    assert_eq!(disposition, Disposition::HandledOk);
    assert_eq!(harness.value(&context_key(GROUP, USER)).await, Some(json!([])));
    let sent = harness.messenger.sent_to(GROUP);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("cleared"));
    assert_eq!(
        harness.messenger.deleted(),
        vec![(GROUP, 50), (GROUP, sent[0].message_id)]
    );
    assert_eq!(harness.messenger.menus(), vec![GROUP]);
}

#[tokio::test]
async fn test_group_commands_must_be_addressed() {
    let harness = Harness::new(RecordingMessenger::new(), ScriptedAi::new());
    harness.list(AccessList::UserWhitelist, ADMIN).await;

    harness
        .deliver(text_message(60, GROUP, ADMIN, "/ban 123"))
        .await;

    assert!(harness.messenger.sent().is_empty());
    assert!(harness.messenger.menus().is_empty());
    assert!(harness.access().members(AccessList::UserBlacklist).await.is_empty());
}

#[tokio::test]
async fn test_invalid_user_id_gets_usage() {
    let harness = Harness::new(RecordingMessenger::new(), ScriptedAi::new());
    harness.list(AccessList::UserWhitelist, ADMIN).await;

    harness
        .deliver(text_message(61, GROUP, ADMIN, "/whitelist_user@helper_bot bob"))
        .await;

    let sent = harness.messenger.sent_to(GROUP);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("/whitelist_user"));
    assert!(harness.messenger.deleted().is_empty());
}

#[tokio::test]
async fn test_unknown_command_needs_whitelisted_user() {
    let harness = Harness::new(RecordingMessenger::new(), ScriptedAi::new());
    harness.list(AccessList::GroupWhitelist, GROUP).await;

    let disposition = harness
        .deliver(text_message(62, GROUP, USER, "/dance@helper_bot"))
        .await;
    assert_eq!(disposition, Disposition::Denied);
    let refusal = harness.messenger.sent_to(GROUP);
    assert_eq!(refusal.len(), 1);
    assert!(refusal[0].text.contains("permission"));

    harness.list(AccessList::UserWhitelist, USER).await;
    let disposition = harness
        .deliver(text_message(63, GROUP, USER, "/dance@helper_bot"))
        .await;
    assert_eq!(disposition, Disposition::HandledOk);
    let sent = harness.messenger.sent_to(GROUP);
    assert_eq!(sent.len(), 2);
    assert!(sent[1].text.contains("Unknown command"));
}

#[tokio::test]
async fn test_search_uses_its_own_cooldown() {
    let harness = Harness::new(
        RecordingMessenger::new(),
        ScriptedAi::answering([Ok("Found it".to_string())]),
    );
    harness.list(AccessList::GroupWhitelist, GROUP).await;

    harness
        .deliver(text_message(70, GROUP, USER, "/search@helper_bot rust news"))
        .await;
    assert_eq!(harness.ai.searches(), vec!["rust news".to_string()]);
    assert!(harness.value(&search_cooldown_key(GROUP)).await.is_some());
    assert!(harness.value(&cooldown_key(GROUP)).await.is_none());

    harness
        .deliver(text_message(71, GROUP, USER, "/search@helper_bot more"))
        .await;
    assert_eq!(harness.ai.searches().len(), 1);
    let notice = harness.messenger.sent_to(GROUP).pop().expect("notice sent");
    assert!(notice.text.contains("seconds"));
    assert_eq!(harness.messenger.deleted(), vec![(GROUP, notice.message_id)]);
}

#[tokio::test]
async fn test_private_messages() {
    let harness = Harness::new(RecordingMessenger::new(), ScriptedAi::new());

    harness.deliver(text_message(80, USER, USER, "hello there")).await;
    assert_eq!(harness.messenger.forwarded(), vec![(MAINTAINER, USER, 80)]);
    assert!(harness.messenger.sent().is_empty());

    harness.deliver(text_message(81, USER, USER, "/search x")).await;
    assert!(harness.messenger.sent().is_empty());

    harness.deliver(text_message(82, USER, USER, "/start")).await;
    let intro = harness.messenger.sent_to(USER);
    assert_eq!(intro.len(), 1);
    assert_eq!(intro[0].reply_to, Some(82));
    assert!(harness.ai.completions().is_empty());
}

#[tokio::test]
async fn test_non_whitelisted_group_is_silent() {
    let harness = Harness::new(RecordingMessenger::new(), ScriptedAi::new());

    harness
        .deliver(text_message(90, GROUP, USER, "@helper_bot hello"))
        .await;
    harness.deliver(text_message(91, GROUP, USER, "chatter")).await;

    assert!(harness.messenger.sent().is_empty());
    assert!(harness.ai.completions().is_empty());
    assert!(harness.context(USER).await.is_empty());
}

#[tokio::test]
async fn test_unsupported_mention() {
    let harness = Harness::new(RecordingMessenger::new(), ScriptedAi::new());
    harness.list(AccessList::GroupWhitelist, GROUP).await;

    let voice = json!({
        "message_id": 95,
        "from": {"id": USER, "first_name": "Tester"},
        "chat": chat(GROUP),
        "caption": "@helper_bot listen",
        "caption_entities": entities("@helper_bot listen"),
    });
    harness.deliver(voice).await;

    let sent = harness.messenger.sent_to(GROUP);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("can't handle"));
    assert!(harness.ai.completions().is_empty());
}

#[tokio::test]
async fn test_photo_question_stores_blob() {
    let harness = Harness::new(
        RecordingMessenger::new().with_file("full", b"jpeg"),
        ScriptedAi::answering([Ok("A cat".to_string())]),
    );
    harness.list(AccessList::GroupWhitelist, GROUP).await;

    harness
        .deliver(photo_message(100, USER, "@helper_bot what is this"))
        .await;

    let blobs = harness.store.blob_keys().await;
    assert_eq!(blobs.len(), 1);
    assert!(blobs[0].starts_with("image_base64_"));

    let sent_to_model = &harness.ai.completions()[0][1];
    assert_eq!(
        sent_to_model.image_urls().collect::<Vec<_>>(),
        vec![jpeg_data_url(b"jpeg").as_str()]
    );
    let context = harness.context(USER).await;
    assert_eq!(context.len(), 2);
    assert_eq!(
        context[0].content,
        Content::Parts(vec![
            ContentPart::text("what is this"),
            ContentPart::image(blobs[0].clone())
        ])
    );
}

#[tokio::test]
async fn test_document_question_reads_file() {
    let harness = Harness::new(
        RecordingMessenger::new().with_file("notes", b"shopping list"),
        ScriptedAi::answering([Ok("Eggs".to_string())]),
    );
    harness.list(AccessList::GroupWhitelist, GROUP).await;

    harness
        .deliver(document_message(105, USER, "@helper_bot summarize"))
        .await;

    assert_eq!(harness.ai.completions().len(), 1);
    assert_eq!(harness.context(USER).await.len(), 2);
}

#[tokio::test]
async fn test_oversized_document_without_declared_size_is_rejected() {
    let oversized = vec![b'a'; 1024 * 1024 + 1];
    let harness = Harness::new(
        RecordingMessenger::new().with_file("notes", &oversized),
        ScriptedAi::answering([Ok("unused".to_string())]),
    );
    harness.list(AccessList::GroupWhitelist, GROUP).await;

    let disposition = harness
        .deliver(document_message(106, USER, "@helper_bot summarize"))
        .await;

    assert_eq!(disposition, Disposition::HandledOk);
    assert!(harness.ai.completions().is_empty());
    assert!(harness.context(USER).await.is_empty());
    let sent = harness.messenger.sent_to(GROUP);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("too large"), "got {}", sent[0].text);
}

#[tokio::test]
async fn test_ai_failure_leaves_no_trace() {
    let harness = Harness::new(
        RecordingMessenger::new().with_file("full", b"jpeg"),
        ScriptedAi::answering([Err(LlmError::ApiError("500".to_string()))]),
    );
    harness.list(AccessList::GroupWhitelist, GROUP).await;

    let disposition = harness
        .deliver(photo_message(110, USER, "@helper_bot what is this"))
        .await;

    assert_eq!(disposition, Disposition::HandledOk);
    let sent = harness.messenger.sent_to(GROUP);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("failed"));
    assert!(harness.context(USER).await.is_empty());
    assert!(harness.store.blob_keys().await.is_empty());
    assert!(harness.value(&cooldown_key(GROUP)).await.is_none());
}

#[tokio::test]
async fn test_missing_ai_config_is_an_error() {
    let harness = Harness::new(
        RecordingMessenger::new(),
        ScriptedAi::answering([Err(LlmError::MissingConfig("GEMINI_API_KEY".to_string()))]),
    );
    harness.list(AccessList::GroupWhitelist, GROUP).await;

    let disposition = harness
        .deliver(text_message(120, GROUP, USER, "@helper_bot hi"))
        .await;

    assert_eq!(disposition, Disposition::Error);
    assert!(harness.messenger.sent_to(GROUP).is_empty());
    let notices = harness.messenger.sent_to(MAINTAINER);
    assert_eq!(notices.len(), 1);
    assert!(notices[0].text.contains("GEMINI_API_KEY"));
}

#[tokio::test]
async fn test_html_rejection_falls_back_to_markdown() {
    let harness = Harness::new(
        RecordingMessenger::rejecting_html(),
        ScriptedAi::answering([Ok("1 + 1 = 2.".to_string())]),
    );
    harness.list(AccessList::GroupWhitelist, GROUP).await;

    harness
        .deliver(text_message(130, GROUP, USER, "@helper_bot sum"))
        .await;

    let sent = harness.messenger.sent_to(GROUP);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].format, FormatMode::MarkdownV2);
    assert_eq!(sent[0].text, r"1 \+ 1 \= 2\.");
}

#[tokio::test]
async fn test_undeliverable_reply_notifies_maintainers() {
    let harness = Harness::new(
        RecordingMessenger::rejecting_all(),
        ScriptedAi::answering([Ok("answer".to_string())]),
    );
    harness.list(AccessList::GroupWhitelist, GROUP).await;

    let disposition = harness
        .deliver(text_message(140, GROUP, USER, "@helper_bot q"))
        .await;

    assert_eq!(disposition, Disposition::HandledOk);
    let notices = harness.messenger.sent_to(MAINTAINER);
    assert_eq!(notices.len(), 1);
    assert!(notices[0].text.contains("undeliverable"));
    assert_eq!(notices[0].format, FormatMode::Plain);
}

#[tokio::test]
async fn test_streaming_reply_edits_placeholder() {
    let settings = Settings {
        stream_replies: true,
        ..settings()
    };
    let harness = Harness::with_settings(
        &settings,
        RecordingMessenger::new(),
        ScriptedAi::answering([Ok("streamed answer here".to_string())]),
    );
    harness.list(AccessList::GroupWhitelist, GROUP).await;

    harness
        .deliver(text_message(150, GROUP, USER, "@helper_bot stream"))
        .await;

    let sent = harness.messenger.sent_to(GROUP);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].format, FormatMode::Plain);
    let (_, edited_id, final_text) = harness.messenger.edits().pop().expect("final edit");
    assert_eq!(edited_id, sent[0].message_id);
    assert!(final_text.contains("streamed answer here"));
    assert_eq!(
        harness.context(USER).await[1],
        Message::assistant("streamed answer here")
    );
    assert_eq!(
        harness.value(&last_bot_message_key(GROUP, USER)).await,
        Some(json!(sent[0].message_id))
    );
}

#[tokio::test]
async fn test_unparsable_update_is_skipped() {
    let harness = Harness::new(RecordingMessenger::new(), ScriptedAi::new());
    let update: Update =
        serde_json::from_value(json!({"update_id": 5, "edited_message": {}})).expect("update");
    assert_eq!(
        harness.controller.handle_update(&update).await,
        Disposition::HandledOk
    );
    assert!(harness.messenger.sent().is_empty());
}
