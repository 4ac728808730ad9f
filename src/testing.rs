//! Testing helpers: recording and scripted fakes for the outbound seams.
//!
//! Unlike `mockall` mocks these keep state, so end-to-end tests can drive a
//! whole update through the dispatcher and inspect what happened afterwards.

use crate::bot::messenger::{FormatMode, Messenger, MessengerError, SentMessage};
use crate::llm::{ChatCompletionClient, DeltaStream, LlmError, Message};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// One outbound `send`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentText {
    pub chat_id: i64,
    pub message_id: i32,
    pub text: String,
    pub reply_to: Option<i32>,
    pub format: FormatMode,
}

#[derive(Default)]
struct Recorded {
    next_id: i32,
    sent: Vec<SentText>,
    edits: Vec<(i64, i32, String)>,
    deleted: Vec<(i64, i32)>,
    forwarded: Vec<(i64, i64, i32)>,
    menus: Vec<i64>,
}

/// Messenger that records every call and answers from a script
#[derive(Default)]
pub struct RecordingMessenger {
    recorded: Mutex<Recorded>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    reject_html: bool,
    reject_all: bool,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every HTML send fails, as with unbalanced markup
    pub fn rejecting_html() -> Self {
        Self {
            reject_html: true,
            ..Self::default()
        }
    }

    /// Every send to a non-maintainer chat fails
    pub fn rejecting_all() -> Self {
        Self {
            reject_all: true,
            ..Self::default()
        }
    }

    pub fn with_file(self, file_id: &str, bytes: &[u8]) -> Self {
        self.files
            .lock()
            .expect("files lock")
            .insert(file_id.to_string(), bytes.to_vec());
        self
    }

    pub fn sent(&self) -> Vec<SentText> {
        self.recorded.lock().expect("recorded lock").sent.clone()
    }

    pub fn sent_to(&self, chat_id: i64) -> Vec<SentText> {
        self.sent()
            .into_iter()
            .filter(|sent| sent.chat_id == chat_id)
            .collect()
    }

    pub fn edits(&self) -> Vec<(i64, i32, String)> {
        self.recorded.lock().expect("recorded lock").edits.clone()
    }

    pub fn deleted(&self) -> Vec<(i64, i32)> {
        self.recorded.lock().expect("recorded lock").deleted.clone()
    }

    pub fn forwarded(&self) -> Vec<(i64, i64, i32)> {
        self.recorded.lock().expect("recorded lock").forwarded.clone()
    }

    pub fn menus(&self) -> Vec<i64> {
        self.recorded.lock().expect("recorded lock").menus.clone()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i32>,
        format: FormatMode,
    ) -> Result<SentMessage, MessengerError> {
        let personal = chat_id > 0 && format == FormatMode::Plain;
        if (self.reject_all && !personal) || (self.reject_html && format == FormatMode::Html) {
            return Err(MessengerError::Api("Bad Request: can't parse entities".into()));
        }
        let mut recorded = self.recorded.lock().expect("recorded lock");
        recorded.next_id += 1;
        let message_id = 1000 + recorded.next_id;
        recorded.sent.push(SentText {
            chat_id,
            message_id,
            text: text.to_string(),
            reply_to,
            format,
        });
        Ok(SentMessage { message_id })
    }

    async fn edit(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        _format: FormatMode,
    ) -> Result<(), MessengerError> {
        self.recorded
            .lock()
            .expect("recorded lock")
            .edits
            .push((chat_id, message_id, text.to_string()));
        Ok(())
    }

    async fn delete(&self, chat_id: i64, message_id: i32) -> Result<(), MessengerError> {
        self.recorded
            .lock()
            .expect("recorded lock")
            .deleted
            .push((chat_id, message_id));
        Ok(())
    }

    async fn forward(
        &self,
        target_chat_id: i64,
        source_chat_id: i64,
        message_id: i32,
    ) -> Result<(), MessengerError> {
        self.recorded
            .lock()
            .expect("recorded lock")
            .forwarded
            .push((target_chat_id, source_chat_id, message_id));
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, MessengerError> {
        self.files
            .lock()
            .expect("files lock")
            .get(file_id)
            .cloned()
            .ok_or_else(|| MessengerError::Download(format!("no such file: {file_id}")))
    }

    async fn set_commands(
        &self,
        chat_id: i64,
        _commands: Vec<(String, String)>,
    ) -> Result<(), MessengerError> {
        self.recorded
            .lock()
            .expect("recorded lock")
            .menus
            .push(chat_id);
        Ok(())
    }
}

/// Chat-completion fake answering from a queue and recording its inputs
#[derive(Default)]
pub struct ScriptedAi {
    answers: Mutex<VecDeque<Result<String, LlmError>>>,
    completions: Mutex<Vec<Vec<Message>>>,
    searches: Mutex<Vec<String>>,
}

impl ScriptedAi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answering(answers: impl IntoIterator<Item = Result<String, LlmError>>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn completions(&self) -> Vec<Vec<Message>> {
        self.completions.lock().expect("completions lock").clone()
    }

    pub fn searches(&self) -> Vec<String> {
        self.searches.lock().expect("searches lock").clone()
    }

    fn next_answer(&self) -> Result<String, LlmError> {
        self.answers
            .lock()
            .expect("answers lock")
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyResponse))
    }
}

#[async_trait]
impl ChatCompletionClient for ScriptedAi {
    async fn complete(&self, messages: &[Message], _model: &str) -> Result<String, LlmError> {
        self.completions
            .lock()
            .expect("completions lock")
            .push(messages.to_vec());
        self.next_answer()
    }

    async fn complete_streaming(
        &self,
        messages: &[Message],
        _model: &str,
    ) -> Result<DeltaStream, LlmError> {
        self.completions
            .lock()
            .expect("completions lock")
            .push(messages.to_vec());
        let answer = self.next_answer()?;
        let deltas: Vec<Result<String, LlmError>> = answer
            .split_inclusive(' ')
            .map(|word| Ok(word.to_string()))
            .collect();
        Ok(stream::iter(deltas).boxed())
    }

    async fn search(
        &self,
        _system_prompt: &str,
        query: &str,
        _model: &str,
    ) -> Result<String, LlmError> {
        self.searches
            .lock()
            .expect("searches lock")
            .push(query.to_string());
        self.next_answer()
    }
}
