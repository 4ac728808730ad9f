//! Gemini access through its OpenAI-compatible endpoint, plus native
//! `generateContent` for Google-search grounded answers.

use super::http_utils::{self, extract_text_content, send_checked, send_json_request};
use super::{ChatCompletionClient, DeltaStream, LlmError, Message};
use crate::config::{Settings, LLM_MAX_COMPLETION_TOKENS, LLM_TEMPERATURE};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::{future, StreamExt};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// Chat-completion client for Gemini
pub struct GeminiClient {
    http_client: HttpClient,
    api_key: Option<String>,
    base_url: Option<String>,
    native_base_url: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

impl GeminiClient {
    /// Create a client from settings. Missing credentials surface on first use.
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        Self {
            http_client: http_utils::create_http_client(),
            api_key: settings.gemini_api_key.clone().filter(|k| !k.is_empty()),
            base_url: settings.openai_api_base_url.clone().filter(|u| !u.is_empty()),
            native_base_url: settings.gemini_native_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn api_key(&self) -> Result<&str, LlmError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| LlmError::MissingConfig("GEMINI_API_KEY is missing".into()))
    }

    fn completions_url(&self) -> Result<String, LlmError> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| LlmError::MissingConfig("OPENAI_API_BASE_URL is missing".into()))?
            .trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            Ok(base.to_string())
        } else {
            Ok(format!("{base}/chat/completions"))
        }
    }

    fn completion_body(messages: &[Message], model: &str, stream: bool) -> Value {
        json!({
            "model": model,
            "messages": messages,
            "max_completion_tokens": LLM_MAX_COMPLETION_TOKENS,
            "temperature": LLM_TEMPERATURE,
            "n": 1,
            "stream": stream,
        })
    }

    fn parse_stream_event(data: &str) -> Option<Result<String, LlmError>> {
        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content)
                .filter(|delta| !delta.is_empty())
                .map(Ok),
            Err(e) => Some(Err(LlmError::JsonError(format!(
                "Failed to parse event data: {e}"
            )))),
        }
    }
}

fn non_empty(text: String) -> Result<String, LlmError> {
    if text.trim().is_empty() {
        Err(LlmError::EmptyResponse)
    } else {
        Ok(text)
    }
}

#[async_trait]
impl ChatCompletionClient for GeminiClient {
    async fn complete(&self, messages: &[Message], model: &str) -> Result<String, LlmError> {
        let url = self.completions_url()?;
        let api_key = self.api_key()?;
        debug!(model, messages = messages.len(), "Requesting chat completion");

        let body = Self::completion_body(messages, model, false);
        let request = self.http_client.post(&url).bearer_auth(api_key);
        let response = send_json_request(request, &body).await?;

        match extract_text_content(&response, &["choices", "0", "message", "content"]) {
            Ok(text) => non_empty(text),
            Err(_) => Err(LlmError::EmptyResponse),
        }
    }

    async fn complete_streaming(
        &self,
        messages: &[Message],
        model: &str,
    ) -> Result<DeltaStream, LlmError> {
        let url = self.completions_url()?;
        let api_key = self.api_key()?;
        debug!(model, messages = messages.len(), "Requesting streamed chat completion");

        let body = Self::completion_body(messages, model, true);
        let response = send_checked(self.http_client.post(&url).bearer_auth(api_key).json(&body)).await?;

        let deltas = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                future::ready(!matches!(event, Ok(e) if e.data.trim() == "[DONE]"))
            })
            .filter_map(|event| {
                future::ready(match event {
                    Ok(e) => Self::parse_stream_event(&e.data),
                    Err(e) => Some(Err(LlmError::NetworkError(format!("SSE stream error: {e}")))),
                })
            });
        Ok(deltas.boxed())
    }

    async fn search(
        &self,
        system_prompt: &str,
        query: &str,
        model: &str,
    ) -> Result<String, LlmError> {
        let api_key = self.api_key()?;
        let url = format!("{}/models/{model}:generateContent", self.native_base_url);
        debug!(model, "Requesting grounded search answer");

        let body = json!({
            "system_instruction": { "parts": [{ "text": system_prompt }] },
            "contents": [{ "role": "user", "parts": [{ "text": query }] }],
            "tools": [{ "google_search": {} }],
            "generationConfig": {
                "temperature": LLM_TEMPERATURE,
                "maxOutputTokens": LLM_MAX_COMPLETION_TOKENS,
            },
        });
        let request = self.http_client.post(&url).header("x-goog-api-key", api_key);
        let response = send_json_request(request, &body).await?;

        match extract_text_content(&response, &["candidates", "0", "content", "parts", "0", "text"]) {
            Ok(text) => non_empty(text),
            Err(_) => Err(LlmError::EmptyResponse),
        }
    }
}
