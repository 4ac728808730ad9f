//! Chat-completion client
//!
//! Message types shared with the conversation context store, the
//! [`ChatCompletionClient`] seam, and the OpenAI-compatible implementation.

pub mod gemini;
mod http_utils;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use gemini::GeminiClient;

/// Errors that can occur during LLM operations
#[derive(Debug, Error)]
pub enum LlmError {
    /// Error returned by the provider's API
    #[error("API error: {0}")]
    ApiError(String),
    /// Error during network communication
    #[error("Network error: {0}")]
    NetworkError(String),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    JsonError(String),
    /// Missing provider configuration or API key
    #[error("Missing client/API key: {0}")]
    MissingConfig(String),
    /// Rate limit exceeded (429), optionally with a wait time
    #[error("Rate limit exceeded: {message} (wait: {wait_secs:?}s)")]
    RateLimit {
        /// Retry-After duration in seconds, if provided by the server
        wait_secs: Option<u64>,
        /// Error message from the server
        message: String,
    },
    /// The provider answered without any content
    #[error("Empty response from provider")]
    EmptyResponse,
}

/// Speaker of a message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model
    System,
    /// A group member
    User,
    /// The bot
    Assistant,
}

/// Image location. Inside a stored context this is a blob key, on the wire a data URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageUrl {
    /// Blob key or `data:` URL
    pub url: String,
}

/// One fragment of a multi-part message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text
    Text {
        /// The text
        text: String,
    },
    /// An image reference
    ImageUrl {
        /// Where the image lives
        image_url: ImageUrl,
    },
}

impl ContentPart {
    /// Text fragment
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Image fragment pointing at `url`
    #[must_use]
    pub fn image(url: impl Into<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }
}

/// Message body: plain text or a list of parts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Content {
    /// Plain text body
    Text(String),
    /// Multi-part body
    Parts(Vec<ContentPart>),
}

/// A message in an LLM conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Speaker
    pub role: Role,
    /// Body
    pub content: Content,
}

impl Message {
    /// Create a new system message
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self {
            role: Role::System,
            content: Content::Text(content.to_string()),
        }
    }

    /// Create a new user message
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: Content::Text(content.to_string()),
        }
    }

    /// Create a new multi-part user message
    #[must_use]
    pub const fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: Content::Parts(parts),
        }
    }

    /// Create a new assistant message
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Text(content.to_string()),
        }
    }

    /// Image URLs referenced by this message
    pub fn image_urls(&self) -> impl Iterator<Item = &str> {
        let parts: &[ContentPart] = match &self.content {
            Content::Parts(parts) => parts,
            Content::Text(_) => &[],
        };
        parts.iter().filter_map(|part| match part {
            ContentPart::ImageUrl { image_url } => Some(image_url.url.as_str()),
            ContentPart::Text { .. } => None,
        })
    }
}

/// Incremental text deltas of a streamed completion
pub type DeltaStream = BoxStream<'static, Result<String, LlmError>>;

/// Chat-completion backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatCompletionClient: Send + Sync {
    /// Single-shot completion of `messages`
    async fn complete(&self, messages: &[Message], model: &str) -> Result<String, LlmError>;

    /// Streamed completion of `messages`
    async fn complete_streaming(
        &self,
        messages: &[Message],
        model: &str,
    ) -> Result<DeltaStream, LlmError>;

    /// Web-grounded answer to `query`
    async fn search(
        &self,
        system_prompt: &str,
        query: &str,
        model: &str,
    ) -> Result<String, LlmError>;
}
