//! Configuration and settings management
//!
//! Loads settings from optional config files and environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Maximum characters per outgoing Telegram message chunk
pub const TELEGRAM_CHUNK_SIZE: usize = 4000;

/// Initial backoff for retried Telegram API calls (ms)
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Upper bound for a single Telegram API backoff step (ms)
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Attempts made for a transiently failing Telegram API call
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

/// Timeout applied to every AI HTTP request
pub const LLM_HTTP_TIMEOUT_SECS: u64 = 120;
/// Completion budget sent with every chat completion request
pub const LLM_MAX_COMPLETION_TOKENS: u32 = 8192;
/// Sampling temperature for chat completions
pub const LLM_TEMPERATURE: f32 = 0.7;

/// Largest document accepted as question material (bytes)
pub const MAX_DOCUMENT_BYTES: u64 = 1024 * 1024;

/// Minimum gap between two streaming edits of the same message
pub const STREAM_EDIT_INTERVAL: Duration = Duration::from_secs(1);

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    #[serde(default)]
    pub telegram_token: String,

    /// Bot username without the leading `@`
    #[serde(default)]
    pub bot_name: String,

    /// Numeric Telegram id of the bot account
    #[serde(default)]
    pub bot_id: i64,

    /// API key for the chat-completion backend
    pub gemini_api_key: Option<String>,

    /// Base URL of the OpenAI-compatible chat-completion endpoint
    pub openai_api_base_url: Option<String>,

    /// Base URL of the native Gemini API, used for grounded search
    #[serde(default = "default_gemini_native_base_url")]
    pub gemini_native_base_url: String,

    /// Model used for questions
    #[serde(default = "default_model")]
    pub model: String,

    /// Model used for `/search`
    #[serde(default = "default_model")]
    pub search_model: String,

    /// General question cooldown, e.g. `1.5m`
    #[serde(default = "default_cooldown_duration")]
    pub cooldown_duration: String,

    /// Search cooldown, e.g. `3m`
    #[serde(default = "default_search_cooldown_duration")]
    pub search_cooldown_duration: String,

    /// Comma-separated list of maintainer user IDs
    #[serde(rename = "maintainer_user_ids")]
    pub maintainer_user_ids_str: Option<String>,

    /// Maximum number of entries kept per conversation context
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,

    /// Delay before a cleanup task becomes ready (ms)
    #[serde(default = "default_deletion_delay_ms")]
    pub deletion_delay_ms: u64,

    /// Interval between cleanup task polls (ms)
    #[serde(default = "default_deletion_poll_interval_ms")]
    pub deletion_poll_interval_ms: u64,

    /// Upper bound on cleanup task polls before giving up
    #[serde(default = "default_deletion_max_polls")]
    pub deletion_max_polls: u32,

    /// Stream AI replies through incremental message edits
    #[serde(default)]
    pub stream_replies: bool,

    /// Fallback system prompt when none is stored
    pub system_message: Option<String>,

    /// Storage backend: `r2` or `memory`
    #[serde(default = "default_storage_backend")]
    pub storage_backend: String,

    /// R2 Storage access key ID
    pub r2_access_key_id: Option<String>,
    /// R2 Storage secret access key
    pub r2_secret_access_key: Option<String>,
    /// R2 Storage endpoint URL
    pub r2_endpoint_url: Option<String>,
    /// R2 Storage bucket name
    pub r2_bucket_name: Option<String>,

    /// Address the webhook server binds to
    #[serde(default = "default_webhook_bind_addr")]
    pub webhook_bind_addr: String,

    /// HTTP path Telegram posts updates to
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,

    /// Expected `X-Telegram-Bot-Api-Secret-Token` header value
    pub webhook_secret: Option<String>,
}

fn default_gemini_native_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_cooldown_duration() -> String {
    "1.5m".to_string()
}

fn default_search_cooldown_duration() -> String {
    "3m".to_string()
}

const fn default_max_context_length() -> usize {
    10
}

const fn default_deletion_delay_ms() -> u64 {
    3000
}

const fn default_deletion_poll_interval_ms() -> u64 {
    1000
}

const fn default_deletion_max_polls() -> u32 {
    30
}

fn default_storage_backend() -> String {
    "r2".to_string()
}

fn default_webhook_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_webhook_path() -> String {
    "/webhook".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            telegram_token: String::new(),
            bot_name: String::new(),
            bot_id: 0,
            gemini_api_key: None,
            openai_api_base_url: None,
            gemini_native_base_url: default_gemini_native_base_url(),
            model: default_model(),
            search_model: default_model(),
            cooldown_duration: default_cooldown_duration(),
            search_cooldown_duration: default_search_cooldown_duration(),
            maintainer_user_ids_str: None,
            max_context_length: default_max_context_length(),
            deletion_delay_ms: default_deletion_delay_ms(),
            deletion_poll_interval_ms: default_deletion_poll_interval_ms(),
            deletion_max_polls: default_deletion_max_polls(),
            stream_replies: false,
            system_message: None,
            storage_backend: default_storage_backend(),
            r2_access_key_id: None,
            r2_secret_access_key: None,
            r2_endpoint_url: None,
            r2_bucket_name: None,
            webhook_bind_addr: default_webhook_bind_addr(),
            webhook_path: default_webhook_path(),
            webhook_secret: None,
        }
    }
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Not checked into git
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Bare UPPER_SNAKE_CASE variables, empty values treated as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        let settings: Self = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram_token.is_empty() {
            return Err(ConfigError::Message("TELEGRAM_TOKEN is missing".into()));
        }
        if self.bot_name.is_empty() {
            return Err(ConfigError::Message("BOT_NAME is missing".into()));
        }
        if self.bot_id == 0 {
            return Err(ConfigError::Message("BOT_ID is missing".into()));
        }
        Ok(())
    }

    /// Returns the Telegram IDs that receive forwarded private messages and error reports
    #[must_use]
    pub fn maintainer_ids(&self) -> Vec<i64> {
        let mut seen = HashSet::new();
        self.maintainer_user_ids_str
            .as_deref()
            .map(|s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .filter_map(|id| id.parse::<i64>().ok())
                    .filter(|id| seen.insert(*id))
                    .collect()
            })
            .unwrap_or_default()
    }
}
