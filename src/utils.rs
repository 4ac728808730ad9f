//! Utility functions for text processing, HTML cleaning, and message formatting.
//!
//! Regex patterns are declared with `lazy_regex!`, validated at compile time
//! and initialized on first use.

// lazy_regex! uses once_cell internally
#![allow(clippy::non_std_lazy_statics)]

use crate::config::{
    TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
};
use lazy_regex::lazy_regex;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

/// Match code blocks: ```...```
static RE_CODE_BLOCK: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"```[\s\S]*?```");

/// Match code blocks with optional language: ```language\ncode```
static RE_CODE_BLOCK_FENCE: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"```(\w+)?\n([\s\S]*?)```");

/// Match bullet points at start of line: *
static RE_BULLET: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?m)^\* ");

/// Match bold text: **text**
static RE_BOLD: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\*\*(.*?)\*\*");

/// Match italic text: *text*
static RE_ITALIC: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\*(.*?)\*");

/// Match inline code: `code`
static RE_INLINE_CODE: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"`(.*?)`");

/// Match 3+ consecutive newlines
static RE_MULTI_NEWLINE: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\n{3,}");

/// Characters MarkdownV2 requires to be escaped
const MARKDOWN_V2_SPECIAL: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!', '\\',
];

/// Replace naked angle brackets with HTML entities, preserving Telegram-allowed HTML tags.
fn escape_angle_brackets(text: &str) -> String {
    const TELEGRAM_ALLOWED_TAGS: &[&str] = &[
        "b", "i", "u", "s", "code", "pre", "a", "/b", "/i", "/u", "/s", "/code", "/pre", "/a",
    ];

    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_tag = false;

    while let Some(c) = chars.next() {
        match c {
            '<' => {
                let mut tag_name = String::new();
                if let Some(slash) = chars.next_if_eq(&'/') {
                    tag_name.push(slash);
                }
                while let Some(next_char) = chars.next_if(char::is_ascii_alphanumeric) {
                    tag_name.push(next_char);
                }

                if !tag_name.is_empty() && TELEGRAM_ALLOWED_TAGS.contains(&tag_name.as_str()) {
                    result.push('<');
                    in_tag = true;
                } else {
                    result.push_str("&lt;");
                }
                result.push_str(&tag_name);
            }
            '>' if in_tag => {
                result.push(c);
                in_tag = false;
            }
            '>' => result.push_str("&gt;"),
            _ => result.push(c),
        }
    }
    result
}

/// Cleans HTML content by escaping naked angle brackets while preserving code blocks and valid HTML tags.
///
/// # Examples
///
/// ```
/// use group_assistant::utils::clean_html;
/// let cleaned = clean_html("Check this: 1 < 2 but <b>bold</b> works");
/// assert_eq!(cleaned, "Check this: 1 &lt; 2 but <b>bold</b> works");
/// ```
#[must_use]
pub fn clean_html(text: &str) -> String {
    // UUID placeholders so user text cannot collide with them
    let mut code_blocks: Vec<(String, String)> = Vec::new();
    let mut result = String::with_capacity(text.len());
    let mut last_end = 0;
    for mat in RE_CODE_BLOCK.find_iter(text) {
        result.push_str(&text[last_end..mat.start()]);
        let placeholder = format!("__CODE_BLOCK_{}__", Uuid::new_v4().as_simple());
        code_blocks.push((placeholder.clone(), mat.as_str().to_string()));
        result.push_str(&placeholder);
        last_end = mat.end();
    }
    result.push_str(&text[last_end..]);

    let mut cleaned = escape_angle_brackets(&result);
    for (placeholder, block) in code_blocks {
        cleaned = cleaned.replace(&placeholder, &block);
    }
    cleaned
}

/// Formats model Markdown into Telegram-compatible HTML.
///
/// Supported formatting:
/// - Code blocks with optional language
/// - `* ` bullets at line start
/// - `**bold**`, `*italic*` and `` `inline code` ``
///
/// Three or more consecutive newlines collapse into two.
///
/// # Examples
///
/// ```
/// use group_assistant::utils::format_text;
/// let formatted = format_text("**Bold** and *italic* with `code`");
/// assert_eq!(formatted, "<b>Bold</b> and <i>italic</i> with <code>code</code>");
/// ```
#[must_use]
pub fn format_text(text: &str) -> String {
    let mut formatted = clean_html(text);

    formatted = RE_CODE_BLOCK_FENCE
        .replace_all(&formatted, |caps: &regex::Captures| {
            let lang = caps.get(1).map_or("", |m| m.as_str());
            let code = caps.get(2).map_or("", |m| m.as_str()).trim();
            let escaped_code = html_escape::encode_text(code);
            format!("<pre><code class=\"{lang}\">{escaped_code}</code></pre>")
        })
        .to_string();

    formatted = RE_BULLET.replace_all(&formatted, "• ").to_string();
    formatted = RE_BOLD.replace_all(&formatted, "<b>$1</b>").to_string();
    formatted = RE_ITALIC.replace_all(&formatted, "<i>$1</i>").to_string();
    formatted = RE_INLINE_CODE
        .replace_all(&formatted, |caps: &regex::Captures| {
            let code = caps.get(1).map_or("", |m| m.as_str());
            format!("<code>{}</code>", html_escape::encode_text(code))
        })
        .to_string();
    formatted = RE_MULTI_NEWLINE
        .replace_all(&formatted, "\n\n")
        .to_string();

    formatted.trim().to_string()
}

/// Escapes every MarkdownV2 control character so the text renders literally.
///
/// # Examples
///
/// ```
/// use group_assistant::utils::escape_markdown_v2;
/// assert_eq!(escape_markdown_v2("1.5 * 2 = 3!"), r"1\.5 \* 2 \= 3\!");
/// ```
#[must_use]
pub fn escape_markdown_v2(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + text.len() / 8);
    for c in text.chars() {
        if MARKDOWN_V2_SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Removes every case-insensitive `@bot_name` mention and trims the result.
///
/// # Examples
///
/// ```
/// use group_assistant::utils::strip_bot_mention;
/// assert_eq!(strip_bot_mention("@Helper_Bot what is rust?", "helper_bot"), "what is rust?");
/// ```
#[must_use]
pub fn strip_bot_mention(text: &str, bot_name: &str) -> String {
    let pattern = format!("@{}", regex::escape(bot_name));
    match regex::RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
    {
        Ok(re) => re.replace_all(text, "").trim().to_string(),
        Err(e) => {
            warn!(error = %e, "Failed to build mention pattern");
            text.trim().to_string()
        }
    }
}

/// Splits a long message into parts that fit within Telegram's message limit.
///
/// Code fences are closed at a split and reopened in the next part. A single
/// line longer than `max_length` is split on grapheme boundaries.
///
/// # Examples
///
/// ```
/// use group_assistant::utils::split_long_message;
/// let long_msg = "A very long message...\n".repeat(300);
/// let parts = split_long_message(&long_msg, 4000);
/// assert!(parts.len() > 1);
/// ```
#[must_use]
pub fn split_long_message(message: &str, max_length: usize) -> Vec<String> {
    if message.is_empty() {
        return Vec::new();
    }
    if message.len() <= max_length {
        return vec![message.to_string()];
    }

    let mut splitter = Splitter::new(max_length);
    for line in message.lines() {
        if line.len() > max_length {
            splitter.push_oversized_line(line);
        } else {
            splitter.push_line(line);
        }
    }
    splitter.finish()
}

const CODE_FENCE: &str = "```";

struct Splitter {
    max_length: usize,
    parts: Vec<String>,
    current: String,
    in_code_block: bool,
}

impl Splitter {
    const fn new(max_length: usize) -> Self {
        Self {
            max_length,
            parts: Vec::new(),
            current: String::new(),
            in_code_block: false,
        }
    }

    fn flush(&mut self) {
        if self.current.is_empty() {
            return;
        }
        if self.in_code_block {
            self.current.push_str(CODE_FENCE);
            self.current.push('\n');
        }
        self.parts.push(self.current.trim_end().to_string());
        self.current.clear();
        if self.in_code_block {
            self.current.push_str(CODE_FENCE);
            self.current.push('\n');
        }
    }

    fn push_oversized_line(&mut self, line: &str) {
        self.flush();
        let mut chunk = String::new();
        for grapheme in line.graphemes(true) {
            if chunk.len() + grapheme.len() > self.max_length {
                self.parts.push(chunk.trim_end().to_string());
                chunk.clear();
            }
            chunk.push_str(grapheme);
        }
        if !chunk.is_empty() {
            self.current.push_str(&chunk);
            self.current.push('\n');
        }
    }

    fn push_line(&mut self, line: &str) {
        let is_fence = line.starts_with(CODE_FENCE);
        if is_fence {
            self.in_code_block = !self.in_code_block;
        }
        // +1 for newline
        if self.current.len() + line.len() + 1 > self.max_length && !self.current.is_empty() {
            self.flush();
            if self.in_code_block && is_fence {
                return;
            }
        }
        self.current.push_str(line);
        self.current.push('\n');
    }

    fn finish(mut self) -> Vec<String> {
        if !self.current.is_empty() {
            if self.in_code_block {
                self.current.push_str(CODE_FENCE);
                self.current.push('\n');
            }
            self.parts.push(self.current.trim_end().to_string());
        }
        self.parts
    }
}

/// Safely truncates a string to a maximum character length (not bytes).
///
/// # Examples
///
/// ```
/// use group_assistant::utils::truncate_str;
/// assert_eq!(truncate_str("Привет, мир!", 6), "Привет");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Retry a Telegram API operation with exponential backoff.
///
/// Only errors for which `should_retry` returns true are retried, with
/// jittered backoff from `TELEGRAM_API_INITIAL_BACKOFF_MS` up to
/// `TELEGRAM_API_MAX_BACKOFF_MS`, at most `TELEGRAM_API_MAX_RETRIES` times.
///
/// # Errors
///
/// Returns the last error once retries are exhausted or a non-retryable
/// error occurs.
pub async fn retry_telegram_operation<F, Fut, T, E, C>(operation: F, should_retry: C) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    C: FnMut(&E) -> bool,
    E: std::fmt::Display,
{
    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES);

    RetryIf::spawn(retry_strategy, operation, should_retry)
        .await
        .inspect_err(|e| warn!("Telegram API operation failed: {}", e))
}
