//! HTTP utilities for the chat-completion backend
//!
//! Shared request/response handling for the JSON endpoints.

use crate::config::LLM_HTTP_TIMEOUT_SECS;
use crate::llm::LlmError;
use reqwest::header::HeaderMap;
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Creates an HTTP client configured with the standard LLM timeout.
#[must_use]
pub fn create_http_client() -> HttpClient {
    HttpClient::builder()
        .timeout(Duration::from_secs(LLM_HTTP_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|_| HttpClient::new())
}

/// Sends the request and turns non-success statuses into `LlmError`.
///
/// # Errors
///
/// Returns `LlmError::NetworkError` on connectivity issues, `LlmError::RateLimit`
/// on 429 and `LlmError::ApiError` on any other non-success status.
pub async fn send_checked(request: RequestBuilder) -> Result<Response, LlmError> {
    let response = request
        .send()
        .await
        .map_err(|e| LlmError::NetworkError(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let wait_secs = parse_retry_after(response.headers());
        let message = response.text().await.unwrap_or_default();
        return Err(LlmError::RateLimit { wait_secs, message });
    }

    let error_text = response.text().await.unwrap_or_default();
    Err(LlmError::ApiError(describe_error_body(status, &error_text)))
}

/// Sends a JSON request and parses the JSON response.
///
/// # Errors
///
/// Same as [`send_checked`], plus `LlmError::JsonError` if the body is not JSON.
pub async fn send_json_request(request: RequestBuilder, body: &Value) -> Result<Value, LlmError> {
    send_checked(request.json(body))
        .await?
        .json()
        .await
        .map_err(|e| LlmError::JsonError(e.to_string()))
}

fn describe_error_body(status: StatusCode, error_text: &str) -> String {
    // Nginx/proxy error pages
    let trimmed = error_text.trim_start();
    let is_html = trimmed.starts_with("<!DOCTYPE")
        || trimmed.starts_with("<html")
        || trimmed.starts_with("<HTML");

    if is_html {
        format!("{status} (Server returned HTML error page)")
    } else if error_text.chars().count() > 500 {
        let truncated: String = error_text.chars().take(500).collect();
        format!("{status} - {truncated}... (truncated)")
    } else {
        format!("{status} - {error_text}")
    }
}

/// Reads a `Retry-After` header given in whole seconds.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Extracts text content from a JSON response by navigating a path.
///
/// Numeric segments index arrays, other segments index objects.
///
/// # Errors
///
/// Returns `LlmError::ApiError` if the path is invalid or the target is not a string.
pub fn extract_text_content(response: &Value, path: &[&str]) -> Result<String, LlmError> {
    let mut current = response;

    for segment in path {
        current = if let Ok(index) = segment.parse::<usize>() {
            current.get(index).ok_or_else(|| {
                LlmError::ApiError(format!("Invalid path: missing index {index}"))
            })?
        } else {
            current.get(*segment).ok_or_else(|| {
                LlmError::ApiError(format!("Invalid path: missing key {segment}"))
            })?
        };
    }

    current
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| LlmError::ApiError(format!("Expected string at path, got: {current:?}")))
}
