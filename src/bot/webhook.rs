//! HTTP surface receiving Telegram webhook calls.

use crate::bot::dispatch::{DispatchController, Disposition};
use crate::bot::update::Update;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::{debug, info, warn};

const TELEGRAM_WEBHOOK_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Shared state of the webhook routes
#[derive(Clone)]
pub struct WebhookState {
    /// Handles parsed updates
    pub controller: Arc<DispatchController>,
    /// Expected value of the secret-token header, if any
    pub secret_token: Option<String>,
}

fn validate_secret_token(
    headers: &HeaderMap,
    expected_secret: Option<&str>,
) -> Result<(), (StatusCode, String)> {
    let Some(expected) = expected_secret.filter(|secret| !secret.is_empty()) else {
        return Ok(());
    };
    let provided = headers
        .get(TELEGRAM_WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if provided == expected {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            "invalid telegram webhook secret token".to_string(),
        ))
    }
}

/// Makes sure the route path starts with `/`
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

async fn telegram_webhook_handler(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Json(update): Json<serde_json::Value>,
) -> Result<StatusCode, (StatusCode, String)> {
    validate_secret_token(&headers, state.secret_token.as_deref())?;

    let update_id = update.get("update_id").and_then(serde_json::Value::as_i64);
    let update: Update = match serde_json::from_value(update) {
        Ok(update) => update,
        Err(e) => {
            // Telegram would redeliver a non-2xx answer forever
            warn!(update_id = ?update_id, error = %e, "Unparsable update acknowledged");
            return Ok(StatusCode::OK);
        }
    };

    debug!(update_id = update.update_id, "Webhook received Telegram update");
    let disposition = state.controller.handle_update(&update).await;
    if disposition != Disposition::HandledOk {
        info!(update_id = update.update_id, ?disposition, "Update finished");
    }
    Ok(StatusCode::OK)
}

/// Router serving the webhook on `path` and a `/health` probe
pub fn router(state: WebhookState, path: &str) -> Router {
    Router::new()
        .route(&normalize_path(path), post(telegram_webhook_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_secret_token_validation() {
        let mut headers = HeaderMap::new();
        assert!(validate_secret_token(&headers, None).is_ok());
        assert!(validate_secret_token(&headers, Some("")).is_ok());

        let err = validate_secret_token(&headers, Some("s3cret")).expect_err("missing header");
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);

        headers.insert(
            TELEGRAM_WEBHOOK_SECRET_HEADER,
            HeaderValue::from_static("s3cret"),
        );
        assert!(validate_secret_token(&headers, Some("s3cret")).is_ok());
        assert!(validate_secret_token(&headers, Some("other")).is_err());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("webhook"), "/webhook");
        assert_eq!(normalize_path("/tg/hook "), "/tg/hook");
    }
}
