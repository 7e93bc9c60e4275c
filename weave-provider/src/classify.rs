//! HTTP failure classification shared by every adapter.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use std::time::Duration;
use weave_core::error::WeaveError;
use weave_core::types::Credential;

/// Body fragments providers use when refusing content with a 400.
const CONTENT_POLICY_MARKERS: &[&str] = &[
    "content_filter",
    "content_policy",
    "content policy",
    "content management policy",
    "data_inspection_failed",
    "inappropriate content",
    "safety system",
    "sensitive content",
];

/// Pass successful responses through; turn anything else into a classified error.
///
/// The error message carries the provider's own explanation, with
/// `credential` masked wherever it appears.
pub async fn check_status(
    response: Response,
    provider: &str,
    credential: &Credential,
) -> Result<Response, WeaveError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    let message = credential.redact(&format!("{} {}: {}", provider, status, error_message(&body)));

    Err(classify_status(status, message, retry_after))
}

/// Map an HTTP status (plus the provider's message) to the error taxonomy.
pub fn classify_status(
    status: StatusCode,
    message: String,
    retry_after: Option<Duration>,
) -> WeaveError {
    match status.as_u16() {
        401 | 403 => WeaveError::authentication(message),
        404 => WeaveError::model_not_found(message),
        408 => WeaveError::timeout(message),
        429 => WeaveError::rate_limit(message, retry_after),
        400 if mentions_content_policy(&message) => WeaveError::content_policy(message),
        code if status.is_server_error() => WeaveError::server(code, message),
        _ => WeaveError::invalid_request(message),
    }
}

/// Map a transport-level failure, keeping timeouts distinguishable.
pub fn transport_error(err: reqwest::Error) -> WeaveError {
    if err.is_timeout() {
        WeaveError::timeout(err.to_string())
    } else {
        WeaveError::Network(err)
    }
}

/// Map a failure while reading or decoding a response body.
///
/// A complete body that does not parse is a provider fault; a body cut
/// short by the connection goes through [`transport_error`].
pub fn body_error(provider: &str, err: reqwest::Error) -> WeaveError {
    if err.is_decode() {
        WeaveError::provider(format!("{}: malformed response: {}", provider, err))
    } else {
        transport_error(err)
    }
}

pub fn mentions_content_policy(text: &str) -> bool {
    let lower = text.to_lowercase();
    CONTENT_POLICY_MARKERS.iter().any(|m| lower.contains(m))
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let secs = value.parse::<f64>().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

/// Best-effort extraction of the human readable part of an error body.
///
/// Understands `{"error": {"message": ..}}`, `{"error": ".."}`,
/// `{"message": ..}` and `{"error_msg": ..}`; anything else is returned
/// trimmed and truncated.
pub fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let found = value
            .pointer("/error/message")
            .or_else(|| value.get("error"))
            .or_else(|| value.get("message"))
            .or_else(|| value.get("error_msg"))
            .and_then(|v| v.as_str());
        if let Some(message) = found {
            return message.to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.chars().count() > 300 {
        let head: String = trimmed.chars().take(300).collect();
        format!("{}...", head)
    } else {
        trimmed.to_string()
    }
}
