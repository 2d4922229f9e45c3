//! Cross-provider error taxonomy.
//!
//! [`normalize`] turns whatever a provider (or the network) produced into a
//! [`CanonicalError`]. The match order is fixed: an OpenAI-style body and a
//! Google-style body both look like `{"error": {"message": ...}}`, so the
//! provider-specific reading always runs before the generic one.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::canonical::CanonicalResponse;
use crate::providers::ProviderKind;

const FALLBACK_MESSAGE: &str = "An unexpected error occurred";
const MAX_BODY_IN_MESSAGE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidRequestError,
    AuthenticationError,
    PermissionError,
    NotFoundError,
    RateLimitError,
    ApiError,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequestError => "invalid_request_error",
            Self::AuthenticationError => "authentication_error",
            Self::PermissionError => "permission_error",
            Self::NotFoundError => "not_found_error",
            Self::RateLimitError => "rate_limit_error",
            Self::ApiError => "api_error",
        }
    }

    /// HTTP status used when the failure arrived without one (e.g. mid-stream).
    pub fn default_status(self) -> u16 {
        match self {
            Self::InvalidRequestError => 400,
            Self::AuthenticationError => 401,
            Self::PermissionError => 403,
            Self::NotFoundError => 404,
            Self::RateLimitError => 429,
            Self::ApiError => 500,
        }
    }

    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::AuthenticationError,
            403 => Self::PermissionError,
            404 => Self::NotFoundError,
            429 => Self::RateLimitError,
            400..=499 => Self::InvalidRequestError,
            _ => Self::ApiError,
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{error_type}: {message}")]
pub struct CanonicalError {
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub message: String,
    pub code: Option<String>,
    pub param: Option<String>,
    pub status: u16,
    pub provider: String,
}

impl CanonicalError {
    pub fn new(
        error_type: ErrorType,
        message: impl Into<String>,
        status: u16,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            error_type,
            message: message.into(),
            code: None,
            param: None,
            status,
            provider: provider.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>, provider: impl Into<String>) -> Self {
        Self::new(ErrorType::InvalidRequestError, message, 400, provider)
    }

    pub fn api_error(message: impl Into<String>, provider: impl Into<String>) -> Self {
        Self::new(ErrorType::ApiError, message, 500, provider)
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }

    /// Represent this failure as a `status=failed` response.
    pub fn into_response(self, model: impl Into<String>) -> CanonicalResponse {
        CanonicalResponse::failed(self, model)
    }
}

/// Failure classes below the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    ConnectionRefused,
    Dns,
    Timeout,
    Other,
}

impl TransportFailure {
    fn code(self) -> Option<&'static str> {
        match self {
            Self::ConnectionRefused => Some("ECONNREFUSED"),
            Self::Dns => Some("ENOTFOUND"),
            Self::Timeout => Some("ETIMEDOUT"),
            Self::Other => None,
        }
    }
}

/// Everything the normalizer knows how to read.
#[derive(Debug, Clone)]
pub enum RawError {
    Canonical(CanonicalError),
    /// A non-success HTTP response; `body` may be empty or not JSON.
    Http { status: u16, body: String },
    /// An error object delivered inside a stream, with no HTTP status of its own.
    Payload(Value),
    Transport {
        failure: TransportFailure,
        code: Option<String>,
        message: String,
    },
    Message(String),
    Unknown,
}

impl From<CanonicalError> for RawError {
    fn from(err: CanonicalError) -> Self {
        Self::Canonical(err)
    }
}

impl From<reqwest::Error> for RawError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::Http {
                status: status.as_u16(),
                body: String::new(),
            };
        }

        let failure = if err.is_timeout() {
            TransportFailure::Timeout
        } else if err.is_connect() {
            if looks_like_dns_failure(&err) {
                TransportFailure::Dns
            } else {
                TransportFailure::ConnectionRefused
            }
        } else if err.is_decode() || err.is_body() {
            return Self::Message(err.to_string());
        } else {
            TransportFailure::Other
        };

        Self::Transport {
            failure,
            code: failure.code().map(str::to_string),
            message: err.to_string(),
        }
    }
}

fn looks_like_dns_failure(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        let text = e.to_string().to_ascii_lowercase();
        if text.contains("dns") || text.contains("lookup") || text.contains("resolve") {
            return true;
        }
        current = e.source();
    }
    false
}

/// Map any raw failure into the canonical taxonomy. First match wins.
pub fn normalize(raw: RawError, provider: ProviderKind) -> CanonicalError {
    let provider_name = provider.as_str();
    match raw {
        RawError::Canonical(err) => err,
        RawError::Http { status, body } => {
            let parsed = serde_json::from_str::<Value>(&body).ok();
            if let Some(ref json) = parsed {
                if let Some(err) = provider_specific(provider, json, Some(status)) {
                    return err;
                }
                if let Some(err) = generic_error_object(provider, json, Some(status)) {
                    return err;
                }
            }
            let trimmed = body.trim();
            let message = if trimmed.is_empty() {
                format!("Provider returned status {status}")
            } else {
                format!("Provider returned status {status}: {}", truncate(trimmed, MAX_BODY_IN_MESSAGE))
            };
            CanonicalError::new(ErrorType::from_status(status), message, status, provider_name)
        }
        RawError::Payload(json) => provider_specific(provider, &json, None)
            .or_else(|| generic_error_object(provider, &json, None))
            .unwrap_or_else(|| {
                let message = json
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or(FALLBACK_MESSAGE);
                CanonicalError::api_error(message, provider_name)
            }),
        RawError::Transport {
            failure: _,
            code,
            message,
        } => {
            let mut err = CanonicalError::api_error(message, provider_name);
            err.code = code;
            err
        }
        RawError::Message(message) if !message.trim().is_empty() => {
            CanonicalError::api_error(message, provider_name)
        }
        RawError::Message(_) | RawError::Unknown => {
            CanonicalError::api_error(FALLBACK_MESSAGE, provider_name)
        }
    }
}

/// Provider-native error bodies carrying a nested type/status string.
fn provider_specific(
    provider: ProviderKind,
    json: &Value,
    status: Option<u16>,
) -> Option<CanonicalError> {
    match provider {
        ProviderKind::OpenAi => {
            let error = json.get("error")?.as_object()?;
            let provider_type = error
                .get("type")
                .and_then(Value::as_str)
                .or_else(|| error.get("code").and_then(Value::as_str))?;
            let message = error.get("message").and_then(Value::as_str)?;
            let mut err = typed_error(provider, provider_type, message, status);
            err.code = error.get("code").and_then(value_to_string);
            err.param = error.get("param").and_then(value_to_string);
            Some(err)
        }
        ProviderKind::Anthropic => {
            if json.get("type").and_then(Value::as_str) != Some("error") {
                return None;
            }
            let error = json.get("error")?;
            let provider_type = error.get("type").and_then(Value::as_str)?;
            let message = error.get("message").and_then(Value::as_str)?;
            let mut err = typed_error(provider, provider_type, message, status);
            err.code = Some(provider_type.to_string());
            Some(err)
        }
        ProviderKind::Google => {
            // Google sometimes wraps the error object in a one-element array
            let root = json.as_array().and_then(|a| a.first()).unwrap_or(json);
            let error = root.get("error")?;
            let provider_status = error.get("status").and_then(Value::as_str)?;
            let message = error.get("message").and_then(Value::as_str)?;
            let http_status = status.or_else(|| {
                error
                    .get("code")
                    .and_then(Value::as_u64)
                    .and_then(|c| u16::try_from(c).ok())
            });
            let mut err = typed_error(provider, provider_status, message, http_status);
            err.code = Some(provider_status.to_string());
            Some(err)
        }
        // Ollama reports `{"error": "<text>"}` only; the generic reader handles it.
        ProviderKind::Ollama => None,
    }
}

/// Any body with an `error` object or string, typed by HTTP status.
fn generic_error_object(
    provider: ProviderKind,
    json: &Value,
    status: Option<u16>,
) -> Option<CanonicalError> {
    let error = json.get("error")?;
    let (message, code, param) = match error {
        Value::String(text) => (text.clone(), None, None),
        Value::Object(obj) => (
            obj.get("message")
                .and_then(Value::as_str)
                .unwrap_or(FALLBACK_MESSAGE)
                .to_string(),
            obj.get("code").and_then(value_to_string),
            obj.get("param").and_then(value_to_string),
        ),
        _ => return None,
    };
    let status = status.unwrap_or(500);
    let mut err = CanonicalError::new(
        ErrorType::from_status(status),
        message,
        status,
        provider.as_str(),
    );
    err.code = code;
    err.param = param;
    Some(err)
}

fn typed_error(
    provider: ProviderKind,
    provider_type: &str,
    message: &str,
    status: Option<u16>,
) -> CanonicalError {
    let error_type = lookup_provider_type(provider_type)
        .or_else(|| status.map(ErrorType::from_status))
        .unwrap_or(ErrorType::ApiError);
    let status = status.unwrap_or_else(|| error_type.default_status());
    CanonicalError::new(error_type, message, status, provider.as_str())
}

/// Fixed table of provider type strings. Unknown strings fall back to the status.
fn lookup_provider_type(provider_type: &str) -> Option<ErrorType> {
    let error_type = match provider_type.to_ascii_lowercase().as_str() {
        "invalid_request_error" | "invalid_argument" | "failed_precondition" | "out_of_range"
        | "request_too_large" | "context_length_exceeded" => ErrorType::InvalidRequestError,
        "authentication_error" | "invalid_api_key" | "unauthenticated" => {
            ErrorType::AuthenticationError
        }
        "permission_error" | "permission_denied" => ErrorType::PermissionError,
        "not_found_error" | "not_found" | "model_not_found" => ErrorType::NotFoundError,
        "rate_limit_error" | "rate_limit_exceeded" | "insufficient_quota" | "resource_exhausted"
        | "tokens" | "requests" => ErrorType::RateLimitError,
        "api_error" | "server_error" | "internal_error" | "overloaded_error" | "internal"
        | "unavailable" | "deadline_exceeded" => ErrorType::ApiError,
        _ => return None,
    };
    Some(error_type)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::canonical::ResponseStatus;

    fn http(status: u16, body: &str) -> RawError {
        RawError::Http {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_429_without_body_is_rate_limit() {
        let err = normalize(http(429, ""), ProviderKind::OpenAi);
        assert_eq!(err.error_type, ErrorType::RateLimitError);
        assert_eq!(err.status, 429);
        assert_eq!(err.provider, "openai");
    }

    #[test]
    fn test_404_with_garbage_body_is_not_found() {
        let err = normalize(http(404, "<html>nope</html>"), ProviderKind::Anthropic);
        assert_eq!(err.error_type, ErrorType::NotFoundError);
        assert_eq!(err.status, 404);
        assert!(err.message.contains("<html>nope</html>"));
    }

    #[test]
    fn test_canonical_passthrough() {
        let original = CanonicalError::invalid_request("bad tool", "google").with_param("tools");
        let err = normalize(RawError::Canonical(original.clone()), ProviderKind::OpenAi);
        assert_eq!(err, original);
    }

    #[test]
    fn test_openai_body() {
        let body = r#"{"error":{"message":"Rate limit reached","type":"requests","param":null,"code":"rate_limit_exceeded"}}"#;
        let err = normalize(http(429, body), ProviderKind::OpenAi);
        assert_eq!(err.error_type, ErrorType::RateLimitError);
        assert_eq!(err.message, "Rate limit reached");
        assert_eq!(err.code.as_deref(), Some("rate_limit_exceeded"));
        assert_eq!(err.param, None);
    }

    #[test]
    fn test_anthropic_body() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let err = normalize(http(529, body), ProviderKind::Anthropic);
        assert_eq!(err.error_type, ErrorType::ApiError);
        assert_eq!(err.status, 529);
        assert_eq!(err.message, "Overloaded");
    }

    #[test]
    fn test_unknown_provider_type_falls_back_to_status() {
        let body = r#"{"type":"error","error":{"type":"brand_new_error","message":"?"}}"#;
        let err = normalize(http(403, body), ProviderKind::Anthropic);
        assert_eq!(err.error_type, ErrorType::PermissionError);
    }

    #[test]
    fn test_google_array_body() {
        let body = r#"[{"error":{"code":400,"message":"API key not valid","status":"UNAUTHENTICATED"}}]"#;
        let err = normalize(http(400, body), ProviderKind::Google);
        assert_eq!(err.error_type, ErrorType::AuthenticationError);
        assert_eq!(err.status, 400);
        assert_eq!(err.code.as_deref(), Some("UNAUTHENTICATED"));
    }

    #[test]
    fn test_ollama_string_error_uses_status_table() {
        let body = r#"{"error":"model 'llama9' not found, try pulling it first"}"#;
        let err = normalize(http(404, body), ProviderKind::Ollama);
        assert_eq!(err.error_type, ErrorType::NotFoundError);
        assert!(err.message.starts_with("model 'llama9'"));
    }

    #[test]
    fn test_google_shaped_body_sent_to_openai_reads_generically() {
        let body = r#"{"error":{"code":400,"message":"bad","status":"INVALID_ARGUMENT"}}"#;
        let err = normalize(http(401, body), ProviderKind::OpenAi);
        assert_eq!(err.error_type, ErrorType::AuthenticationError);
        assert_eq!(err.message, "bad");
        assert_eq!(err.code.as_deref(), Some("400"));
    }

    #[test]
    fn test_transport_failure_keeps_code() {
        let raw = RawError::Transport {
            failure: TransportFailure::ConnectionRefused,
            code: Some("ECONNREFUSED".to_string()),
            message: "connection refused".to_string(),
        };
        let err = normalize(raw, ProviderKind::Ollama);
        assert_eq!(err.error_type, ErrorType::ApiError);
        assert_eq!(err.status, 500);
        assert_eq!(err.code.as_deref(), Some("ECONNREFUSED"));
    }

    #[test]
    fn test_fallback_message() {
        let err = normalize(RawError::Unknown, ProviderKind::Google);
        assert_eq!(err.error_type, ErrorType::ApiError);
        assert_eq!(err.message, FALLBACK_MESSAGE);

        let err = normalize(RawError::Message("boom".to_string()), ProviderKind::Google);
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_stream_payload_derives_status_from_type() {
        let payload = serde_json::json!({
            "type": "error",
            "error": {"type": "rate_limit_error", "message": "slow down"}
        });
        let err = normalize(RawError::Payload(payload), ProviderKind::Anthropic);
        assert_eq!(err.error_type, ErrorType::RateLimitError);
        assert_eq!(err.status, 429);
    }

    #[test]
    fn test_error_as_failed_response() {
        let err = CanonicalError::new(ErrorType::RateLimitError, "slow down", 429, "openai");
        let resp = err.clone().into_response("gpt-4o");
        assert_eq!(resp.status, ResponseStatus::Failed);
        assert!(resp.output().is_empty());
        assert_eq!(resp.output_text(), "");
        assert_eq!(resp.error, Some(err));

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"]["type"], "rate_limit_error");
        assert_eq!(json["error"]["status"], 429);
    }
}
