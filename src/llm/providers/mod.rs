pub mod huggingface;
pub mod ollama;
pub mod remote;

use crate::config::LlmConfig;
use crate::llm::{SqlBackend, TranslationError};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

pub fn from_config(config: &LlmConfig) -> Result<Arc<dyn SqlBackend>, TranslationError> {
    let backend: Arc<dyn SqlBackend> = match config.backend.as_str() {
        "remote" => Arc::new(remote::RemoteLlmProvider::new(config)?),
        "ollama" => Arc::new(ollama::OllamaProvider::new(config)?),
        "huggingface" => Arc::new(huggingface::HuggingFaceProvider::new(config)?),
        _ => {
            return Err(TranslationError::Config(format!(
                "Unsupported LLM backend: {}",
                config.backend
            )))
        }
    };
    Ok(backend)
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, TranslationError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| TranslationError::Config(e.to_string()))
}

pub(crate) fn send_error(err: reqwest::Error, timeout: Duration) -> TranslationError {
    if err.is_timeout() {
        TranslationError::Timeout(timeout)
    } else {
        TranslationError::BackendUnavailable(err.to_string())
    }
}

/// Reduces a non-2xx backend answer to its `error` or `message` field so raw
/// bodies never reach callers.
pub(crate) fn status_error(status: StatusCode, body: &str) -> TranslationError {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["error", "message", "detail"].iter().find_map(|key| match &v[*key] {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Object(o) => o
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string),
                _ => None,
            })
        });

    match detail {
        Some(detail) => TranslationError::BackendUnavailable(format!("{}: {}", status, detail)),
        None => TranslationError::BackendUnavailable(format!("backend responded with {}", status)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_prefers_error_field() {
        let err = status_error(StatusCode::BAD_GATEWAY, r#"{"error": "model loading"}"#);
        assert_eq!(
            err,
            TranslationError::BackendUnavailable("502 Bad Gateway: model loading".to_string())
        );
    }

    #[test]
    fn status_error_reads_nested_openai_error() {
        let body = r#"{"error": {"message": "invalid api key", "type": "auth"}}"#;
        let err = status_error(StatusCode::UNAUTHORIZED, body);
        assert_eq!(
            err,
            TranslationError::BackendUnavailable("401 Unauthorized: invalid api key".to_string())
        );
    }

    #[test]
    fn status_error_hides_unstructured_body() {
        let err = status_error(StatusCode::INTERNAL_SERVER_ERROR, "Traceback (most recent call last): ...");
        assert_eq!(
            err,
            TranslationError::BackendUnavailable(
                "backend responded with 500 Internal Server Error".to_string()
            )
        );
    }

    #[test]
    fn rejects_unknown_backend() {
        let mut config = crate::config::AppConfig::default().llm;
        config.backend = "local".to_string();
        assert!(matches!(from_config(&config), Err(TranslationError::Config(_))));
    }
}
