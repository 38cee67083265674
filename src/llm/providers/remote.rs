use crate::config::LlmConfig;
use crate::llm::providers::{http_client, send_error, status_error};
use crate::llm::{SqlBackend, TranslationError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const SYSTEM_MESSAGE: &str = "You are a SQL expert. Convert natural language queries to valid SQL \
     statements. Return only the SQL code without any explanation.";

/// OpenAI-compatible chat completions endpoint (OpenAI, Groq and similar).
pub struct RemoteLlmProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct PromptRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct PromptResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl RemoteLlmProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, TranslationError> {
        let api_url = config.api_url.clone().ok_or_else(|| {
            TranslationError::Config("API URL is required for remote LLM provider".to_string())
        })?;

        let api_key = config.api_key.clone().ok_or_else(|| {
            TranslationError::Config("API key is required for remote LLM provider".to_string())
        })?;

        let timeout = Duration::from_secs(config.timeout_secs);

        Ok(Self {
            client: http_client(timeout)?,
            api_url,
            api_key,
            model: config.model.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl SqlBackend for RemoteLlmProvider {
    async fn complete(&self, prompt: &str) -> Result<String, TranslationError> {
        let request = PromptRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: SYSTEM_MESSAGE,
                },
                Message {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.1,
            max_tokens: 2000,
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| send_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Remote LLM responded with status code: {}", status);
            return Err(status_error(status, &body));
        }

        let prompt_response: PromptResponse = response.json().await.map_err(|e| {
            TranslationError::BackendUnavailable(format!("malformed completion response: {}", e))
        })?;

        let content = prompt_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(TranslationError::EmptyResponse)?;

        debug!("Raw completion: {}", content);
        Ok(content)
    }

    fn name(&self) -> &str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_url_and_key() {
        let mut config = crate::config::AppConfig::default().llm;
        config.backend = "remote".to_string();
        assert!(matches!(
            RemoteLlmProvider::new(&config),
            Err(TranslationError::Config(_))
        ));

        config.api_url = Some("https://api.example.com/v1/chat/completions".to_string());
        config.api_key = Some("key".to_string());
        assert!(RemoteLlmProvider::new(&config).is_ok());
    }
}
