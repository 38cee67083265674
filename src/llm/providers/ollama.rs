use crate::config::LlmConfig;
use crate::llm::providers::{http_client, send_error, status_error};
use crate::llm::{SqlBackend, TranslationError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

pub struct OllamaProvider {
    client: reqwest::Client,
    api_url: String,
    model: String,
    timeout: Duration,
}

#[derive(Serialize, Debug)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize, Debug)]
struct OllamaResponse {
    response: String,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, TranslationError> {
        let api_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434/api/generate".to_string());
        let timeout = Duration::from_secs(config.timeout_secs);

        Ok(Self {
            client: http_client(timeout)?,
            api_url,
            model: config.model.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl SqlBackend for OllamaProvider {
    async fn complete(&self, prompt: &str) -> Result<String, TranslationError> {
        info!("Sending request to Ollama with model: {}", self.model);
        debug!("API URL: {}", self.api_url);

        let request = OllamaRequest {
            model: &self.model,
            prompt,
            temperature: 0.1,
            stream: false, // Explicitly disable streaming
        };

        let response = self
            .client
            .post(&self.api_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| send_error(e, self.timeout))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| send_error(e, self.timeout))?;

        if !status.is_success() {
            error!("Ollama API responded with status code: {}", status);
            debug!("Ollama error body: {}", response_text);
            return Err(status_error(status, &response_text));
        }

        let ollama_response = serde_json::from_str::<OllamaResponse>(&response_text).map_err(|e| {
            error!("Failed to parse Ollama response: {}", e);
            TranslationError::BackendUnavailable(format!("malformed Ollama response: {}", e))
        })?;

        debug!("Raw response from Ollama: {}", ollama_response.response);
        Ok(ollama_response.response)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
