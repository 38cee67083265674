use crate::config::LlmConfig;
use crate::llm::providers::{http_client, send_error, status_error};
use crate::llm::{SqlBackend, TranslationError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Hugging Face text-generation inference, as used by the seq2seq
/// text-to-SQL models.
pub struct HuggingFaceProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Serialize)]
struct GenerationRequest<'a> {
    inputs: &'a str,
    options: GenerationOptions,
}

#[derive(Serialize)]
struct GenerationOptions {
    wait_for_model: bool,
}

#[derive(Deserialize)]
struct Generation {
    #[serde(default)]
    generated_text: String,
}

/// Inference endpoints answer with either a list or a single object.
#[derive(Deserialize)]
#[serde(untagged)]
enum GenerationResponse {
    Many(Vec<Generation>),
    One(Generation),
}

impl HuggingFaceProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, TranslationError> {
        let api_url = config.api_url.clone().unwrap_or_else(|| {
            format!("https://api-inference.huggingface.co/models/{}", config.model)
        });
        let timeout = Duration::from_secs(config.timeout_secs);

        Ok(Self {
            client: http_client(timeout)?,
            api_url,
            api_key: config.api_key.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl SqlBackend for HuggingFaceProvider {
    async fn complete(&self, prompt: &str) -> Result<String, TranslationError> {
        info!("Sending request to Hugging Face inference at {}", self.api_url);

        let mut request = self.client.post(&self.api_url).json(&GenerationRequest {
            inputs: prompt,
            options: GenerationOptions {
                wait_for_model: true,
            },
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| send_error(e, self.timeout))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let generated = match response.json::<GenerationResponse>().await {
            Ok(GenerationResponse::Many(items)) => items
                .into_iter()
                .next()
                .map(|g| g.generated_text)
                .unwrap_or_default(),
            Ok(GenerationResponse::One(item)) => item.generated_text,
            Err(e) => {
                return Err(TranslationError::BackendUnavailable(format!(
                    "malformed generation response: {}",
                    e
                )));
            }
        };

        debug!("Generated text: {}", generated);
        Ok(generated)
    }

    fn name(&self) -> &str {
        "huggingface"
    }
}
