//! Ollama Local LLM Provider
//!
//! Plain-text generation against a locally running Ollama server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    GenerationRequest, LlmError, LlmProvider, ensure_success, http_client, validate_endpoint,
};
use crate::config::ProviderConfig;
use crate::types::{ErrorCategory, Result};

const DEFAULT_API_BASE: &str = "http://localhost:11434";

/// Ollama Local LLM Provider
#[derive(Debug)]
pub struct OllamaProvider {
    key: String,
    api_base: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(key: &str, config: &ProviderConfig) -> Result<Self> {
        let api_base = validate_endpoint(
            config.api_base.as_deref().unwrap_or(DEFAULT_API_BASE),
            key,
        )?;

        if let Ok(url) = url::Url::parse(&api_base)
            && let Some(host) = url.host_str()
            && !matches!(host, "localhost" | "127.0.0.1" | "[::1]")
        {
            warn!(
                "Ollama endpoint is not localhost: {}. Ensure this is intentional.",
                host
            );
        }

        Ok(Self {
            key: key.to_string(),
            api_base,
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            client: http_client(config.timeout_secs)?,
        })
    }

    fn build_request(&self, request: &GenerationRequest) -> OllamaRequest {
        OllamaRequest {
            model: self.model.clone(),
            prompt: request.prompt.clone(),
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn key(&self) -> &str {
        &self.key
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn generate_text(&self, request: &GenerationRequest) -> Result<String> {
        let url = format!("{}/api/generate", self.api_base);

        let response = self
            .client
            .post(&url)
            .json(&self.build_request(request))
            .send()
            .await
            .map_err(|e| {
                let category = if e.is_connect() {
                    ErrorCategory::Unavailable
                } else {
                    ErrorCategory::Network
                };
                LlmError::with_provider(
                    category,
                    format!(
                        "Failed to reach Ollama at {} ({}). Is Ollama running? Start with: ollama serve",
                        self.api_base, e
                    ),
                    &self.key,
                )
            })?;

        let response_body: OllamaResponse = ensure_success(response, &self.key)
            .await?
            .json()
            .await
            .map_err(|e| {
                LlmError::with_provider(
                    ErrorCategory::BadRequest,
                    format!("Failed to decode Ollama response: {}", e),
                    &self.key,
                )
            })?;

        debug!(provider = %self.key, "Ollama response received");
        Ok(response_body.response)
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
}
