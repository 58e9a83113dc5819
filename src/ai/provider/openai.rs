//! OpenAI API Provider
//!
//! Plain-text generation through the Chat Completions API. Any
//! OpenAI-compatible endpoint works by overriding `api_base`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use super::{
    GenerationRequest, LlmError, LlmProvider, ensure_success, http_client, request_error,
    validate_endpoint,
};
use crate::config::ProviderConfig;
use crate::types::{ChaplinError, ErrorCategory, Result};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI API Provider with secure API key handling
pub struct OpenAiProvider {
    key: String,
    /// Never exposed in logs or debug output
    api_key: SecretString,
    api_base: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("key", &self.key)
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(key: &str, config: &ProviderConfig) -> Result<Self> {
        let api_key = config.resolve_api_key().ok_or_else(|| {
            ChaplinError::Config(format!(
                "API key for '{}' not found. Set {} or provide api_key in config",
                key,
                config.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY")
            ))
        })?;

        let api_base = validate_endpoint(
            config.api_base.as_deref().unwrap_or(DEFAULT_API_BASE),
            key,
        )?;

        Ok(Self {
            key: key.to_string(),
            api_key: SecretString::from(api_key),
            api_base,
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            client: http_client(config.timeout_secs)?,
        })
    }

    fn build_request(&self, request: &GenerationRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            temperature: request.temperature,
            max_tokens: Some(request.max_tokens),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
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
        let start_time = Instant::now();
        let url = format!("{}/chat/completions", self.api_base);

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&self.build_request(request))
            .send()
            .await
            .map_err(|e| request_error(e, &self.key))?;

        let response_body: ChatCompletionResponse = ensure_success(response, &self.key)
            .await?
            .json()
            .await
            .map_err(|e| {
                LlmError::with_provider(
                    ErrorCategory::BadRequest,
                    format!("Failed to decode response: {}", e),
                    &self.key,
                )
            })?;

        debug!(
            provider = %self.key,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Chat completion received"
        );

        Ok(response_body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    fn provider() -> OpenAiProvider {
        let mut config = ProviderConfig::new(ProviderKind::OpenAi, "gpt-4o-mini");
        config.api_key = Some("sk-test-secret".into());
        OpenAiProvider::new("openai", &config).unwrap()
    }

    #[test]
    fn test_debug_redacts_key() {
        let debug = format!("{:?}", provider());
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-test-secret"));
    }

    #[test]
    fn test_request_body() {
        let request = GenerationRequest::new("Say hi").with_max_tokens(800);
        let body = serde_json::to_value(provider().build_request(&request)).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["content"], "Say hi");
        assert_eq!(body["max_tokens"], 800);
    }

    #[test]
    fn test_response_decoding() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hello"));
    }
}
