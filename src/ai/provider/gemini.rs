//! Google Gemini Provider
//!
//! One provider type for every Gemini model; flash, pro and flash-lite are
//! just different `model` values in configuration.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{
    GenerationRequest, LlmError, LlmProvider, ensure_success, http_client, request_error,
    validate_endpoint,
};
use crate::config::ProviderConfig;
use crate::types::{ChaplinError, ErrorCategory, Result};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    key: String,
    api_key: SecretString,
    api_base: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("key", &self.key)
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}

impl GeminiProvider {
    pub fn new(key: &str, config: &ProviderConfig) -> Result<Self> {
        let api_key = config.resolve_api_key().ok_or_else(|| {
            ChaplinError::Config(format!(
                "API key for '{}' not found. Set {} or provide api_key in config",
                key,
                config.api_key_env.as_deref().unwrap_or("GENAI_API_KEY")
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

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    fn build_request(&self, request: &GenerationRequest) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: request.prompt.clone(),
                }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
            },
        }
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
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
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&self.build_request(request))
            .send()
            .await
            .map_err(|e| request_error(e, &self.key))?;

        let body: GenerateContentResponse = ensure_success(response, &self.key)
            .await?
            .json()
            .await
            .map_err(|e| {
                LlmError::with_provider(
                    ErrorCategory::BadRequest,
                    format!("Failed to decode Gemini response: {}", e),
                    &self.key,
                )
            })?;

        if let Some(feedback) = &body.prompt_feedback
            && let Some(reason) = &feedback.block_reason
        {
            return Err(LlmError::with_provider(
                ErrorCategory::BadRequest,
                format!("Prompt blocked: {}", reason),
                &self.key,
            )
            .into());
        }

        let text = body.text();
        debug!(provider = %self.key, chars = text.len(), "Gemini response received");
        Ok(text)
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

impl GenerateContentResponse {
    /// Text of the first candidate, parts concatenated
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    fn provider(model: &str) -> GeminiProvider {
        let mut config = ProviderConfig::new(ProviderKind::Gemini, model);
        config.api_key = Some("g-secret".into());
        GeminiProvider::new("geminiflash", &config).unwrap()
    }

    #[test]
    fn test_endpoint_per_model() {
        assert!(
            provider("gemini-2.5-flash")
                .endpoint()
                .ends_with("/models/gemini-2.5-flash:generateContent")
        );
        assert!(
            provider("gemini-2.5-pro")
                .endpoint()
                .ends_with("/models/gemini-2.5-pro:generateContent")
        );
    }

    #[test]
    fn test_request_body_shape() {
        let request = GenerationRequest::new("hello").with_max_tokens(900);
        let body = serde_json::to_value(provider("m").build_request(&request)).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 900);
    }

    #[test]
    fn test_response_text_joins_parts() {
        let raw = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"},{"text":"lo"}]}}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.text(), "Hello");

        let empty: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.text(), "");
    }

    #[test]
    fn test_missing_key_fails() {
        let config = ProviderConfig::new(ProviderKind::Gemini, "m")
            .with_api_key_env("CHAPLIN_TEST_MISSING_GENAI_KEY");
        assert!(GeminiProvider::new("geminipro", &config).is_err());
        assert!(!format!("{:?}", provider("m")).contains("g-secret"));
    }
}
