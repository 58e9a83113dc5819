//! LLM Provider Abstraction
//!
//! Defines the `LlmProvider` trait for plain-text generation. Every backend is
//! an independent value built from a [`ProviderConfig`]; the
//! [`ProviderRegistry`] owns them and the [`ProviderChain`] walks a priority
//! list until one answers.
//!
//! ## Modules
//!
//! - `chain`: Priority-ordered fallback across providers
//! - `registry`: Lazy, memoised provider construction
//! - `polling`: Submit-then-poll backends

mod chain;
mod gemini;
mod ollama;
mod openai;
mod polling;
mod registry;
#[cfg(test)]
pub(crate) mod scripted;

pub use chain::{ChainAttempt, ProviderChain};
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use polling::{HttpTaskBackend, PollingProvider, TaskBackend};
pub use registry::ProviderRegistry;

// Re-export error types from centralized location
pub use crate::types::{ErrorCategory, ErrorClassifier, LlmError};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{PollingConfig, ProviderConfig, ProviderKind};
use crate::constants::network;
use crate::types::{ChaplinError, Result, SessionSize};

/// Callback invoked before each poll of a slow backend with `(attempt, max_attempts)`
pub type PollObserver = Arc<dyn Fn(u32, u32) + Send + Sync>;

/// Shared LLM provider type for concurrent access.
pub type SharedProvider = Arc<dyn LlmProvider>;

// =============================================================================
// Generation Request
// =============================================================================

/// Parameters of one text generation call
#[derive(Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Selects the priority list
    pub session: SessionSize,
    /// Side channel for "attempt K of N" status from polling backends
    pub poll_observer: Option<PollObserver>,
}

impl std::fmt::Debug for GenerationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationRequest")
            .field("prompt_chars", &self.prompt.chars().count())
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("session", &self.session)
            .field("poll_observer", &self.poll_observer.is_some())
            .finish()
    }
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: crate::constants::engine::AGENT_MAX_TOKENS,
            temperature: crate::constants::engine::AGENT_TEMPERATURE,
            session: SessionSize::Small,
            poll_observer: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_session(mut self, session: SessionSize) -> Self {
        self.session = session;
        self
    }

    pub fn with_poll_observer(mut self, observer: PollObserver) -> Self {
        self.poll_observer = Some(observer);
        self
    }

    /// Notify the observer, if any, that a poll is about to happen
    pub fn notify_poll(&self, attempt: u32, max_attempts: u32) {
        if let Some(observer) = &self.poll_observer {
            observer(attempt, max_attempts);
        }
    }
}

// =============================================================================
// LLM Provider Trait
// =============================================================================

/// Text generation backend
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Routing key this provider is registered under
    fn key(&self) -> &str;

    /// Model name currently in use
    fn model(&self) -> &str;

    /// Upper bound for one `generate_text` call
    fn timeout(&self) -> Duration {
        Duration::from_secs(network::DEFAULT_TIMEOUT_SECS)
    }

    /// Generate free text; an empty string is returned as-is and judged by the caller
    async fn generate_text(&self, request: &GenerationRequest) -> Result<String>;
}

/// Construct a provider from its configuration
///
/// Fails when required credentials or endpoints are missing.
pub fn create_provider(
    key: &str,
    config: &ProviderConfig,
    polling: &PollingConfig,
) -> Result<SharedProvider> {
    match config.kind {
        ProviderKind::OpenAi => Ok(Arc::new(OpenAiProvider::new(key, config)?)),
        ProviderKind::Gemini => Ok(Arc::new(GeminiProvider::new(key, config)?)),
        ProviderKind::Ollama => Ok(Arc::new(OllamaProvider::new(key, config)?)),
        ProviderKind::Polling => Ok(Arc::new(PollingProvider::from_config(
            key, config, polling,
        )?)),
    }
}

// =============================================================================
// HTTP helpers shared by the backends
// =============================================================================

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(network::CONNECTION_TIMEOUT_SECS))
        .build()
        .map_err(|e| ChaplinError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Map a transport failure to a classified provider error
pub(crate) fn request_error(err: reqwest::Error, provider: &str) -> ChaplinError {
    let category = if err.is_timeout() || err.is_connect() {
        ErrorCategory::Network
    } else {
        ErrorClassifier::classify(&err.to_string(), provider).category
    };
    LlmError::with_provider(category, format!("request failed: {}", err), provider).into()
}

/// Turn a non-success response into a classified provider error
pub(crate) async fn ensure_success(
    response: reqwest::Response,
    provider: &str,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(300).collect();
    Err(ErrorClassifier::classify_http_status(
        status.as_u16(),
        &format!("HTTP {}: {}", status, snippet),
        provider,
    )
    .into())
}

/// Validate an endpoint base URL: http(s) only, trailing slash removed
pub(crate) fn validate_endpoint(endpoint: &str, provider: &str) -> Result<String> {
    let url = url::Url::parse(endpoint).map_err(|e| {
        ChaplinError::Config(format!(
            "Invalid endpoint URL for '{}' ({}): {}",
            provider, endpoint, e
        ))
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ChaplinError::Config(format!(
            "Endpoint for '{}' must use http or https scheme, got: {}",
            provider,
            url.scheme()
        )));
    }

    let mut result = url.to_string();
    while result.ends_with('/') {
        result.pop();
    }
    Ok(result)
}
