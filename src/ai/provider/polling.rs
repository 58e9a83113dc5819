//! Submit-then-poll Provider
//!
//! Some backends accept a task and produce the result later. Generation
//! submits once, then polls at a fixed interval up to a fixed ceiling.
//!
//! ## Poll outcomes
//!
//! - result available: returned (a JSON envelope with `result`/`message` is unwrapped)
//! - not ready: wait and poll again
//! - retryable error (rate limit, network, transient): logged, wait, poll again
//! - any other error: the whole call fails immediately
//! - ceiling reached: [`ChaplinError::Timeout`]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    GenerationRequest, LlmError, LlmProvider, ensure_success, http_client, request_error,
    validate_endpoint,
};
use crate::config::{PollingConfig, ProviderConfig};
use crate::types::{ChaplinError, ErrorCategory, ErrorClassifier, Result};

/// Task API of a slow backend
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Submit a prompt; returns the backend task id
    async fn submit(&self, request: &GenerationRequest) -> Result<String>;

    /// Fetch the result if ready; `None` while still pending
    async fn poll(&self, task_id: &str) -> Result<Option<String>>;
}

/// Provider driving a [`TaskBackend`]
pub struct PollingProvider {
    key: String,
    model: String,
    backend: Arc<dyn TaskBackend>,
    interval: Duration,
    max_attempts: u32,
    request_timeout: Duration,
}

impl std::fmt::Debug for PollingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingProvider")
            .field("key", &self.key)
            .field("model", &self.model)
            .field("interval", &self.interval)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl PollingProvider {
    pub fn new(
        key: impl Into<String>,
        model: impl Into<String>,
        backend: Arc<dyn TaskBackend>,
        interval: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            key: key.into(),
            model: model.into(),
            backend,
            interval,
            max_attempts: max_attempts.max(1),
            request_timeout: Duration::from_secs(crate::constants::network::DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Provider over [`HttpTaskBackend`]
    pub fn from_config(key: &str, config: &ProviderConfig, polling: &PollingConfig) -> Result<Self> {
        let backend = HttpTaskBackend::new(key, config)?;
        let mut provider = Self::new(
            key,
            config.model.clone(),
            Arc::new(backend),
            Duration::from_secs(polling.interval_secs),
            polling.max_attempts,
        );
        provider.request_timeout = Duration::from_secs(config.timeout_secs);
        Ok(provider)
    }

    /// Unwrap `{"result": ...}` / `{"message": ...}` envelopes
    fn unwrap_result(raw: &str) -> String {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(raw) {
            for field in ["result", "message"] {
                if let Some(serde_json::Value::String(s)) = map.get(field)
                    && !s.trim().is_empty()
                {
                    return s.clone();
                }
            }
        }
        raw.to_string()
    }
}

#[async_trait]
impl LlmProvider for PollingProvider {
    fn key(&self) -> &str {
        &self.key
    }

    fn model(&self) -> &str {
        &self.model
    }

    /// Whole polling window plus one request's worth of slack
    fn timeout(&self) -> Duration {
        self.interval * self.max_attempts + self.request_timeout
    }

    async fn generate_text(&self, request: &GenerationRequest) -> Result<String> {
        let task_id = self.backend.submit(request).await?;
        info!(provider = %self.key, task_id = %task_id, "Task submitted, polling for result");

        for attempt in 1..=self.max_attempts {
            request.notify_poll(attempt, self.max_attempts);

            match self.backend.poll(&task_id).await {
                Ok(Some(raw)) if !raw.trim().is_empty() => {
                    debug!(provider = %self.key, task_id = %task_id, attempt, "Result received");
                    return Ok(Self::unwrap_result(&raw));
                }
                Ok(_) => {
                    debug!(
                        provider = %self.key,
                        attempt,
                        max_attempts = self.max_attempts,
                        "No result yet"
                    );
                }
                Err(err) => {
                    let classified = ErrorClassifier::classify_error(&err, &self.key);
                    if !classified.is_retryable() {
                        warn!(provider = %self.key, error = %err, "Fatal poll error, aborting");
                        return Err(err);
                    }
                    warn!(
                        provider = %self.key,
                        attempt,
                        category = %classified.category,
                        error = %err,
                        "Transient poll error, retrying"
                    );
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        Err(ChaplinError::timeout(
            format!(
                "waiting for task {} on '{}' ({} polls)",
                task_id, self.key, self.max_attempts
            ),
            self.interval * self.max_attempts,
        ))
    }
}

// =============================================================================
// HTTP task backend
// =============================================================================

/// Task API over HTTP: `POST {base}/tasks`, then `GET {base}/tasks/{id}`
pub struct HttpTaskBackend {
    key: String,
    api_base: String,
    api_key: Option<SecretString>,
    model: String,
    client: reqwest::Client,
}

impl HttpTaskBackend {
    pub fn new(key: &str, config: &ProviderConfig) -> Result<Self> {
        let api_base = config.api_base.as_deref().ok_or_else(|| {
            ChaplinError::Config(format!("Polling provider '{}' requires api_base", key))
        })?;

        Ok(Self {
            key: key.to_string(),
            api_base: validate_endpoint(api_base, key)?,
            api_key: config.resolve_api_key().map(SecretString::from),
            model: config.model.clone(),
            client: http_client(config.timeout_secs)?,
        })
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(alias = "id", alias = "taskId")]
    task_id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TaskResultResponse {
    #[serde(default)]
    results: Vec<String>,
    #[serde(default)]
    result: Option<String>,
}

impl TaskResultResponse {
    fn first_result(self) -> Option<String> {
        self.results
            .into_iter()
            .chain(self.result)
            .find(|r| !r.trim().is_empty())
    }
}

#[async_trait]
impl TaskBackend for HttpTaskBackend {
    async fn submit(&self, request: &GenerationRequest) -> Result<String> {
        let body = SubmitRequest {
            model: &self.model,
            prompt: &request.prompt,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };
        let response = self
            .authorize(self.client.post(format!("{}/tasks", self.api_base)))
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(e, &self.key))?;

        let submitted: SubmitResponse = ensure_success(response, &self.key)
            .await?
            .json()
            .await
            .map_err(|e| {
                LlmError::with_provider(
                    ErrorCategory::BadRequest,
                    format!("Failed to decode submit response: {}", e),
                    &self.key,
                )
            })?;

        Ok(match submitted.task_id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
    }

    async fn poll(&self, task_id: &str) -> Result<Option<String>> {
        let response = self
            .authorize(
                self.client
                    .get(format!("{}/tasks/{}", self.api_base, task_id)),
            )
            .send()
            .await
            .map_err(|e| request_error(e, &self.key))?;

        if response.status() == reqwest::StatusCode::ACCEPTED {
            return Ok(None);
        }

        let body: TaskResultResponse = ensure_success(response, &self.key)
            .await?
            .json()
            .await
            .map_err(|e| {
                LlmError::with_provider(
                    ErrorCategory::Transient,
                    format!("Failed to decode task result: {}", e),
                    &self.key,
                )
            })?;

        Ok(body.first_result())
    }
}
