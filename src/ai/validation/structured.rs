//! Generate-then-parse cycles
//!
//! The only place where a model call and JSON recovery are retried together:
//! a provider failure, a parse failure, a shape mismatch or a rejected value
//! all restart the whole cycle.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use serde_json::Value;
use tracing::{debug, warn};

use super::extract::{JsonShape, try_parse_json};
use crate::ai::provider::{GenerationRequest, ProviderChain};
use crate::constants::engine;
use crate::types::{ChaplinError, Result};

/// Attempt ceiling and fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay: Duration::from_millis(engine::RETRY_DELAY_MS),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Backoff allowing `max_attempts` calls in total
    pub fn backoff(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }
}

impl From<u32> for RetryPolicy {
    fn from(max_attempts: u32) -> Self {
        Self::new(max_attempts)
    }
}

/// Parsed value with the raw text it came from
#[derive(Debug, Clone)]
pub struct StructuredOutput {
    pub value: Value,
    pub raw: String,
    /// Attempts used, including the successful one
    pub attempts: u32,
}

/// Generate text and parse it as JSON of `shape`, retrying the whole cycle
pub async fn generate_text_and_parse_json(
    chain: &ProviderChain,
    request: &GenerationRequest,
    shape: JsonShape,
    policy: impl Into<RetryPolicy>,
) -> Result<StructuredOutput> {
    generate_json_with(chain, request, shape, policy, |_| Ok(())).await
}

/// Like [`generate_text_and_parse_json`], with an extra check on the parsed value
///
/// A rejection from `validate` counts as a failed attempt. After the last
/// attempt the final error is returned inside [`ChaplinError::Exhausted`].
pub async fn generate_json_with<F>(
    chain: &ProviderChain,
    request: &GenerationRequest,
    shape: JsonShape,
    policy: impl Into<RetryPolicy>,
    validate: F,
) -> Result<StructuredOutput>
where
    F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync,
{
    let policy = policy.into();
    let attempts = AtomicU32::new(0);
    let last_raw: Mutex<Option<String>> = Mutex::new(None);
    let (attempts_ref, last_raw_ref, validate) = (&attempts, &last_raw, &validate);

    let outcome = (|| async move {
        let attempt = attempts_ref.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(attempt, max_attempts = policy.max_attempts, %shape, "Structured generation");

        let raw = chain.generate_text(request).await?;
        if let Ok(mut slot) = last_raw_ref.lock() {
            *slot = Some(raw.clone());
        }

        let value = try_parse_json(&raw, shape)?;
        if !shape.matches(&value) {
            return Err(ChaplinError::parse(
                format!("expected a JSON {}, got {}", shape, describe(&value)),
                &raw,
            ));
        }
        validate(&value).map_err(|message| ChaplinError::parse(message, &raw))?;

        Ok::<_, ChaplinError>(StructuredOutput {
            value,
            raw,
            attempts: attempt,
        })
    })
    .retry(policy.backoff())
    .notify(|err: &ChaplinError, delay: Duration| {
        warn!(error = %err, delay_ms = delay.as_millis() as u64, "Structured generation failed, retrying");
    })
    .await;

    outcome.map_err(|source| ChaplinError::Exhausted {
        attempts: attempts.load(Ordering::SeqCst),
        last_raw: last_raw.lock().ok().and_then(|raw| raw.clone()),
        source: Box::new(source),
    })
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
