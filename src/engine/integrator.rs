//! Integrator Stage
//!
//! Final step of a full run: one structured call that merges every agent
//! output into a JSON object with exactly the response format's keys.
//! Exhaustion degrades into an error payload instead of failing the run.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{info, instrument, warn};

use crate::ai::prompt::build_integrator_prompt;
use crate::ai::provider::{GenerationRequest, ProviderChain};
use crate::ai::validation::{JsonShape, RetryPolicy, generate_json_with};
use crate::config::EngineConfig;
use crate::types::{AgentOutput, ChaplinError, IntegratorValidation, ResponseFormat, SessionSize};

/// Generation parameters for the integrator call
#[derive(Debug, Clone)]
pub struct IntegratorSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub session: SessionSize,
    pub retry: RetryPolicy,
}

impl IntegratorSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_tokens: config.integrator_max_tokens,
            temperature: config.integrator_temperature,
            session: config.integrator_session,
            retry: RetryPolicy::new(config.integrator_max_attempts)
                .with_delay(Duration::from_millis(config.retry_delay_ms)),
        }
    }
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Result of the integrator stage; never an error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegratorOutcome {
    #[serde(rename = "final")]
    pub final_output: Value,
    pub validation: IntegratorValidation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

#[derive(Clone)]
pub struct Integrator {
    chain: ProviderChain,
    settings: IntegratorSettings,
}

impl Integrator {
    pub fn new(chain: ProviderChain, settings: IntegratorSettings) -> Self {
        Self { chain, settings }
    }

    /// Merge `per_agent` outputs into one object shaped by `format`
    #[instrument(skip_all, fields(keys = format.len(), outputs = per_agent.len()))]
    pub async fn integrate(&self, format: &ResponseFormat, per_agent: &[AgentOutput]) -> IntegratorOutcome {
        if format.is_empty() {
            return IntegratorOutcome {
                final_output: Value::Object(Map::new()),
                validation: IntegratorValidation::succeeded(0),
                raw: None,
            };
        }

        let request = GenerationRequest::new(build_integrator_prompt(format, per_agent))
            .with_max_tokens(self.settings.max_tokens)
            .with_temperature(self.settings.temperature)
            .with_session(self.settings.session);

        let outcome = generate_json_with(
            &self.chain,
            &request,
            JsonShape::Object,
            self.settings.retry,
            |value| match value {
                Value::Object(object) => format.check_keys(object),
                _ => Err("integrator output is not an object".to_string()),
            },
        )
        .await;

        match outcome {
            Ok(output) => {
                info!(attempts = output.attempts, "Integrator produced final object");
                IntegratorOutcome {
                    final_output: output.value,
                    validation: IntegratorValidation::succeeded(output.attempts),
                    raw: Some(output.raw),
                }
            }
            Err(err) => {
                let (attempts, raw, message) = match err {
                    ChaplinError::Exhausted {
                        attempts,
                        last_raw,
                        source,
                    } => (attempts, last_raw, source.to_string()),
                    other => (self.settings.retry.max_attempts, None, other.to_string()),
                };
                warn!(attempts, error = %message, "Integrator exhausted its attempts");
                IntegratorOutcome {
                    final_output: json!({ "error": message }),
                    validation: IntegratorValidation::failed(message, attempts),
                    raw,
                }
            }
        }
    }
}
