//! Priority-Ordered Provider Chain
//!
//! Walks the routing list for the requested session size and returns the first
//! non-empty answer.
//!
//! ## Strategy
//!
//! 1. Resolve the priority list (`routing.small` or `routing.big`)
//! 2. Skip keys the registry cannot instantiate
//! 3. Call each provider once, bounded by its timeout
//! 4. Treat an error or a blank answer as a failure and move on
//! 5. Fail with every provider's reason once the list is exhausted

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use super::{GenerationRequest, ProviderRegistry, SharedProvider};
use crate::ai::timeout::with_timeout;
use crate::config::{Config, RoutingConfig};
use crate::types::{ChaplinError, ErrorClassifier, Result, SessionSize};

/// One failed provider attempt
#[derive(Debug, Clone)]
pub struct ChainAttempt {
    pub provider: String,
    pub error: String,
}

/// Fallback chain over the registry
#[derive(Clone)]
pub struct ProviderChain {
    registry: Arc<ProviderRegistry>,
    routing: RoutingConfig,
}

impl ProviderChain {
    pub fn new(registry: Arc<ProviderRegistry>, routing: RoutingConfig) -> Self {
        Self { registry, routing }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(ProviderRegistry::from_config(config)),
            config.routing.clone(),
        )
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Priority list for a session size
    pub fn priority(&self, session: SessionSize) -> &[String] {
        self.routing.priority(session)
    }

    /// Usable providers for a session size, in priority order
    pub fn providers(&self, session: SessionSize) -> Vec<SharedProvider> {
        self.registry.resolve(self.priority(session))
    }

    /// Generate text with fallback across the priority list
    #[instrument(skip(self, request), fields(session = %request.session))]
    pub async fn generate_text(&self, request: &GenerationRequest) -> Result<String> {
        let providers = self.providers(request.session);
        if providers.is_empty() {
            return Err(ChaplinError::Provider(format!(
                "No providers available for {} session (configured: {})",
                request.session,
                self.priority(request.session).join(", ")
            )));
        }

        let mut attempts: Vec<ChainAttempt> = Vec::with_capacity(providers.len());

        for provider in &providers {
            let key = provider.key();
            let started = Instant::now();
            debug!(provider = %key, model = %provider.model(), "Chain attempt");

            let outcome = with_timeout(
                provider.timeout(),
                provider.generate_text(request),
                &format!("{} generate", key),
            )
            .await;

            match outcome {
                Ok(text) if !text.trim().is_empty() => {
                    info!(
                        provider = %key,
                        attempts = attempts.len() + 1,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Chain succeeded"
                    );
                    return Ok(text);
                }
                Ok(_) => {
                    warn!(provider = %key, "Provider returned empty output");
                    attempts.push(ChainAttempt {
                        provider: key.to_string(),
                        error: "empty response".to_string(),
                    });
                }
                Err(err) => {
                    let classified = ErrorClassifier::classify_error(&err, key);
                    warn!(
                        provider = %key,
                        category = %classified.category,
                        error = %err,
                        "Provider failed"
                    );
                    attempts.push(ChainAttempt {
                        provider: key.to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }

        Err(Self::exhausted(&attempts))
    }

    fn exhausted(attempts: &[ChainAttempt]) -> ChaplinError {
        let details = attempts
            .iter()
            .map(|a| format!("{}: {}", a.provider, a.error))
            .collect::<Vec<_>>()
            .join(" | ");
        ChaplinError::Provider(format!(
            "All providers failed. Attempts: {}. Details: {}",
            attempts.len(),
            details
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::scripted::ScriptedProvider;
    use std::time::Duration;

    fn chain(providers: Vec<Arc<ScriptedProvider>>, order: &[&str]) -> ProviderChain {
        let shared = providers
            .into_iter()
            .map(|p| p as SharedProvider)
            .collect::<Vec<_>>();
        let routing = RoutingConfig {
            small: order.iter().map(|s| s.to_string()).collect(),
            big: order.iter().rev().map(|s| s.to_string()).collect(),
        };
        ProviderChain::new(Arc::new(ProviderRegistry::with_providers(shared)), routing)
    }

    #[tokio::test]
    async fn test_fallback_to_third() {
        let a = Arc::new(ScriptedProvider::new("a").then_err("503 service unavailable"));
        let b = Arc::new(ScriptedProvider::new("b").then_ok("   "));
        let c = Arc::new(ScriptedProvider::new("c").always("ok"));
        let chain = chain(vec![a.clone(), b.clone(), c.clone()], &["a", "b", "c"]);

        let text = chain
            .generate_text(&GenerationRequest::new("hi"))
            .await
            .unwrap();
        assert_eq!(text, "ok");
        assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_first_success_short_circuits() {
        let a = Arc::new(ScriptedProvider::new("a").always("first"));
        let b = Arc::new(ScriptedProvider::new("b").always("second"));
        let chain = chain(vec![a.clone(), b.clone()], &["a", "b"]);

        let text = chain
            .generate_text(&GenerationRequest::new("hi"))
            .await
            .unwrap();
        assert_eq!(text, "first");
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_all_fail_names_each_provider() {
        let chain = chain(
            vec![
                Arc::new(ScriptedProvider::new("a").then_err("boom")),
                Arc::new(ScriptedProvider::new("b").then_ok("")),
                Arc::new(ScriptedProvider::new("c").then_err("denied")),
            ],
            &["a", "b", "c"],
        );

        let err = chain
            .generate_text(&GenerationRequest::new("hi"))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("All providers failed. Attempts: 3."));
        assert!(message.contains("a: boom"));
        assert!(message.contains("b: empty response"));
        assert!(message.contains("c: denied"));
    }

    #[tokio::test]
    async fn test_session_selects_list() {
        let a = Arc::new(ScriptedProvider::new("a").always("from a"));
        let b = Arc::new(ScriptedProvider::new("b").always("from b"));
        let chain = chain(vec![a, b], &["a", "b"]);

        let request = GenerationRequest::new("hi").with_session(SessionSize::Big);
        assert_eq!(chain.generate_text(&request).await.unwrap(), "from b");
    }

    #[tokio::test]
    async fn test_no_usable_providers() {
        let chain = chain(vec![], &["ghost"]);
        let err = chain
            .generate_text(&GenerationRequest::new("hi"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No providers available"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out() {
        let slow = Arc::new(
            ScriptedProvider::new("slow")
                .always("late")
                .with_delay(Duration::from_secs(600)),
        );
        let fast = Arc::new(ScriptedProvider::new("fast").always("fast"));
        let chain = chain(vec![slow, fast], &["slow", "fast"]);

        let text = chain
            .generate_text(&GenerationRequest::new("hi"))
            .await
            .unwrap();
        assert_eq!(text, "fast");
    }
}
