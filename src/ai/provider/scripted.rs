//! Scripted provider for tests
//!
//! Replays queued outcomes in order, then falls back to a fixed reply (or a
//! failure when none is set). Every call is counted and its prompt recorded.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::{GenerationRequest, LlmProvider, ProviderChain, ProviderRegistry, SharedProvider};
use crate::config::RoutingConfig;
use crate::types::{ChaplinError, Result};

/// Chain whose small and big lists both hold only `provider`
pub(crate) fn single_chain(provider: Arc<ScriptedProvider>) -> ProviderChain {
    let key = provider.key().to_string();
    let routing = RoutingConfig {
        small: vec![key.clone()],
        big: vec![key],
    };
    let registry = ProviderRegistry::with_providers([provider as SharedProvider]);
    ProviderChain::new(Arc::new(registry), routing)
}

#[derive(Debug, Clone)]
enum Outcome {
    Text(String),
    Fail(String),
}

#[derive(Debug)]
pub(crate) struct ScriptedProvider {
    key: String,
    queue: Mutex<VecDeque<Outcome>>,
    fallback: Option<String>,
    delay: Option<Duration>,
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub(crate) fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            queue: Mutex::new(VecDeque::new()),
            fallback: None,
            delay: None,
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `text` once the queue is drained
    pub(crate) fn always(mut self, text: &str) -> Self {
        self.fallback = Some(text.to_string());
        self
    }

    /// Sleep before answering
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn then_ok(self, text: &str) -> Self {
        self.push(Outcome::Text(text.to_string()));
        self
    }

    pub(crate) fn then_err(self, message: &str) -> Self {
        self.push(Outcome::Fail(message.to_string()));
        self
    }

    fn push(&self, outcome: Outcome) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(outcome);
        }
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn key(&self) -> &str {
        &self.key
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate_text(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(Outcome::Text(text)) => Ok(text),
            Some(Outcome::Fail(message)) => Err(ChaplinError::Provider(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| ChaplinError::Provider(format!("{} has no scripted reply", self.key))),
        }
    }
}
