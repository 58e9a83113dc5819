//! Provider Registry
//!
//! Explicitly constructed at startup and shared by `Arc`. Each key is
//! instantiated at most once, on first use; a key whose construction fails is
//! remembered as unavailable and never retried for the life of the registry.

use std::collections::BTreeMap;

use dashmap::DashMap;
use tracing::{debug, warn};

use super::{SharedProvider, create_provider};
use crate::config::{Config, PollingConfig, ProviderConfig};

pub struct ProviderRegistry {
    configs: BTreeMap<String, ProviderConfig>,
    polling: PollingConfig,
    /// `None` memoises a failed construction
    instances: DashMap<String, Option<SharedProvider>>,
}

impl ProviderRegistry {
    pub fn from_config(config: &Config) -> Self {
        Self {
            configs: config.providers.clone(),
            polling: config.polling.clone(),
            instances: DashMap::new(),
        }
    }

    /// Registry over ready-made instances, keyed by [`super::LlmProvider::key`]
    pub fn with_providers(providers: impl IntoIterator<Item = SharedProvider>) -> Self {
        let instances = DashMap::new();
        for provider in providers {
            instances.insert(provider.key().to_string(), Some(provider));
        }
        Self {
            configs: BTreeMap::new(),
            polling: PollingConfig::default(),
            instances,
        }
    }

    /// Provider for `key`, constructing it on first use
    pub fn get(&self, key: &str) -> Option<SharedProvider> {
        if let Some(entry) = self.instances.get(key) {
            return entry.value().clone();
        }

        self.instances
            .entry(key.to_string())
            .or_insert_with(|| self.instantiate(key))
            .value()
            .clone()
    }

    fn instantiate(&self, key: &str) -> Option<SharedProvider> {
        let Some(config) = self.configs.get(key) else {
            warn!(provider = %key, "No configuration for provider; excluded");
            return None;
        };

        match create_provider(key, config, &self.polling) {
            Ok(provider) => {
                debug!(provider = %key, kind = %config.kind, model = %config.model, "Provider ready");
                Some(provider)
            }
            Err(e) => {
                warn!(provider = %key, error = %e, "Provider unavailable; excluded");
                None
            }
        }
    }

    /// Usable providers for a priority list, order preserved
    pub fn resolve(&self, keys: &[String]) -> Vec<SharedProvider> {
        keys.iter().filter_map(|key| self.get(key)).collect()
    }

    /// Every key known to this registry, configured or preloaded
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.configs.keys().cloned().collect();
        for entry in self.instances.iter() {
            if entry.value().is_some() && !keys.contains(entry.key()) {
                keys.push(entry.key().clone());
            }
        }
        keys.sort();
        keys
    }
}
