//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (~/.config/chaplin/) and project (.chaplin/) level configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::constants::{engine, jobs, network, polling};
use crate::types::{ChaplinError, Result, SessionSize};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Provider priority lists per session size
    pub routing: RoutingConfig,

    /// Provider definitions keyed by routing key
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Agent executor and integrator settings
    pub engine: EngineConfig,

    /// Submit-then-poll backend settings
    pub polling: PollingConfig,

    /// Durable job store settings
    pub storage: StorageConfig,

    /// Trigger signing keys
    pub signing: SigningConfig,

    /// Trigger publishing settings
    pub queue: QueueConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            routing: RoutingConfig::default(),
            providers: default_providers(),
            engine: EngineConfig::default(),
            polling: PollingConfig::default(),
            storage: StorageConfig::default(),
            signing: SigningConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `ChaplinError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if self.routing.small.is_empty() || self.routing.big.is_empty() {
            return Err(ChaplinError::Config(
                "routing.small and routing.big must each list at least one provider".to_string(),
            ));
        }

        for (name, temperature) in [
            ("engine.agent_temperature", self.engine.agent_temperature),
            (
                "engine.integrator_temperature",
                self.engine.integrator_temperature,
            ),
        ] {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ChaplinError::Config(format!(
                    "{} must be between 0.0 and 2.0, got {}",
                    name, temperature
                )));
            }
        }

        for (name, attempts) in [
            ("engine.agent_max_attempts", self.engine.agent_max_attempts),
            (
                "engine.integrator_max_attempts",
                self.engine.integrator_max_attempts,
            ),
            ("engine.json_max_attempts", self.engine.json_max_attempts),
            ("polling.max_attempts", self.polling.max_attempts),
        ] {
            if attempts == 0 {
                return Err(ChaplinError::Config(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.polling.interval_secs == 0 {
            return Err(ChaplinError::Config(
                "polling.interval_secs must be greater than 0".to_string(),
            ));
        }

        for (key, provider) in &self.providers {
            if provider.timeout_secs == 0 {
                return Err(ChaplinError::Config(format!(
                    "providers.{}.timeout_secs must be greater than 0",
                    key
                )));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Routing Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Provider keys tried in order for small sessions
    pub small: Vec<String>,

    /// Provider keys tried in order for big sessions
    pub big: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            small: vec![
                "cortensor".to_string(),
                "geminiflash".to_string(),
                "geminipro".to_string(),
            ],
            big: vec![
                "geminipro".to_string(),
                "geminiflash".to_string(),
                "cortensor".to_string(),
            ],
        }
    }
}

impl RoutingConfig {
    pub fn priority(&self, session: SessionSize) -> &[String] {
        match session {
            SessionSize::Small => &self.small,
            SessionSize::Big => &self.big,
        }
    }
}

// =============================================================================
// Provider Configuration
// =============================================================================

/// Backend protocol a provider speaks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions
    OpenAi,
    /// Google Generative Language API
    Gemini,
    /// Local Ollama server
    Ollama,
    /// Submit-then-poll task API
    Polling,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Gemini => write!(f, "gemini"),
            ProviderKind::Ollama => write!(f, "ollama"),
            ProviderKind::Polling => write!(f, "polling"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,

    /// Model name sent to the backend
    pub model: String,

    /// Endpoint base URL (backend default when absent)
    #[serde(default)]
    pub api_base: Option<String>,

    /// Inline API key; never written back out
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Per-call timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    network::DEFAULT_TIMEOUT_SECS
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            kind,
            model: model.into(),
            api_base: None,
            api_key: None,
            api_key_env: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = Some(base.into());
        self
    }

    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }

    /// Inline key first, then the named environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                self.api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
                    .filter(|k| !k.trim().is_empty())
            })
    }
}

fn default_providers() -> BTreeMap<String, ProviderConfig> {
    let gemini_base = "https://generativelanguage.googleapis.com/v1beta";
    let mut providers = BTreeMap::new();
    providers.insert(
        "cortensor".to_string(),
        ProviderConfig::new(ProviderKind::Polling, "cortensor")
            .with_api_base("http://localhost:5010")
            .with_api_key_env("CORTENSOR_API_KEY"),
    );
    for (key, model) in [
        ("geminiflash", "gemini-2.5-flash"),
        ("geminipro", "gemini-2.5-pro"),
        ("geminiflashlite", "gemini-2.5-flash-lite"),
    ] {
        providers.insert(
            key.to_string(),
            ProviderConfig::new(ProviderKind::Gemini, model)
                .with_api_base(gemini_base)
                .with_api_key_env("GENAI_API_KEY"),
        );
    }
    providers.insert(
        "openai".to_string(),
        ProviderConfig::new(ProviderKind::OpenAi, "gpt-4o-mini")
            .with_api_base("https://api.openai.com/v1")
            .with_api_key_env("OPENAI_API_KEY"),
    );
    providers.insert(
        "ollama".to_string(),
        ProviderConfig::new(ProviderKind::Ollama, "llama3.2")
            .with_api_base("http://localhost:11434"),
    );
    providers
}

// =============================================================================
// Engine Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Token budget per agent step
    pub agent_max_tokens: u32,

    /// Sampling temperature per agent step
    pub agent_temperature: f32,

    /// Model-call attempts per agent before the run fails
    pub agent_max_attempts: u32,

    /// Priority list used for agent steps
    pub agent_session: SessionSize,

    pub integrator_max_tokens: u32,
    pub integrator_temperature: f32,

    /// Generate+parse cycles for the integrator before degrading
    pub integrator_max_attempts: u32,
    pub integrator_session: SessionSize,

    /// Generate+parse cycles for other structured calls
    pub json_max_attempts: u32,

    /// Pause between retried attempts in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agent_max_tokens: engine::AGENT_MAX_TOKENS,
            agent_temperature: engine::AGENT_TEMPERATURE,
            agent_max_attempts: engine::AGENT_MAX_ATTEMPTS,
            agent_session: SessionSize::Small,
            integrator_max_tokens: engine::INTEGRATOR_MAX_TOKENS,
            integrator_temperature: engine::INTEGRATOR_TEMPERATURE,
            integrator_max_attempts: engine::INTEGRATOR_MAX_ATTEMPTS,
            integrator_session: SessionSize::Big,
            json_max_attempts: engine::JSON_MAX_ATTEMPTS,
            retry_delay_ms: engine::RETRY_DELAY_MS,
        }
    }
}

// =============================================================================
// Polling Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Seconds between result polls
    pub interval_secs: u64,

    /// Polls before giving up with a timeout
    pub max_attempts: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: polling::INTERVAL_SECS,
            max_attempts: polling::MAX_ATTEMPTS,
        }
    }
}

// =============================================================================
// Storage Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    pub path: PathBuf,

    /// Age after which jobs may be purged
    pub job_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".chaplin/jobs.db"),
            job_ttl_secs: jobs::DEFAULT_TTL_SECS,
        }
    }
}

// =============================================================================
// Signing Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    #[serde(skip_serializing)]
    pub current_key: Option<String>,

    /// Accepted during key rotation
    #[serde(skip_serializing)]
    pub next_key: Option<String>,

    pub clock_tolerance_secs: u64,

    /// Lifetime of signatures minted locally
    pub signature_ttl_secs: u64,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            current_key: None,
            next_key: None,
            clock_tolerance_secs: jobs::CLOCK_TOLERANCE_SECS,
            signature_ttl_secs: jobs::SIGNATURE_TTL_SECS,
        }
    }
}

// =============================================================================
// Queue Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Worker URL that receives processing triggers
    pub destination: Option<String>,

    /// Queue service base URL
    pub api_base: String,

    #[serde(skip_serializing)]
    pub token: Option<String>,

    /// Delivery delay for published triggers
    pub delay_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            destination: None,
            api_base: "https://qstash.upstash.io".to_string(),
            token: None,
            delay_secs: jobs::PUBLISH_DELAY_SECS,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.engine.agent_max_tokens, 800);
        assert_eq!(config.engine.integrator_max_tokens, 900);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_routing_priority() {
        let routing = RoutingConfig::default();
        assert_eq!(routing.priority(SessionSize::Small)[0], "cortensor");
        assert_eq!(routing.priority(SessionSize::Big)[0], "geminipro");
    }

    #[test]
    fn test_default_providers_cover_routing() {
        let config = Config::default();
        for key in config.routing.small.iter().chain(&config.routing.big) {
            assert!(config.providers.contains_key(key), "missing {}", key);
        }
        assert_eq!(config.providers["cortensor"].kind, ProviderKind::Polling);
        assert_eq!(config.providers["geminiflash"].kind, ProviderKind::Gemini);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.engine.agent_temperature = 3.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.routing.big.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.engine.json_max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.polling.interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secrets_not_serialized() {
        let mut config = Config::default();
        config.signing.current_key = Some("sig_current".into());
        if let Some(p) = config.providers.get_mut("openai") {
            p.api_key = Some("sk-secret".into());
        }
        let out = serde_json::to_string(&config).unwrap();
        assert!(!out.contains("sig_current"));
        assert!(!out.contains("sk-secret"));
    }

    #[test]
    fn test_resolve_api_key_prefers_inline() {
        let mut provider = ProviderConfig::new(ProviderKind::OpenAi, "m")
            .with_api_key_env("CHAPLIN_TEST_UNSET_KEY_VAR");
        assert!(provider.resolve_api_key().is_none());
        provider.api_key = Some("inline".into());
        assert_eq!(provider.resolve_api_key().as_deref(), Some("inline"));
    }

    #[test]
    fn test_provider_kind_names() {
        let parsed: ProviderKind = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(parsed, ProviderKind::OpenAi);
        assert_eq!(ProviderKind::Polling.to_string(), "polling");
    }
}
