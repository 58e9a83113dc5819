//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/chaplin/config.toml)
//! 3. Project config (.chaplin/config.toml)
//! 4. Environment variables (CHAPLIN_* prefix, `__` between nested keys)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::Config;
use crate::types::{ChaplinError, Result};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain using Figment:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(&project_path));
        }

        // e.g. CHAPLIN_ENGINE__AGENT_MAX_TOKENS -> engine.agent_max_tokens
        figment = figment.merge(Self::env_provider());

        let config: Config = figment
            .extract()
            .map_err(|e| ChaplinError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file only
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| ChaplinError::Config(format!("Configuration error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn env_provider() -> Env {
        Env::prefixed("CHAPLIN_").split("__").lowercase(true)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Get path to global config directory (~/.config/chaplin/)
    pub fn global_dir() -> Option<PathBuf> {
        env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".config"))
            })
            .map(|p| p.join("chaplin"))
    }

    /// Get path to global config file
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    /// Get path to project config file
    pub fn project_config_path() -> PathBuf {
        Self::project_dir().join("config.toml")
    }

    /// Get project data directory
    pub fn project_dir() -> PathBuf {
        PathBuf::from(".chaplin")
    }

    // =========================================================================
    // Config Commands
    // =========================================================================

    /// Show config file paths
    pub fn show_path() {
        println!("Configuration paths:");
        println!();

        if let Some(global) = Self::global_config_path() {
            let exists = if global.exists() { "✓" } else { "✗" };
            println!("  Global:  {} {}", exists, global.display());
        } else {
            println!("  Global:  (not available)");
        }

        let project = Self::project_config_path();
        let exists = if project.exists() { "✓" } else { "✗" };
        println!("  Project: {} {}", exists, project.display());
    }

    /// Show current effective configuration
    pub fn show_config(as_json: bool) -> Result<()> {
        let config = Self::load()?;

        if as_json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config).map_err(|e| ChaplinError::Config(e.to_string()))?
            );
        }

        Ok(())
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Initialize global configuration
    pub fn init_global(force: bool) -> Result<PathBuf> {
        let global_dir = Self::global_dir().ok_or_else(|| {
            ChaplinError::Config("Cannot determine global config directory".to_string())
        })?;

        fs::create_dir_all(&global_dir)?;

        let config_path = global_dir.join("config.toml");
        if !config_path.exists() || force {
            fs::write(&config_path, Self::default_global_config())?;
            info!("Created global config: {}", config_path.display());
        } else {
            info!("Global config exists: {}", config_path.display());
        }

        Ok(global_dir)
    }

    /// Initialize project configuration
    pub fn init_project() -> Result<PathBuf> {
        let project_dir = Self::project_dir();
        fs::create_dir_all(&project_dir)?;

        let config_path = project_dir.join("config.toml");
        if !config_path.exists() {
            fs::write(&config_path, Self::default_project_config())?;
            info!("Created project config: {}", config_path.display());
        }

        Ok(project_dir)
    }

    // =========================================================================
    // Internal
    // =========================================================================

    /// Generate default global config content (TOML)
    fn default_global_config() -> String {
        r#"# Chaplin Global Configuration
# User-wide defaults. Project settings in .chaplin/config.toml override these.

version = "1.0"

# Provider priority per session size
[routing]
small = ["cortensor", "geminiflash", "geminipro"]
big = ["geminipro", "geminiflash", "cortensor"]

[providers.geminiflash]
kind = "gemini"
model = "gemini-2.5-flash"
api_key_env = "GENAI_API_KEY"
"#
        .to_string()
    }

    /// Generate default project config content (TOML)
    fn default_project_config() -> String {
        r#"# Chaplin Project Configuration
# Project-specific settings that override global defaults.

version = "1.0"

[engine]
agent_max_tokens = 800
agent_temperature = 0.7
agent_max_attempts = 3
integrator_max_attempts = 3

[storage]
path = ".chaplin/jobs.db"
job_ttl_secs = 3600

# Signing keys are best supplied via CHAPLIN_SIGNING__CURRENT_KEY / CHAPLIN_SIGNING__NEXT_KEY
[signing]
clock_tolerance_secs = 0
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_file_merges_over_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[routing]
small = ["ollama"]

[engine]
agent_max_attempts = 5

[providers.local]
kind = "ollama"
model = "qwen2.5"
"#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.routing.small, vec!["ollama".to_string()]);
        assert_eq!(config.routing.big.len(), 3);
        assert_eq!(config.engine.agent_max_attempts, 5);
        assert_eq!(config.engine.agent_max_tokens, 800);
        assert_eq!(config.providers["local"].kind, ProviderKind::Ollama);
        assert!(config.providers.contains_key("geminipro"));
    }

    #[test]
    fn test_load_from_file_validates() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[engine]\nagent_temperature = 5.0\n").unwrap();
        assert!(ConfigLoader::load_from_file(&path).is_err());
    }

    #[test]
    fn test_default_templates_parse() {
        let temp_dir = TempDir::new().unwrap();
        for (name, content) in [
            ("global.toml", ConfigLoader::default_global_config()),
            ("project.toml", ConfigLoader::default_project_config()),
        ] {
            let path = temp_dir.path().join(name);
            fs::write(&path, content).unwrap();
            assert!(ConfigLoader::load_from_file(&path).is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_env_nested_keys() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("CHAPLIN_ENGINE__AGENT_MAX_TOKENS", "1200");
            jail.set_env("CHAPLIN_POLLING__INTERVAL_SECS", "2");
            let config: Config = Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(ConfigLoader::env_provider())
                .extract()?;
            assert_eq!(config.engine.agent_max_tokens, 1200);
            assert_eq!(config.polling.interval_secs, 2);
            Ok(())
        });
    }
}
