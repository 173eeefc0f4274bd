//! TOML configuration
//!
//! ```toml
//! [gateway]
//! provider = "internal"
//! api_url = "$LLM_API_URL"
//! api_key = "$LLM_API_KEY"
//! model = "llama3.1"
//!
//! [retry]
//! max_attempts = 3
//!
//! [refine]
//! max_iterations = 2
//!
//! [trace]
//! dir = "rulecraft-runs"
//! ```
//!
//! String values starting with `$` name an environment variable. An unset
//! variable leaves the literal value in place.

use rulecraft_error::{Error, Result};
use rulecraft_llm::{ProviderConfig, ProviderType, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "rulecraft.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub retry: RetryConfig,
    pub refine: RefineConfig,
    pub trace: TraceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub provider: ProviderType,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub headers: HashMap<String, String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            provider: ProviderType::Internal,
            api_url: None,
            api_key: None,
            model: None,
            temperature: None,
            max_tokens: None,
            timeout_secs: None,
            headers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    pub max_iterations: usize,
    /// Extra instruction for the initial prompt
    pub focus: Option<String>,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 2,
            focus: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("rulecraft-runs"),
        }
    }
}

/// Resolve `$NAME` against the environment
pub fn expand_env(value: &str) -> String {
    match value.strip_prefix('$') {
        Some(name) if !name.is_empty() => std::env::var(name).unwrap_or_else(|_| value.to_string()),
        _ => value.to_string(),
    }
}

fn expand_opt(value: &mut Option<String>) {
    if let Some(v) = value {
        *v = expand_env(v);
    }
}

impl Config {
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).map_err(|e| {
            Error::config_invalid("invalid configuration")
                .with_operation("config::parse")
                .set_source(e)
        })?;
        config.expand();
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::from(e)
                .with_operation("config::load")
                .with_context("path", path.display().to_string())
        })?;
        Self::parse(&content).map_err(|e| e.with_context("path", path.display().to_string()))
    }

    /// Load `explicit` if given, else `rulecraft.toml` when present, else defaults
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn expand(&mut self) {
        let gateway = &mut self.gateway;
        expand_opt(&mut gateway.api_url);
        expand_opt(&mut gateway.api_key);
        expand_opt(&mut gateway.model);
        for value in gateway.headers.values_mut() {
            *value = expand_env(value);
        }
        expand_opt(&mut self.refine.focus);
    }
}

impl GatewayConfig {
    /// Provider settings for the configured backend
    pub fn provider_config(&self) -> Result<ProviderConfig> {
        let mut config = match self.provider {
            ProviderType::Internal => {
                let url = self.api_url.clone().filter(|u| !u.starts_with('$')).ok_or_else(|| {
                    Error::config_invalid("gateway.api_url is required for the internal provider")
                        .with_operation("config::provider")
                })?;
                ProviderConfig::internal(url, self.api_key.clone().unwrap_or_default())
            }
            ProviderType::OpenAI => {
                let key = self
                    .api_key
                    .clone()
                    .unwrap_or_else(|| expand_env("$OPENAI_API_KEY"));
                if key.starts_with('$') {
                    return Err(Error::config_invalid(
                        "gateway.api_key or OPENAI_API_KEY is required for the openai provider",
                    )
                    .with_operation("config::provider"));
                }
                let mut config = ProviderConfig::openai(key);
                if let Some(url) = &self.api_url {
                    config = config.with_base_url(url.trim_end_matches('/'));
                }
                config
            }
            ProviderType::Ollama => {
                let mut config = ProviderConfig::ollama(self.model.as_deref().unwrap_or("llama3.1"));
                if let Some(url) = &self.api_url {
                    config = config.with_base_url(url.trim_end_matches('/'));
                }
                config
            }
        };

        if let Some(model) = &self.model {
            config = config.with_model(model);
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(secs);
        }
        if self.temperature.is_some() {
            config.temperature = self.temperature;
        }
        if self.max_tokens.is_some() {
            config.max_tokens = self.max_tokens;
        }
        for (key, value) in &self.headers {
            config = config.with_header(key, value);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulecraft_error::ErrorKind;

    #[test]
    fn test_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.gateway.provider, ProviderType::Internal);
        assert_eq!(config.refine.max_iterations, 2);
        assert!(config.trace.enabled);
        assert_eq!(config.retry.policy(), RetryPolicy::default());
    }

    #[test]
    fn test_parse_tables() {
        let config = Config::parse(
            r#"
            [gateway]
            provider = "ollama"
            model = "qwen2.5"
            timeout_secs = 60

            [retry]
            max_attempts = 0

            [refine]
            max_iterations = 5

            [trace]
            enabled = false
            dir = "/tmp/runs"
            "#,
        )
        .unwrap();

        assert_eq!(config.gateway.provider, ProviderType::Ollama);
        assert_eq!(config.refine.max_iterations, 5);
        assert!(!config.trace.enabled);
        assert_eq!(config.trace.dir, PathBuf::from("/tmp/runs"));
        assert_eq!(config.retry.policy().max_attempts, 1);

        let provider = config.gateway.provider_config().unwrap();
        assert_eq!(provider.default_model.as_deref(), Some("qwen2.5"));
        assert_eq!(provider.timeout_secs, Some(60));
    }

    #[test]
    fn test_env_expansion() {
        std::env::set_var("RULECRAFT_TEST_API_URL", "https://llm.internal");
        let config = Config::parse(
            r#"
            [gateway]
            api_url = "$RULECRAFT_TEST_API_URL"
            api_key = "$RULECRAFT_TEST_UNSET_KEY"
            "#,
        )
        .unwrap();

        assert_eq!(config.gateway.api_url.as_deref(), Some("https://llm.internal"));
        assert_eq!(config.gateway.api_key.as_deref(), Some("$RULECRAFT_TEST_UNSET_KEY"));
        assert_eq!(expand_env("plain"), "plain");
        assert_eq!(expand_env("$"), "$");
    }

    #[test]
    fn test_internal_requires_api_url() {
        let err = GatewayConfig::default().provider_config().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);

        let gateway = GatewayConfig {
            api_url: Some("https://llm.internal".into()),
            api_key: Some("secret".into()),
            max_tokens: Some(512),
            ..GatewayConfig::default()
        };
        let provider = gateway.provider_config().unwrap();
        assert_eq!(provider.base_url.as_deref(), Some("https://llm.internal"));
        assert_eq!(provider.max_tokens, Some(512));
        assert_eq!(provider.headers.get("X_UID").map(String::as_str), Some("TESTUSE"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::parse("[refine]\nmax_iterations = \"two\"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("absent.toml")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);

        let path = dir.path().join("rulecraft.toml");
        std::fs::write(&path, "[refine]\nmax_iterations = 4\n").unwrap();
        assert_eq!(Config::discover(Some(&path)).unwrap().refine.max_iterations, 4);
    }
}
