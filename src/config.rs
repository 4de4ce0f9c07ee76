//! Configuration for the search service.
//!
//! Loads TOML with environment variable substitution in the format
//! `${VAR_NAME}`. A missing config file is not an error; every section has
//! working local-development defaults.
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 8080
//!
//! [broker]
//! url = "redis://localhost:6379"
//!
//! [index]
//! url = "http://localhost:8108"
//! api_key = "${TYPESENSE_API_KEY}"
//!
//! [consumer]
//! on_missing_update = "drop"
//! ```

use std::env;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consumer::MissingUpdatePolicy;
use crate::DEFAULT_CONSUMER_GROUP;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AgoraConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub consumer: ConsumerConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

/// Broker configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_url")]
    pub url: String,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Base consumer name; defaults to hostname when unset
    #[serde(default)]
    pub consumer_name: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            consumer_group: default_consumer_group(),
            consumer_name: None,
        }
    }
}

fn default_broker_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_consumer_group() -> String {
    DEFAULT_CONSUMER_GROUP.to_string()
}

/// Search index configuration
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_url")]
    pub url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_index_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: default_index_url(),
            api_key: String::new(),
            timeout_ms: default_index_timeout_ms(),
        }
    }
}

fn default_index_url() -> String {
    "http://localhost:8108".to_string()
}

fn default_index_timeout_ms() -> u64 {
    5000
}

/// Consumer tuning
#[derive(Debug, Deserialize, Clone)]
pub struct ConsumerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_block_ms")]
    pub block_ms: u64,

    /// What to do with an update for a document missing from the index
    #[serde(default)]
    pub on_missing_update: MissingUpdatePolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            block_ms: default_block_ms(),
            on_missing_update: MissingUpdatePolicy::default(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_block_ms() -> u64 {
    2000
}

impl AgoraConfig {
    /// Load configuration from the default path or `AGORA_CONFIG` env var.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var("AGORA_CONFIG").unwrap_or_else(|_| "config/agora.toml".to_string());

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        let content = substitute_env_vars(&content);

        let config: AgoraConfig = toml::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.broker.url.starts_with("redis://") && !self.broker.url.starts_with("rediss://") {
            return Err(ConfigError::ValidationError(format!(
                "Broker URL must start with redis:// or rediss://, got '{}'",
                self.broker.url
            )));
        }

        if !self.index.url.starts_with("http://") && !self.index.url.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "Index URL must start with http:// or https://, got '{}'",
                self.index.url
            )));
        }

        if self.index.api_key.is_empty() {
            warn!("Index API key is empty");
        } else if self.index.api_key.contains("${") {
            warn!(
                key = %self.index.api_key,
                "Index API key contains an unsubstituted environment variable"
            );
        }

        if self.consumer.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "Consumer batch size must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                caps[0].to_string()
            }
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("AGORA_TEST_KEY", "secret");
        let input = "api_key = \"${AGORA_TEST_KEY}\"";
        let output = substitute_env_vars(input);
        assert_eq!(output, "api_key = \"secret\"");
        env::remove_var("AGORA_TEST_KEY");
    }

    #[test]
    fn test_env_var_not_set_keeps_placeholder() {
        let input = "api_key = \"${AGORA_NONEXISTENT_VAR}\"";
        let output = substitute_env_vars(input);
        assert_eq!(output, "api_key = \"${AGORA_NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_default_config() {
        let config = AgoraConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.broker.url, "redis://localhost:6379");
        assert_eq!(config.broker.consumer_group, "search_indexers");
        assert_eq!(config.index.url, "http://localhost:8108");
        assert_eq!(config.consumer.batch_size, 10);
        assert_eq!(
            config.consumer.on_missing_update,
            MissingUpdatePolicy::Drop
        );
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
            [server]
            port = 9090

            [consumer]
            on_missing_update = "resurrect"
        "#;

        let config: AgoraConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(
            config.consumer.on_missing_update,
            MissingUpdatePolicy::Resurrect
        );
        // Untouched sections keep their defaults
        assert_eq!(config.broker.url, "redis://localhost:6379");
    }

    #[test]
    fn test_validation_rejects_bad_broker_url() {
        let toml = r#"
            [broker]
            url = "amqp://localhost"
        "#;

        let config: AgoraConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_index_url() {
        let toml = r#"
            [index]
            url = "localhost:8108"
        "#;

        let config: AgoraConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_batch_size() {
        let toml = r#"
            [consumer]
            batch_size = 0
        "#;

        let config: AgoraConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = AgoraConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.server.port, 8080);
    }
}
