//! Configuration of the agent and its tools.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The default system prompt template.
pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("./system_prompt.md");

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The environment variable holding a credential is unset or empty.
    #[error("`{key}` is not set, please set it in the environment or a `.env` file")]
    MissingCredential {
        /// Name of the environment variable.
        key: String,
    },
    /// The config file could not be read.
    #[error("failed to read config file at {}: {source}", path.display())]
    Read {
        /// Path of the config file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings of the chat model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Name of the environment variable holding the API key.
    pub key_name: String,
    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,
    /// Model name.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum number of tokens per response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            key_name: "DEEPSEEK_API_KEY".to_owned(),
            base_url: "https://api.deepseek.com".to_owned(),
            model: "deepseek-chat".to_owned(),
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

/// Settings of a session.
///
/// Every field has a default, so a config file only needs to list what it
/// changes:
///
/// ```toml
/// max_steps = 10
///
/// [model]
/// model = "deepseek-reasoner"
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Settings of the chat model.
    pub model: ModelConfig,
    /// System prompt template, `{system_time}` is replaced by the current
    /// time.
    pub system_prompt: String,
    /// Maximum number of results per web search.
    pub max_search_results: u32,
    /// Maximum number of model invocations per user input.
    pub max_steps: usize,
    /// Name of the environment variable holding the Tavily API key.
    pub search_key_name: String,
    /// Whether to keep conversations in long-term storage.
    pub long_term_memory: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            max_search_results: 10,
            max_steps: tern_core::DEFAULT_MAX_STEPS,
            search_key_name: "TAVILY_API_KEY".to_owned(),
            long_term_memory: false,
        }
    }
}

impl Config {
    /// Loads the configuration from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_toml(&content)?;
        debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Parses the configuration from a TOML string.
    #[inline]
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// Reads an API key from the environment.
///
/// This never touches the network, so a missing key is reported before any
/// request is made.
pub fn load_api_key(key_name: &str) -> Result<String, ConfigError> {
    check_api_key(key_name, env::var(key_name).ok())
}

fn check_api_key(
    key_name: &str,
    value: Option<String>,
) -> Result<String, ConfigError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingCredential {
            key: key_name.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.model.key_name, "DEEPSEEK_API_KEY");
        assert_eq!(config.model.base_url, "https://api.deepseek.com");
        assert_eq!(config.model.model, "deepseek-chat");
        assert_eq!(config.model.temperature, 0.7);
        assert_eq!(config.model.max_tokens, None);
        assert_eq!(config.max_search_results, 10);
        assert_eq!(config.max_steps, 25);
        assert!(!config.long_term_memory);
        assert!(config.system_prompt.contains("{system_time}"));
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml(
            r#"
max_steps = 5

[model]
model = "deepseek-reasoner"
max_tokens = 2048
"#,
        )
        .unwrap();
        assert_eq!(config.max_steps, 5);
        assert_eq!(config.model.model, "deepseek-reasoner");
        assert_eq!(config.model.max_tokens, Some(2048));
        assert_eq!(config.model.base_url, "https://api.deepseek.com");
        assert_eq!(config.search_key_name, "TAVILY_API_KEY");
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml("max_steps = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_credential() {
        let err = load_api_key("TERN_TEST_SURELY_UNSET_KEY").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingCredential { ref key } if key == "TERN_TEST_SURELY_UNSET_KEY"
        ));

        assert!(check_api_key("KEY", Some("  ".to_owned())).is_err());
        assert_eq!(check_api_key("KEY", Some("sk-1".to_owned())).unwrap(), "sk-1");
    }
}
