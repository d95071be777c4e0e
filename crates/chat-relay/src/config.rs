use std::env;
use std::net::{AddrParseError, SocketAddr};

use axum::http::HeaderValue;
use chat_relay_openai_model::{OpenAIConfig, OpenAIConfigBuilder};

const DEFAULT_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_ALLOWED_ORIGINS: &str =
    "http://localhost:5173,http://127.0.0.1:5173";

/// Error type for [`ServerConfig`] loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The listen address is not a socket address.
    #[error("invalid listen address `{value}`: {source}")]
    InvalidAddr {
        /// The rejected value.
        value: String,
        /// The parse failure.
        source: AddrParseError,
    },
    /// An allowed origin is not a valid header value.
    #[error("invalid allowed origin `{0}`")]
    InvalidOrigin(String),
}

/// Server configuration, read once at start-up.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the server listens on.
    pub addr: SocketAddr,
    /// Origins allowed to make cross-origin requests.
    pub allowed_origins: Vec<HeaderValue>,
    /// Upstream model server configuration.
    pub openai: OpenAIConfig,
}

impl ServerConfig {
    /// Reads the configuration from the process environment.
    ///
    /// Recognized variables are `CHAT_RELAY_ADDR`,
    /// `CHAT_RELAY_ALLOWED_ORIGINS`, `OPENAI_BASE_URL`, `OPENAI_API_KEY`
    /// and `OPENAI_MODEL`. Unset variables take their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value
    /// of a variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let addr = var("CHAT_RELAY_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_owned());
        let addr: SocketAddr = addr
            .trim()
            .parse()
            .map_err(|source| ConfigError::InvalidAddr {
                value: addr.clone(),
                source,
            })?;

        let allowed_origins = var("CHAT_RELAY_ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.to_owned())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .map_err(|_| ConfigError::InvalidOrigin(origin.to_owned()))
            })
            .collect::<Result<_, _>>()?;

        let mut openai = OpenAIConfigBuilder::default();
        if let Some(api_key) = var("OPENAI_API_KEY") {
            openai = OpenAIConfigBuilder::with_api_key(api_key);
        }
        if let Some(base_url) = var("OPENAI_BASE_URL") {
            openai = openai.with_base_url(base_url);
        }
        if let Some(model) = var("OPENAI_MODEL") {
            openai = openai.with_model(model);
        }

        Ok(Self {
            addr,
            allowed_origins,
            openai: openai.build(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.addr, "0.0.0.0:8000".parse().unwrap());
        assert_eq!(
            config.allowed_origins,
            vec![
                HeaderValue::from_static("http://localhost:5173"),
                HeaderValue::from_static("http://127.0.0.1:5173"),
            ]
        );
        assert_eq!(config.openai.base_url(), "http://localhost:1234/v1");
        assert_eq!(config.openai.model(), "local-model");
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("CHAT_RELAY_ADDR", "127.0.0.1:9000"),
            ("CHAT_RELAY_ALLOWED_ORIGINS", " https://chat.example.com ,"),
            ("OPENAI_BASE_URL", "http://10.0.0.2:1234/v1/"),
            ("OPENAI_MODEL", "qwen2.5-7b-instruct"),
            ("OPENAI_API_KEY", ""),
        ])
        .unwrap();
        assert_eq!(config.addr.port(), 9000);
        assert_eq!(
            config.allowed_origins,
            vec![HeaderValue::from_static("https://chat.example.com")]
        );
        assert_eq!(config.openai.base_url(), "http://10.0.0.2:1234/v1");
        assert_eq!(config.openai.model(), "qwen2.5-7b-instruct");
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            load(&[("CHAT_RELAY_ADDR", "localhost")]),
            Err(ConfigError::InvalidAddr { .. })
        ));
        assert!(matches!(
            load(&[("CHAT_RELAY_ALLOWED_ORIGINS", "http://a\nb")]),
            Err(ConfigError::InvalidOrigin(_))
        ));
    }
}
