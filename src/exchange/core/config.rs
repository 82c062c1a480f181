//! Configuration for the exchange engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::exchange::core::errors::ConfigError;
use crate::exchange::core::ids::SessionId;

/// Environment variable overriding the assistant base URL.
pub const BASE_URL_ENV: &str = "CONVERSE_BASE_URL";
/// Environment variable holding the bearer credential.
pub const AUTH_TOKEN_ENV: &str = "CONVERSE_AUTH_TOKEN";
/// Environment variable overriding the model label.
pub const MODEL_ENV: &str = "CONVERSE_MODEL";
/// Environment variable overriding the request timeout in seconds.
pub const TIMEOUT_ENV: &str = "CONVERSE_TIMEOUT_SECS";

/// Placeholder replaced by the session id in `exchange_path`.
const SESSION_PLACEHOLDER: &str = "{session_id}";

/// Configuration for the exchange engine and its HTTP transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the assistant service.
    pub base_url: String,
    /// Path template of the exchange endpoint; must contain `{session_id}`.
    pub exchange_path: String,
    /// Overall request timeout, covering the whole streamed body.
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
    /// Connection timeout.
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
    /// Bearer credential attached to every request.
    pub auth_token: Option<String>,
    /// Model label selected for new sessions.
    pub default_model: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            exchange_path: "/api/sessions/{session_id}/exchange".to_string(),
            request_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            auth_token: None,
            default_model: "default".to_string(),
        }
    }
}

impl EngineConfig {
    /// Create a new config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from `CONVERSE_*` environment variables over the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(base_url) = std::env::var(BASE_URL_ENV) {
            config.base_url = base_url;
        }
        if let Some(token) = std::env::var(AUTH_TOKEN_ENV)
            .ok()
            .filter(|token| !token.trim().is_empty())
        {
            config.auth_token = Some(token);
        }
        if let Ok(model) = std::env::var(MODEL_ENV) {
            config.default_model = model;
        }
        if let Some(secs) = std::env::var(TIMEOUT_ENV)
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
        {
            config.request_timeout = Duration::from_secs(secs);
        }
        config
    }

    /// Set the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the bearer credential.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set the default model label.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.base_url)?;

        if !self.exchange_path.contains(SESSION_PLACEHOLDER) {
            return Err(ConfigError::InvalidConfig(format!(
                "exchange_path must contain {SESSION_PLACEHOLDER}"
            )));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "request_timeout must be > 0".to_string(),
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "connect_timeout must be > 0".to_string(),
            ));
        }

        if self.default_model.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "default_model must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve the exchange endpoint for a session.
    ///
    /// # Errors
    /// Returns an error if the resulting URL is invalid.
    pub fn exchange_url(&self, session_id: &SessionId) -> Result<Url, url::ParseError> {
        let base = Url::parse(&self.base_url)?;
        let path = self
            .exchange_path
            .replace(SESSION_PLACEHOLDER, &urlencoding::encode(session_id.as_str()));
        base.join(&path)
    }
}

/// Serde module for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.auth_token, None);
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new()
            .with_base_url("https://chat.example.com")
            .with_timeout(Duration::from_secs(60))
            .with_auth_token("secret")
            .with_model("storyteller");

        assert_eq!(config.base_url, "https://chat.example.com");
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.default_model, "storyteller");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_url = EngineConfig::new().with_base_url("not a url");
        assert!(matches!(bad_url.validate(), Err(ConfigError::Url(_))));

        let mut no_placeholder = EngineConfig::new();
        no_placeholder.exchange_path = "/api/exchange".to_string();
        assert!(matches!(
            no_placeholder.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));

        let zero_timeout = EngineConfig::new().with_timeout(Duration::ZERO);
        assert!(zero_timeout.validate().is_err());
    }

    #[test]
    fn test_exchange_url_encodes_session_id() {
        let config = EngineConfig::new().with_base_url("http://localhost:8080");
        let url = config.exchange_url(&SessionId::from("a b/c")).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/api/sessions/a%20b%2Fc/exchange"
        );
    }

    #[test]
    fn test_timeouts_serialize_as_seconds() {
        let config = EngineConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["request_timeout"], 120);
        let back: EngineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
