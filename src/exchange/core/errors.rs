//! Error types for the exchange engine.

use std::fmt;

use thiserror::Error;

use crate::exchange::core::ids::ExchangeId;

/// Summary shown to the user whenever an exchange is rolled back.
pub const EXCHANGE_FAILED: &str = "exchange failed";

/// Errors raised while opening or reading the response stream.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connect, reset, timeout, body read).
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// HTTP client configuration error.
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// The server answered with a non-success status.
    #[error("server returned status {0}")]
    Status(u16),

    /// The engine configuration was rejected.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Endpoint URL could not be built.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The body ended before a terminal frame arrived.
    #[error("response stream ended before completion")]
    Truncated,

    /// Generic transport failure.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Check if the server refused the credential.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Status(401 | 403))
    }

    /// Check if the request timed out at the HTTP client.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::HttpRequest(err) if err.is_timeout())
    }
}

/// Violations of the conversation log invariants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A speculative pair is already pending.
    #[error("a speculative exchange is already pending")]
    SpeculativePending,
    /// A speculative assistant message must follow a speculative user message.
    #[error("speculative assistant message without a preceding speculative user message")]
    OrphanAssistant,
    /// The trailing message is not the speculative assistant slot.
    #[error("no speculative assistant message to update")]
    NoSpeculativeAssistant,
    /// The exchange is no longer the active one.
    #[error("exchange {0} is not active")]
    StaleExchange(ExchangeId),
    /// Seeded history contained a speculative message.
    #[error("history may only contain committed messages")]
    SpeculativeHistory,
}

/// Reasons an exchange was rolled back.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The transport failed to open or read the stream.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    /// The server sent an `error` frame.
    #[error("assistant reported an error: {0}")]
    Protocol(String),
    /// The log rejected a mutation.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

impl ExchangeError {
    /// Build the notice shown to the user for this failure.
    #[must_use]
    pub fn notice(&self) -> FailureNotice {
        let detail = match self {
            Self::Protocol(message) => Some(message.clone()),
            Self::Transport(err) if err.is_auth_failure() => Some("not authorized".to_string()),
            Self::Transport(_) | Self::Session(_) => None,
        };
        FailureNotice { detail }
    }
}

/// Transient, user-facing failure notice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureNotice {
    /// Server-supplied or derived detail, if any.
    pub detail: Option<String>,
}

impl fmt::Display for FailureNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{EXCHANGE_FAILED}: {detail}"),
            None => f.write_str(EXCHANGE_FAILED),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

/// Convenience result alias for exchange operations.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Convenience result alias for log mutations.
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_statuses_are_flagged() {
        assert!(TransportError::Status(401).is_auth_failure());
        assert!(TransportError::Status(403).is_auth_failure());
        assert!(!TransportError::Status(500).is_auth_failure());
        assert!(!TransportError::Truncated.is_auth_failure());
        assert!(!TransportError::Truncated.is_timeout());
    }

    #[test]
    fn test_config_error_keeps_its_source() {
        let err = TransportError::from(ConfigError::InvalidConfig("bad".to_string()));
        assert!(matches!(err, TransportError::Config(ConfigError::InvalidConfig(_))));
        assert_eq!(
            err.to_string(),
            "configuration error: invalid configuration: bad"
        );
    }

    #[test]
    fn test_protocol_notice_carries_server_message() {
        let notice = ExchangeError::Protocol("boom".to_string()).notice();
        assert_eq!(notice.detail.as_deref(), Some("boom"));
        assert_eq!(notice.to_string(), "exchange failed: boom");
    }

    #[test]
    fn test_transport_notice_is_generic() {
        let notice = ExchangeError::from(TransportError::Status(502)).notice();
        assert_eq!(notice.detail, None);
        assert_eq!(notice.to_string(), EXCHANGE_FAILED);
    }
}
