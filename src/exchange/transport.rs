//! Transport capability that turns a submission into a response byte stream.

use std::future::Future;
use std::pin::Pin;

use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Serialize;

use crate::exchange::core::config::EngineConfig;
use crate::exchange::core::errors::TransportError;
use crate::exchange::core::ids::SessionId;

/// Response body as a stream of raw chunks.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// Boxed future type for transport operations.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Opens the streamed response of one exchange.
pub trait Transport: Send + Sync {
    /// Send `text` for `session_id` and return the response body.
    ///
    /// # Errors
    /// Fails fast on connection errors and on any non-success status,
    /// authorization failures included.
    fn open_stream<'a>(
        &'a self,
        session_id: &'a SessionId,
        text: &'a str,
    ) -> TransportFuture<'a, Result<ByteStream, TransportError>>;
}

/// Request body of the exchange endpoint.
#[derive(Debug, Serialize)]
struct ExchangeRequest<'a> {
    content: &'a str,
}

/// `reqwest`-backed transport for the exchange endpoint.
pub struct HttpTransport {
    config: EngineConfig,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport from a validated configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be created.
    pub fn new(config: EngineConfig) -> Result<Self, TransportError> {
        config.validate()?;
        let client = Self::build_client(&config)?;
        Ok(Self { config, client })
    }

    /// Build an HTTP client with the credential and timeouts applied.
    fn build_client(config: &EngineConfig) -> Result<reqwest::Client, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        if let Some(token) = &config.auth_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TransportError::HttpClient(format!("invalid auth token: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| TransportError::HttpClient(e.to_string()))
    }
}

impl Transport for HttpTransport {
    fn open_stream<'a>(
        &'a self,
        session_id: &'a SessionId,
        text: &'a str,
    ) -> TransportFuture<'a, Result<ByteStream, TransportError>> {
        Box::pin(async move {
            let url = self.config.exchange_url(session_id)?;
            tracing::debug!(%url, "opening exchange stream");

            let response = self
                .client
                .post(url)
                .json(&ExchangeRequest { content: text })
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Status(status.as_u16()));
            }

            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(TransportError::from));
            Ok(body.boxed())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::net::TcpListener;

    use crate::exchange::core::errors::ConfigError;

    #[test]
    fn test_transport_creation() {
        let transport = HttpTransport::new(EngineConfig::default().with_auth_token("t0k3n"));
        assert!(transport.is_ok());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = HttpTransport::new(EngineConfig::default().with_base_url("::nope::"));
        assert!(matches!(
            result,
            Err(TransportError::Config(ConfigError::Url(_)))
        ));
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(ExchangeRequest { content: "Hi" }).unwrap();
        assert_eq!(body, serde_json::json!({ "content": "Hi" }));
    }

    #[tokio::test]
    async fn test_connection_refused_is_a_transport_error() {
        let config = EngineConfig::default().with_base_url("http://127.0.0.1:9");
        let transport = HttpTransport::new(config).unwrap();
        let result = transport
            .open_stream(&SessionId::from("s"), "hello")
            .await;
        assert!(matches!(result, Err(TransportError::HttpRequest(_))));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = EngineConfig::default()
            .with_base_url(format!("http://{addr}"))
            .with_timeout(Duration::from_millis(200));
        let transport = HttpTransport::new(config).unwrap();
        let Err(err) = transport.open_stream(&SessionId::from("s"), "hello").await else {
            panic!("a silent server must not produce a stream");
        };
        assert!(err.is_timeout(), "unexpected error: {err}");
    }
}
