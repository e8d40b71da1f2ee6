//! Session-Token Acquisition
//!
//! Fetches a short-lived session token from the provider's auth endpoint.
//! Two authentication shapes exist: the default API-key query parameter,
//! and the browser-compatible `Authorization: Public` header selected by
//! `is_public_key`.
//!
//! Tokens are reused across reconnects until they are more than 24 hours
//! old; the session controller decides when to call back in here.

use std::time::Duration;

use crate::config::{Config, ConfigError, Credentials};
use crate::provider::Provider;

/// Default timeout for one auth request. The retry driver owns the larger
/// picture; this only bounds a single hung request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors from token acquisition.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The server rejected the access key (HTTP 401).
    #[error("unauthorized: the access key was rejected (HTTP 401)")]
    Unauthorized,

    /// The server answered with an unexpected status.
    #[error("auth endpoint returned HTTP {0}")]
    UnexpectedStatus(u16),

    /// The server returned an empty token body.
    #[error("auth endpoint returned an empty token")]
    EmptyToken,

    /// Transport-level failure (DNS, TLS, timeout, connection reset).
    #[error("auth transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl AuthError {
    /// Whether this failure means the credentials themselves are bad.
    /// Everything else is transient and worth retrying.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

/// HTTP client for the provider auth endpoint.
pub struct AuthClient {
    http: reqwest::Client,
    credentials: Credentials,
    provider: Provider,
    manual_host: Option<String>,
    is_public_key: bool,
    client_info: String,
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("provider", &self.provider)
            .field("is_public_key", &self.is_public_key)
            .finish_non_exhaustive()
    }
}

impl AuthClient {
    /// Build an auth client for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(credentials: Credentials, config: &Config) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            http,
            credentials,
            provider: config.provider,
            manual_host: config.ip_address.clone(),
            is_public_key: config.is_public_key,
            client_info: crate::client_information(),
        })
    }

    /// Fetch a fresh session token.
    ///
    /// # Errors
    ///
    /// `Unauthorized` on HTTP 401; `UnexpectedStatus`, `EmptyToken` or
    /// `Transport` for everything the retry driver should treat as
    /// transient.
    pub async fn fetch_token(&self) -> Result<String, AuthError> {
        let url = self.provider.auth_url(self.manual_host.as_deref());
        tracing::debug!(provider = %self.provider, %url, "requesting session token");

        let mut request = self
            .http
            .get(&url)
            .header("Client-Information", &self.client_info);

        if self.is_public_key {
            request = request.header(
                "Authorization",
                format!("Public {}", self.credentials.access_key()),
            );
        } else {
            request = request.query(&[("api_key", self.credentials.access_key())]);
        }

        let response = request.send().await?;
        let status = response.status();

        match status.as_u16() {
            200 => {
                let token = response.text().await?;
                let token = token.trim().to_string();
                if token.is_empty() {
                    return Err(AuthError::EmptyToken);
                }
                tracing::info!(provider = %self.provider, "session token acquired");
                Ok(token)
            }
            401 => {
                tracing::error!(
                    provider = %self.provider,
                    "auth rejected the access key (HTTP 401); check credentials"
                );
                Err(AuthError::Unauthorized)
            }
            other => {
                tracing::warn!(provider = %self.provider, status = other, "unexpected auth status");
                Err(AuthError::UnexpectedStatus(other))
            }
        }
    }

    /// The access key in use (needed by the replay file API).
    #[must_use]
    pub fn access_key(&self) -> &str {
        self.credentials.access_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP responder; returns the request head it saw.
    async fn mock_auth_server(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::sync::oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head_bytes = Vec::new();
            let mut buf = [0u8; 1024];
            while !head_bytes.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head_bytes.extend_from_slice(&buf[..n]);
            }
            let head = String::from_utf8_lossy(&head_bytes).to_string();

            let response = format!(
                "{status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(head);
        });

        (format!("127.0.0.1:{}", addr.port()), rx)
    }

    fn manual_config(host: &str, is_public_key: bool) -> Config {
        Config {
            provider: Provider::Manual,
            ip_address: Some(host.to_string()),
            is_public_key,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn token_via_api_key_query() {
        let (host, request_rx) = mock_auth_server("HTTP/1.1 200 OK", "tok-abc123").await;
        let credentials = Credentials::new("my-key").unwrap();
        let auth = AuthClient::new(credentials, &manual_config(&host, false)).unwrap();

        let token = auth.fetch_token().await.unwrap();
        assert_eq!(token, "tok-abc123");

        let head = request_rx.await.unwrap();
        assert!(head.starts_with("GET /auth?api_key=my-key"));
        assert!(head.contains("client-information:") || head.contains("Client-Information:"));
        assert!(!head.contains("Authorization"));
    }

    #[tokio::test]
    async fn token_via_public_key_header() {
        let (host, request_rx) = mock_auth_server("HTTP/1.1 200 OK", "tok-xyz").await;
        let credentials = Credentials::new("pub-key").unwrap();
        let auth = AuthClient::new(credentials, &manual_config(&host, true)).unwrap();

        let token = auth.fetch_token().await.unwrap();
        assert_eq!(token, "tok-xyz");

        let head = request_rx.await.unwrap();
        assert!(head.starts_with("GET /auth "));
        assert!(head.to_lowercase().contains("authorization: public pub-key"));
        assert!(!head.contains("api_key="));
    }

    #[tokio::test]
    async fn http_401_is_unauthorized() {
        let (host, _rx) = mock_auth_server("HTTP/1.1 401 Unauthorized", "").await;
        let credentials = Credentials::new("bad-key").unwrap();
        let auth = AuthClient::new(credentials, &manual_config(&host, false)).unwrap();

        let err = auth.fetch_token().await.unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn http_5xx_is_transient() {
        let (host, _rx) = mock_auth_server("HTTP/1.1 503 Service Unavailable", "").await;
        let credentials = Credentials::new("key").unwrap();
        let auth = AuthClient::new(credentials, &manual_config(&host, false)).unwrap();

        let err = auth.fetch_token().await.unwrap_err();
        assert!(matches!(err, AuthError::UnexpectedStatus(503)));
        assert!(!err.is_unauthorized());
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let (host, _rx) = mock_auth_server("HTTP/1.1 200 OK", "  ").await;
        let credentials = Credentials::new("key").unwrap();
        let auth = AuthClient::new(credentials, &manual_config(&host, false)).unwrap();

        let err = auth.fetch_token().await.unwrap_err();
        assert!(matches!(err, AuthError::EmptyToken));
    }
}
