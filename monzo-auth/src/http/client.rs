//! HTTP client builder for token endpoint calls.

use std::time::Duration;

use crate::error::{Error, ErrorKind, HttpErrorKind};

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout covering connect, send and body read.
    pub timeout: Duration,
    /// User agent string.
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("monzo-auth/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Builder for the `reqwest::Client` shared by provider calls.
///
/// Requests are never retried. A lost refresh response may already have spent
/// the refresh token.
pub struct HttpClientBuilder {
    config: HttpClientConfig,
}

impl HttpClientBuilder {
    /// Create a new client builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: HttpClientConfig::default(),
        }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the user agent string.
    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.config.user_agent = user_agent;
        self
    }

    /// Build the configured HTTP client.
    pub fn build(self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .timeout(self.config.timeout)
            .user_agent(self.config.user_agent)
            .build()
            .map_err(|e| Error {
                source: Some(Box::new(e)),
                error_kind: ErrorKind::Http(HttpErrorKind::BuilderFailed),
            })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
