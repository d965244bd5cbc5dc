//! OAuth provider trait and types.

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Deserialize;

use super::token::{RefreshResult, Tokens};
use crate::config::ClientConfig;
use crate::error::Error;

/// Authorization request with URL and the state it is bound to.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Authorization URL to redirect the user to.
    pub url: String,
    /// CSRF state parameter for validation.
    pub state: String,
}

/// Body of a successful response from an OAuth2 token endpoint.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Trait for OAuth 2.0 providers.
///
/// Implementations handle the provider side of the flow:
/// - Authorization URL generation
/// - Authorization code exchange for tokens
/// - Token refresh
///
/// Every call receives the client configuration read for the current operation;
/// providers hold no credentials of their own.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate the authorization URL for `state`.
    fn authorization_url(
        &self,
        config: &ClientConfig,
        state: &str,
    ) -> Result<AuthorizationRequest, Error>;

    /// Exchange authorization code for access and refresh tokens.
    ///
    /// Fails with `ExchangeFailed` when the provider rejects the code or returns
    /// an unreadable body, and with an `Http` kind for network failures.
    async fn exchange_code(&self, config: &ClientConfig, code: &str) -> Result<Tokens, Error>;

    /// Refresh an access token using a refresh token.
    ///
    /// Fails with `RefreshFailed` only when the provider rejected the refresh
    /// token; server errors and network failures use `Http` kinds.
    async fn refresh_token(
        &self,
        config: &ClientConfig,
        refresh_token: &SecretString,
    ) -> Result<RefreshResult, Error>;
}
