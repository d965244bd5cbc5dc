//! Monzo OAuth provider implementation.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{
    config_error, oauth_error, provider_error, ConfigErrorKind, Error, ErrorKind, HttpErrorKind,
    OAuthErrorKind,
};
use crate::oauth::provider::TokenResponse;
use crate::oauth::token::{RefreshResult, Tokens};
use crate::oauth::AuthorizationRequest;

/// Request to exchange authorization code for tokens
#[derive(Serialize)]
struct TokenExchangeRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    redirect_uri: &'a str,
    code: &'a str,
}

/// Request to refresh access token
#[derive(Serialize)]
struct TokenRefreshRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
}

/// OAuth error codes meaning the refresh token itself is no longer accepted.
const REJECTION_ERROR_CODES: &[&str] = &["invalid_grant", "invalid_token"];

/// Error body of a refused token request
#[derive(Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: Option<String>,
}

/// Monzo OAuth provider.
///
/// Handles OAuth 2.0 flows for Monzo accounts, including:
/// - Authorization URL generation
/// - Authorization code exchange
/// - Token refresh (Monzo rotates refresh tokens on every use)
///
/// Monzo documents no scopes, so none are requested.
pub struct Provider {
    http_client: reqwest::Client,
}

impl Provider {
    /// Create a new Monzo OAuth provider using `http_client` for token endpoint calls.
    ///
    /// The client's timeout bounds every exchange and refresh.
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    /// POST a form to the token endpoint and collect status and body.
    async fn post_token_endpoint<T: Serialize + ?Sized>(
        &self,
        token_url: &str,
        form: &T,
    ) -> Result<(StatusCode, String), Error> {
        let response = self
            .http_client
            .post(token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }
}

/// Statuses that say nothing about the refresh token: throttling, timeouts, outages.
fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn is_refresh_token_rejection(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
        return true;
    }
    serde_json::from_str::<TokenErrorResponse>(body)
        .ok()
        .and_then(|response| response.error)
        .is_some_and(|code| REJECTION_ERROR_CODES.contains(&code.as_str()))
}

fn parse_token_response(body: &str) -> Result<TokenResponse, String> {
    let response: TokenResponse =
        serde_json::from_str(body).map_err(|e| format!("malformed token response: {}", e))?;
    if response.access_token.is_empty() {
        return Err("token response carried an empty access_token".to_string());
    }
    Ok(response)
}

#[async_trait]
impl crate::oauth::Provider for Provider {
    fn authorization_url(
        &self,
        config: &ClientConfig,
        state: &str,
    ) -> Result<AuthorizationRequest, Error> {
        let mut url = url::Url::parse(&config.auth_url).map_err(|e| {
            config_error(
                ConfigErrorKind::InvalidInput,
                &format!("auth_url is not a valid URL: {}", e),
            )
        })?;

        url.query_pairs_mut()
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", &config.redirect_uri())
            .append_pair("response_type", "code")
            .append_pair("state", state);

        Ok(AuthorizationRequest {
            url: url.into(),
            state: state.to_string(),
        })
    }

    async fn exchange_code(&self, config: &ClientConfig, code: &str) -> Result<Tokens, Error> {
        let redirect_uri = config.redirect_uri();
        let request = TokenExchangeRequest {
            grant_type: "authorization_code",
            client_id: &config.client_id,
            client_secret: config.client_secret.expose_secret(),
            redirect_uri: &redirect_uri,
            code,
        };

        info!("Attempting token exchange");
        let issued_at = Utc::now();

        let (status, body) = self
            .post_token_endpoint(&config.token_url, &request)
            .await
            .map_err(|e| {
                warn!("Token exchange request failed: {}", e);
                e
            })?;

        if !status.is_success() {
            warn!("Token exchange rejected with status {}", status);
            return Err(provider_error(
                ErrorKind::OAuth(OAuthErrorKind::ExchangeFailed),
                status.as_u16(),
                body,
            ));
        }

        let response = parse_token_response(&body).map_err(|reason| {
            warn!("Token exchange returned an unreadable body");
            oauth_error(OAuthErrorKind::ExchangeFailed, &reason)
        })?;

        let refresh_token = response.refresh_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            oauth_error(
                OAuthErrorKind::ExchangeFailed,
                "provider did not issue a refresh token; check the client is confidential",
            )
        })?;

        let expires_in = response.expires_in;
        let tokens = Tokens::issued(
            response.access_token,
            refresh_token,
            response.token_type,
            expires_in,
            issued_at,
        )
        .ok_or_else(|| {
            warn!("Token exchange returned an unusable expires_in");
            oauth_error(
                OAuthErrorKind::ExchangeFailed,
                &format!("expires_in {} is out of range", expires_in),
            )
        })?;

        debug!("Token exchange succeeded, expires in {}s", expires_in);
        Ok(tokens)
    }

    async fn refresh_token(
        &self,
        config: &ClientConfig,
        refresh_token: &SecretString,
    ) -> Result<RefreshResult, Error> {
        let request = TokenRefreshRequest {
            grant_type: "refresh_token",
            client_id: &config.client_id,
            client_secret: config.client_secret.expose_secret(),
            refresh_token: refresh_token.expose_secret(),
        };

        debug!("Refreshing Monzo access token");
        let issued_at = Utc::now();

        let (status, body) = self
            .post_token_endpoint(&config.token_url, &request)
            .await
            .map_err(|e| {
                warn!("Token refresh request failed: {}", e);
                e
            })?;

        if !status.is_success() {
            if !is_retryable_status(status) && is_refresh_token_rejection(status, &body) {
                warn!("Token refresh rejected with status {}", status);
                return Err(provider_error(
                    ErrorKind::OAuth(OAuthErrorKind::RefreshFailed),
                    status.as_u16(),
                    body,
                ));
            }

            warn!("Token refresh failed upstream with status {}", status);
            return Err(provider_error(
                ErrorKind::Http(HttpErrorKind::Upstream),
                status.as_u16(),
                body,
            ));
        }

        // The old refresh token may already be spent; an unreadable body counts as a rejection.
        let response = parse_token_response(&body).map_err(|reason| {
            warn!("Token refresh returned an unreadable body");
            oauth_error(OAuthErrorKind::RefreshFailed, &reason)
        })?;

        let expires_in = response.expires_in;
        let (next_refresh_token, rotated) = match response.refresh_token.filter(|t| !t.is_empty()) {
            Some(rotated) => (rotated, true),
            None => (refresh_token.expose_secret().clone(), false),
        };

        // Keep the stored record: the response is readable but its lifetime is not.
        let tokens = Tokens::issued(
            response.access_token,
            next_refresh_token,
            response.token_type,
            expires_in,
            issued_at,
        )
        .ok_or_else(|| {
            warn!("Token refresh returned an unusable expires_in");
            Error {
                source: Some(format!("expires_in {} is out of range", expires_in).into()),
                error_kind: ErrorKind::Http(HttpErrorKind::Upstream),
            }
        })?;

        info!("Successfully refreshed Monzo access token");

        if rotated {
            Ok(RefreshResult::with_rotation(tokens))
        } else {
            Ok(RefreshResult::no_rotation(tokens))
        }
    }
}
