//! OAuth token types.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Token type assumed when the provider omits it.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// OAuth tokens with metadata.
#[derive(Debug, Clone)]
pub struct Tokens {
    /// Access token for API requests.
    pub access_token: SecretString,
    /// Refresh token for obtaining new access tokens.
    pub refresh_token: SecretString,
    /// When the provider issued the access token.
    pub issued_at: DateTime<Utc>,
    /// When the access token expires.
    pub expires_at: DateTime<Utc>,
    /// Token type (usually "Bearer").
    pub token_type: String,
}

/// Where a token sits in its lifecycle at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// Usable and outside the refresh margin.
    Valid,
    /// Still usable but inside the refresh margin.
    Stale,
    /// Past its expiry; must not be handed out.
    Expired,
}

/// Plain-text form of [`Tokens`], used for persistence and for the token read response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlainTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// RFC3339 timestamp.
    pub expiry: DateTime<Utc>,
    /// RFC3339 timestamp.
    pub issued_at: DateTime<Utc>,
}

impl Tokens {
    /// Build tokens from an `expires_in` lifetime measured from `issued_at`.
    ///
    /// Returns `None` unless `expires_in_secs` is positive and the expiry is representable.
    pub fn issued(
        access_token: String,
        refresh_token: String,
        token_type: Option<String>,
        expires_in_secs: i64,
        issued_at: DateTime<Utc>,
    ) -> Option<Self> {
        if expires_in_secs <= 0 {
            return None;
        }
        let expires_at = Duration::try_seconds(expires_in_secs)
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))?;

        Some(Self {
            access_token: SecretString::from(access_token),
            refresh_token: SecretString::from(refresh_token),
            issued_at,
            expires_at,
            token_type: token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
        })
    }

    /// Classify the token against `margin` at the current time.
    ///
    /// The margin is capped at half the token's lifetime, so a short-lived token
    /// is not stale the moment it is issued.
    pub fn status(&self, margin: Duration) -> TokenStatus {
        self.status_at(margin, Utc::now())
    }

    fn effective_margin(&self, margin: Duration) -> Duration {
        let half_lifetime = (self.expires_at - self.issued_at) / 2;
        margin.min(half_lifetime).max(Duration::zero())
    }

    fn status_at(&self, margin: Duration, now: DateTime<Utc>) -> TokenStatus {
        if self.expires_at <= now {
            TokenStatus::Expired
        } else if self.expires_at <= now + self.effective_margin(margin) {
            TokenStatus::Stale
        } else {
            TokenStatus::Valid
        }
    }

    /// Check if the access token is expired or will expire within `margin`.
    pub fn is_stale(&self, margin: Duration) -> bool {
        self.status(margin) != TokenStatus::Valid
    }

    /// Check if the access token is past its expiry.
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Get the remaining time until expiration.
    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// True when `other` holds the same access token and expiry.
    pub fn same_grant(&self, other: &Tokens) -> bool {
        self.expires_at == other.expires_at
            && self.access_token.expose_secret() == other.access_token.expose_secret()
    }

    /// Expose the secrets for persistence or for a caller that asked for the token.
    pub fn into_plain(self) -> PlainTokens {
        PlainTokens {
            access_token: self.access_token.expose_secret().clone(),
            refresh_token: self.refresh_token.expose_secret().clone(),
            token_type: self.token_type,
            expiry: self.expires_at,
            issued_at: self.issued_at,
        }
    }
}

impl From<PlainTokens> for Tokens {
    fn from(plain: PlainTokens) -> Self {
        Self {
            access_token: SecretString::from(plain.access_token),
            refresh_token: SecretString::from(plain.refresh_token),
            issued_at: plain.issued_at,
            expires_at: plain.expiry,
            token_type: plain.token_type,
        }
    }
}

/// Result of a token refresh operation.
#[derive(Debug, Clone)]
pub struct RefreshResult {
    /// The new tokens.
    pub tokens: Tokens,
    /// True if the provider issued a new refresh token.
    pub refresh_token_rotated: bool,
}

impl RefreshResult {
    /// Create a refresh result with no rotation.
    pub fn no_rotation(tokens: Tokens) -> Self {
        Self {
            tokens,
            refresh_token_rotated: false,
        }
    }

    /// Create a refresh result with rotation.
    pub fn with_rotation(tokens: Tokens) -> Self {
        Self {
            tokens,
            refresh_token_rotated: true,
        }
    }
}
