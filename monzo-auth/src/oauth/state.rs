//! CSRF state management for OAuth flows.
//!
//! Each authorization attempt gets a pending record in storage keyed by its state.
//! The callback consumes the record; a state is accepted at most once and only
//! within the TTL.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{oauth_error, Error, OAuthErrorKind};
use crate::storage::{
    get_json, pending_auth_key, put_json, take_json, Storage, PENDING_AUTH_PREFIX,
};

/// An in-flight authorization attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub state: String,
    pub issued_at: DateTime<Utc>,
}

impl PendingAuthorization {
    fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now > self.issued_at + ttl
    }
}

/// Manager for OAuth state parameters with expiration.
///
/// Generates and validates CSRF state tokens to prevent cross-site request forgery
/// and replay of a callback.
#[derive(Clone)]
pub struct StateManager {
    storage: Arc<dyn Storage>,
    ttl: Duration,
}

impl StateManager {
    /// Create a new state manager with default TTL of 10 minutes.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_ttl(storage, Duration::minutes(10))
    }

    /// Create a new state manager with custom TTL.
    pub fn with_ttl(storage: Arc<dyn Storage>, ttl: Duration) -> Self {
        Self { storage, ttl }
    }

    /// Generate a new state token and persist its pending authorization.
    pub async fn generate(&self) -> Result<String, Error> {
        let state = Self::generate_token();
        let pending = PendingAuthorization {
            state: state.clone(),
            issued_at: Utc::now(),
        };

        put_json(self.storage.as_ref(), &pending_auth_key(&state), &pending).await?;

        Ok(state)
    }

    /// Validate and consume a state token.
    ///
    /// The pending record is removed whether or not it is still valid, so a
    /// state can never be presented twice.
    pub async fn validate(&self, state: &str) -> Result<PendingAuthorization, Error> {
        if !Self::is_well_formed(state) {
            return Err(oauth_error(
                OAuthErrorKind::StateMismatch,
                "state parameter is malformed",
            ));
        }

        let pending: Option<PendingAuthorization> =
            take_json(self.storage.as_ref(), &pending_auth_key(state)).await?;

        match pending {
            Some(pending) if pending.is_expired(self.ttl, Utc::now()) => {
                warn!("Rejected expired authorization state");
                Err(oauth_error(
                    OAuthErrorKind::StateMismatch,
                    "authorization state has expired",
                ))
            }
            Some(pending) => Ok(pending),
            None => Err(oauth_error(
                OAuthErrorKind::StateMismatch,
                "authorization state was not issued or has already been used",
            )),
        }
    }

    /// Clean up expired states.
    ///
    /// Returns the number of pending authorizations removed.
    pub async fn cleanup_expired(&self) -> Result<usize, Error> {
        let now = Utc::now();
        let mut removed = 0;

        for key in self.storage.list(PENDING_AUTH_PREFIX).await? {
            let pending: Option<PendingAuthorization> =
                match get_json(self.storage.as_ref(), &key).await {
                    Ok(pending) => pending,
                    Err(e) => {
                        warn!("Discarding unreadable pending authorization {}: {}", key, e);
                        self.storage.delete(&key).await?;
                        removed += 1;
                        continue;
                    }
                };

            if let Some(pending) = pending {
                if pending.is_expired(self.ttl, now) {
                    self.storage.delete(&key).await?;
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            debug!("Removed {} expired authorization states", removed);
        }
        Ok(removed)
    }

    fn is_well_formed(state: &str) -> bool {
        !state.is_empty() && state.len() <= 128 && state.chars().all(|c| c.is_ascii_alphanumeric())
    }

    /// Generate a cryptographically random state token.
    fn generate_token() -> String {
        let random_bytes: [u8; 32] = rand::thread_rng().gen();
        hex::encode(random_bytes)
    }
}
