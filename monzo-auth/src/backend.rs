//! Host-facing operations over the token lifecycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{self, ConfigInput, ConfigView, WriteMode};
use crate::error::{config_error, ConfigErrorKind, Error, ErrorKind, TokenErrorKind};
use crate::oauth::token::{Manager, ManagerSettings, PlainTokens};
use crate::oauth::Provider;
use crate::storage::{KeyLocks, Storage, CONFIG_KEY};

/// Synopsis shown by hosts that list their backends.
pub const HELP: &str =
    "The Monzo backend generates a Monzo API client and keeps its authentication token renewed";

const CALLBACK_MESSAGE: &str = "Authenticated. Log in to the Monzo app to grant permissions";

/// Parameters delivered to the OAuth redirect target.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackInput {
    pub code: String,
    pub state: String,
}

impl CallbackInput {
    fn validate(&self) -> Result<(), Error> {
        if self.code.trim().is_empty() {
            return Err(config_error(ConfigErrorKind::InvalidInput, "code is required"));
        }
        if self.state.trim().is_empty() {
            return Err(config_error(ConfigErrorKind::InvalidInput, "state is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthUrlResponse {
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallbackResponse {
    pub message: String,
}

/// What a renewal pass did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RenewOutcome {
    /// The token was stale and has been replaced.
    Refreshed { expiry: DateTime<Utc> },
    /// The token is outside the refresh margin.
    StillValid,
    /// No config or no token is stored yet.
    NothingToRenew,
}

/// The Monzo credential backend.
///
/// Every operation reads the records it needs from storage; nothing secret is
/// cached between calls.
pub struct Backend {
    storage: Arc<dyn Storage>,
    provider: Arc<dyn Provider>,
    locks: Arc<KeyLocks>,
    manager: Manager,
}

impl Backend {
    pub fn new(
        storage: Arc<dyn Storage>,
        provider: Arc<dyn Provider>,
        settings: ManagerSettings,
    ) -> Self {
        let locks = Arc::new(KeyLocks::new());
        Self {
            manager: Manager::new(storage.clone(), locks.clone(), settings),
            storage,
            provider,
            locks,
        }
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    /// Read the stored configuration without its client secret.
    pub async fn read_config(&self) -> Result<ConfigView, Error> {
        Ok(config::require(self.storage.as_ref()).await?.view())
    }

    pub async fn config_exists(&self) -> Result<bool, Error> {
        Ok(config::load(self.storage.as_ref()).await?.is_some())
    }

    /// Create the configuration, or update it in place when one exists.
    ///
    /// An existing token is left untouched.
    pub async fn write_config(&self, input: ConfigInput) -> Result<(), Error> {
        let _guard = self.locks.lock(CONFIG_KEY).await;

        let existing = config::load(self.storage.as_ref()).await?;
        let mode = match existing {
            Some(_) => WriteMode::Update,
            None => WriteMode::Create,
        };
        let config = input.apply(existing, mode)?;
        config::save(self.storage.as_ref(), &config).await?;

        info!("Client configuration written ({:?})", mode);
        Ok(())
    }

    pub async fn delete_config(&self) -> Result<(), Error> {
        let _guard = self.locks.lock(CONFIG_KEY).await;
        config::delete(self.storage.as_ref()).await?;
        info!("Client configuration deleted");
        Ok(())
    }

    /// Issue a one-time authorization URL.
    pub async fn build_auth_url(&self) -> Result<AuthUrlResponse, Error> {
        let config = config::require(self.storage.as_ref()).await?;
        let request = self
            .manager
            .authorization_url(self.provider.as_ref(), &config)
            .await?;
        debug!("Issued authorization URL");
        Ok(AuthUrlResponse { url: request.url })
    }

    /// Complete the authorization started by [`Backend::build_auth_url`].
    pub async fn handle_callback(&self, input: CallbackInput) -> Result<CallbackResponse, Error> {
        input.validate()?;
        let config = config::require(self.storage.as_ref()).await?;

        self.manager
            .exchange_code(self.provider.as_ref(), &config, &input.code, &input.state)
            .await?;

        Ok(CallbackResponse {
            message: CALLBACK_MESSAGE.to_string(),
        })
    }

    /// Read a usable token, refreshing it first when it is stale.
    pub async fn read_token(&self) -> Result<PlainTokens, Error> {
        let tokens = self.manager.current_token(self.provider.as_ref()).await?;
        Ok(tokens.into_plain())
    }

    /// Refresh the token now.
    pub async fn refresh_token(&self) -> Result<PlainTokens, Error> {
        let config = config::require(self.storage.as_ref()).await?;
        let tokens = self
            .manager
            .refresh_token(self.provider.as_ref(), &config)
            .await?;
        Ok(tokens.into_plain())
    }

    pub async fn delete_token(&self) -> Result<(), Error> {
        self.manager.delete_tokens().await?;
        info!("Token deleted");
        Ok(())
    }

    /// One renewal pass: drop expired pending authorizations and refresh a stale token.
    pub async fn renew(&self) -> Result<RenewOutcome, Error> {
        let removed = self.manager.states().cleanup_expired().await?;
        if removed > 0 {
            debug!("Removed {} expired pending authorizations", removed);
        }

        let config = match config::load(self.storage.as_ref()).await? {
            Some(config) => config,
            None => {
                debug!("No client configuration stored, skipping renewal");
                return Ok(RenewOutcome::NothingToRenew);
            }
        };

        match self
            .manager
            .refresh_if_stale(self.provider.as_ref(), &config)
            .await
        {
            Ok(Some(tokens)) => Ok(RenewOutcome::Refreshed {
                expiry: tokens.expires_at,
            }),
            Ok(None) => Ok(RenewOutcome::StillValid),
            Err(e) if e.error_kind == ErrorKind::Token(TokenErrorKind::NotFound) => {
                debug!("No token stored, skipping renewal");
                Ok(RenewOutcome::NothingToRenew)
            }
            Err(e) => Err(e),
        }
    }
}
