//! OAuth client configuration record.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{config_error, ConfigErrorKind, Error};
use crate::storage::{get_json, put_json, Storage, CONFIG_KEY};

/// Provider authorization endpoint used when none is configured.
pub const DEFAULT_AUTH_URL: &str = "https://auth.monzo.com/";
/// Provider token endpoint used when none is configured.
pub const DEFAULT_TOKEN_URL: &str = "https://api.monzo.com/oauth2/token";
/// Path appended to `redirect_base_url` to form the registered redirect URI.
pub const CALLBACK_PATH: &str = "/callback";

/// The OAuth client identity and the provider endpoints.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_base_url: String,
}

/// Persisted shape of [`ClientConfig`].
#[derive(Serialize, Deserialize)]
struct ConfigRecord {
    client_id: String,
    client_secret: String,
    auth_url: String,
    token_url: String,
    redirect_base_url: String,
}

/// Non-secret view of the configuration returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigView {
    pub client_id: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_base_url: String,
}

/// Whether a configuration write creates a fresh record or amends the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Update,
}

/// Caller-supplied fields for a configuration write.
///
/// Every field is optional at this layer; [`ConfigInput::apply`] enforces which
/// ones a create needs. Empty strings count as absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigInput {
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub redirect_base_url: Option<String>,
}

impl ClientConfig {
    /// The redirect URI registered with the provider: `redirect_base_url` followed by `/callback`.
    pub fn redirect_uri(&self) -> String {
        format!("{}{}", self.redirect_base_url, CALLBACK_PATH)
    }

    /// Fail with `ConfigIncomplete` unless the client credentials are present.
    pub fn ensure_complete(&self) -> Result<(), Error> {
        if self.client_id.trim().is_empty() {
            return Err(config_error(
                ConfigErrorKind::Incomplete,
                "client_id is not set",
            ));
        }
        if self.client_secret.expose_secret().trim().is_empty() {
            return Err(config_error(
                ConfigErrorKind::Incomplete,
                "client_secret is not set",
            ));
        }
        if self.redirect_base_url.trim().is_empty() {
            return Err(config_error(
                ConfigErrorKind::Incomplete,
                "redirect_base_url is not set",
            ));
        }
        Ok(())
    }

    pub fn view(&self) -> ConfigView {
        ConfigView {
            client_id: self.client_id.clone(),
            auth_url: self.auth_url.clone(),
            token_url: self.token_url.clone(),
            redirect_base_url: self.redirect_base_url.clone(),
        }
    }

    fn to_record(&self) -> ConfigRecord {
        ConfigRecord {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.expose_secret().clone(),
            auth_url: self.auth_url.clone(),
            token_url: self.token_url.clone(),
            redirect_base_url: self.redirect_base_url.clone(),
        }
    }
}

impl From<ConfigRecord> for ClientConfig {
    fn from(record: ConfigRecord) -> Self {
        Self {
            client_id: record.client_id,
            client_secret: SecretString::from(record.client_secret),
            auth_url: record.auth_url,
            token_url: record.token_url,
            redirect_base_url: record.redirect_base_url,
        }
    }
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn validated_url(field: &str, value: Option<String>) -> Result<Option<String>, Error> {
    match present(value) {
        Some(raw) => match url::Url::parse(&raw) {
            Ok(_) => Ok(Some(raw)),
            Err(e) => Err(config_error(
                ConfigErrorKind::InvalidInput,
                &format!("{} is not a valid URL: {}", field, e),
            )),
        },
        None => Ok(None),
    }
}

impl ConfigInput {
    /// Build the configuration that results from writing this input.
    ///
    /// `Create` starts from scratch and requires `client_id`, `client_secret`
    /// and `redirect_base_url`; endpoint URLs fall back to the provider defaults.
    /// `Update` amends `existing`, keeping every field this input omits, and
    /// fails with `ConfigMissing` when nothing is stored yet.
    pub fn apply(
        self,
        existing: Option<ClientConfig>,
        mode: WriteMode,
    ) -> Result<ClientConfig, Error> {
        let auth_url = validated_url("auth_url", self.auth_url)?;
        let token_url = validated_url("token_url", self.token_url)?;
        // Stored without a trailing slash so the redirect URI has exactly one before `callback`.
        let redirect_base_url = validated_url("redirect_base_url", self.redirect_base_url)?
            .map(|base| base.trim_end_matches('/').to_string());
        let client_id = present(self.client_id);
        let client_secret = self
            .client_secret
            .filter(|s| !s.expose_secret().trim().is_empty());

        match mode {
            WriteMode::Create => {
                let client_id = client_id.ok_or_else(|| {
                    config_error(ConfigErrorKind::Incomplete, "missing client_id in configuration")
                })?;
                let client_secret = client_secret.ok_or_else(|| {
                    config_error(
                        ConfigErrorKind::Incomplete,
                        "missing client_secret in configuration",
                    )
                })?;
                let redirect_base_url = redirect_base_url.ok_or_else(|| {
                    config_error(
                        ConfigErrorKind::Incomplete,
                        "missing redirect_base_url in configuration",
                    )
                })?;

                Ok(ClientConfig {
                    client_id,
                    client_secret,
                    auth_url: auth_url.unwrap_or_else(|| DEFAULT_AUTH_URL.to_string()),
                    token_url: token_url.unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
                    redirect_base_url,
                })
            }
            WriteMode::Update => {
                let mut config = existing.ok_or_else(|| {
                    config_error(
                        ConfigErrorKind::Missing,
                        "config not found during update operation",
                    )
                })?;
                if let Some(client_id) = client_id {
                    config.client_id = client_id;
                }
                if let Some(client_secret) = client_secret {
                    config.client_secret = client_secret;
                }
                if let Some(auth_url) = auth_url {
                    config.auth_url = auth_url;
                }
                if let Some(token_url) = token_url {
                    config.token_url = token_url;
                }
                if let Some(redirect_base_url) = redirect_base_url {
                    config.redirect_base_url = redirect_base_url;
                }
                Ok(config)
            }
        }
    }
}

/// Read the stored configuration, if any.
pub async fn load(storage: &dyn Storage) -> Result<Option<ClientConfig>, Error> {
    let record: Option<ConfigRecord> = get_json(storage, CONFIG_KEY).await?;
    Ok(record.map(ClientConfig::from))
}

/// Read the stored configuration, failing with `ConfigMissing` when absent.
pub async fn require(storage: &dyn Storage) -> Result<ClientConfig, Error> {
    load(storage).await?.ok_or_else(|| {
        config_error(
            ConfigErrorKind::Missing,
            "write a client configuration before starting authorization",
        )
    })
}

/// Replace the stored configuration in full.
pub async fn save(storage: &dyn Storage, config: &ClientConfig) -> Result<(), Error> {
    put_json(storage, CONFIG_KEY, &config.to_record()).await
}

/// Remove the stored configuration.
pub async fn delete(storage: &dyn Storage) -> Result<(), Error> {
    storage.delete(CONFIG_KEY).await
}
