use config::Config;
use log::info;
use monzo_auth::http::HttpClientBuilder;
use monzo_auth::oauth::providers::monzo;
use monzo_auth::storage::FileStorage;
use monzo_auth::{Backend, Error};
use std::sync::Arc;

pub mod config;
pub mod logging;

/// User agent sent on every call to the Monzo token endpoint.
pub fn user_agent() -> String {
    format!("monzo-token-renewer/{}", env!("CARGO_PKG_VERSION"))
}

// Service-level state containing only infrastructure concerns
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<Backend>,
    pub config: Config,
}

impl AppState {
    /// Wire file storage, the Monzo provider and the backend from `app_config`.
    pub fn new(app_config: Config) -> Result<Self, Error> {
        let storage = Arc::new(FileStorage::new(app_config.data_dir.clone()));
        info!(
            "Backend config: data_dir={}, http_timeout={}s, state_ttl={}s, \
             refresh_margin={}s, refresh_on_read={}",
            storage.dir().display(),
            app_config.http_timeout_secs,
            app_config.state_ttl_secs,
            app_config.refresh_margin_secs,
            app_config.refresh_on_read,
        );

        let http_client = HttpClientBuilder::new()
            .with_timeout(app_config.http_timeout())
            .with_user_agent(user_agent())
            .build()?;
        let provider = Arc::new(monzo::Provider::new(http_client));
        let backend = Backend::new(storage, provider, app_config.manager_settings());

        Ok(Self {
            backend: Arc::new(backend),
            config: app_config,
        })
    }

    pub fn backend_ref(&self) -> &Backend {
        self.backend.as_ref()
    }
}
