//! Token manager with single-flight refresh locking.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, warn};

use super::{TokenStatus, TokenStore, Tokens};
use crate::config::{self, ClientConfig};
use crate::error::{config_error, token_error, ConfigErrorKind, Error, ErrorKind, TokenErrorKind};
use crate::oauth::{AuthorizationRequest, Provider, StateManager};
use crate::storage::{KeyLocks, Storage, TOKEN_KEY};

/// Tunables for the token lifecycle.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// How long an issued authorization state stays redeemable.
    pub state_ttl: Duration,
    /// How long before expiry a token counts as stale and gets refreshed.
    pub refresh_margin: Duration,
    /// Whether reading a stale token refreshes it inline.
    pub refresh_on_read: bool,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            state_ttl: Duration::minutes(10),
            refresh_margin: Duration::minutes(5),
            refresh_on_read: true,
        }
    }
}

/// Token manager that coordinates authorization, token retrieval and refresh.
///
/// All writes of the token record happen under the `token` key lock. Refresh
/// re-reads the record after taking the lock and only calls the provider when the
/// record is still the one the caller saw, so concurrent triggers for one stale
/// token share a single provider call. Rotating refresh tokens are consumed on
/// use, so a second concurrent refresh would otherwise fail and clobber the first.
pub struct Manager {
    storage: Arc<dyn Storage>,
    tokens: TokenStore,
    states: StateManager,
    locks: Arc<KeyLocks>,
    settings: ManagerSettings,
}

impl Manager {
    /// Create a new token manager over the given storage backend.
    pub fn new(storage: Arc<dyn Storage>, locks: Arc<KeyLocks>, settings: ManagerSettings) -> Self {
        Self {
            tokens: TokenStore::new(storage.clone()),
            states: StateManager::with_ttl(storage.clone(), settings.state_ttl),
            storage,
            locks,
            settings,
        }
    }

    pub fn states(&self) -> &StateManager {
        &self.states
    }

    /// Issue a new authorization state and build the URL the user is sent to.
    pub async fn authorization_url(
        &self,
        provider: &dyn Provider,
        config: &ClientConfig,
    ) -> Result<AuthorizationRequest, Error> {
        config.ensure_complete()?;
        let state = self.states.generate().await?;
        provider.authorization_url(config, &state)
    }

    /// Redeem an authorization code returned to the callback.
    ///
    /// The state is consumed before the provider is called, so a failed exchange
    /// cannot be retried with the same state. The token record is written only
    /// after the provider response has been fully read.
    pub async fn exchange_code(
        &self,
        provider: &dyn Provider,
        config: &ClientConfig,
        code: &str,
        state: &str,
    ) -> Result<Tokens, Error> {
        self.states.validate(state).await?;
        config.ensure_complete()?;

        let tokens = provider.exchange_code(config, code).await?;

        let _guard = self.locks.lock(TOKEN_KEY).await;
        self.tokens.store(&tokens).await?;
        info!("Token persisted to storage");

        Ok(tokens)
    }

    /// Get stored tokens (may be expired).
    pub async fn get_tokens(&self) -> Result<Option<Tokens>, Error> {
        self.tokens.get().await
    }

    /// Delete the stored tokens, returning the lifecycle to `Absent`.
    pub async fn delete_tokens(&self) -> Result<(), Error> {
        let _guard = self.locks.lock(TOKEN_KEY).await;
        self.tokens.delete().await
    }

    /// Refresh the stored token now, whatever its remaining lifetime.
    ///
    /// If another caller replaced the token while this one waited for the lock,
    /// that result is returned instead of refreshing again.
    pub async fn refresh_token(
        &self,
        provider: &dyn Provider,
        config: &ClientConfig,
    ) -> Result<Tokens, Error> {
        let observed = self.require_tokens().await?;
        self.refresh_observed(provider, config, &observed).await
    }

    /// Refresh the stored token if it is stale or expired.
    ///
    /// Returns `None` when the token is still valid.
    pub async fn refresh_if_stale(
        &self,
        provider: &dyn Provider,
        config: &ClientConfig,
    ) -> Result<Option<Tokens>, Error> {
        let observed = self.require_tokens().await?;
        if !observed.is_stale(self.settings.refresh_margin) {
            return Ok(None);
        }
        self.refresh_observed(provider, config, &observed)
            .await
            .map(Some)
    }

    /// Get a valid token, refreshing if needed.
    ///
    /// Never returns a token past its expiry. Fails with `NotFound` when no token
    /// exists or the provider rejected the refresh token, and with
    /// `ExpiredPendingRefresh` when the token has expired and could not be
    /// refreshed inline.
    pub async fn current_token(&self, provider: &dyn Provider) -> Result<Tokens, Error> {
        let tokens = self.require_tokens().await?;

        if tokens.status(self.settings.refresh_margin) == TokenStatus::Valid {
            return Ok(tokens);
        }

        if !self.settings.refresh_on_read {
            return usable_or_pending(tokens, None);
        }

        let config = match config::load(self.storage.as_ref()).await? {
            Some(config) => config,
            None => {
                warn!("Token needs refresh but no client configuration is stored");
                let cause = config_error(ConfigErrorKind::Missing, "cannot refresh without config");
                return usable_or_pending(tokens, Some(cause));
            }
        };

        match self.refresh_observed(provider, &config, &tokens).await {
            Ok(refreshed) => usable_or_pending(refreshed, None),
            Err(e) if e.is_refresh_rejection() => Err(Error {
                source: Some(Box::new(e)),
                error_kind: ErrorKind::Token(TokenErrorKind::NotFound),
            }),
            Err(e) if matches!(e.error_kind, ErrorKind::Storage(_) | ErrorKind::Token(_)) => {
                Err(e)
            }
            Err(e) => {
                warn!("Refresh on read failed: {}", e);
                usable_or_pending(tokens, Some(e))
            }
        }
    }

    async fn require_tokens(&self) -> Result<Tokens, Error> {
        self.tokens
            .get()
            .await?
            .ok_or_else(|| token_error(TokenErrorKind::NotFound, "No token has been issued yet"))
    }

    async fn refresh_observed(
        &self,
        provider: &dyn Provider,
        config: &ClientConfig,
        observed: &Tokens,
    ) -> Result<Tokens, Error> {
        config.ensure_complete()?;

        let _guard = self.locks.lock(TOKEN_KEY).await;

        // Double-check against the stored record (another request might have refreshed it)
        let current = self.tokens.get().await?.ok_or_else(|| {
            token_error(
                TokenErrorKind::NotFound,
                "Token was removed while waiting to refresh",
            )
        })?;

        if !current.same_grant(observed) {
            debug!("Token was refreshed by another request");
            return Ok(current);
        }

        let result = match provider.refresh_token(config, &current.refresh_token).await {
            Ok(result) => result,
            Err(e) if e.is_refresh_rejection() => {
                warn!("Refresh token rejected, clearing stored token");
                self.tokens.delete().await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if result.refresh_token_rotated {
            debug!("Provider rotated the refresh token");
        }

        self.tokens.store(&result.tokens).await?;
        info!(
            "Token refreshed successfully, expires at {}",
            result.tokens.expires_at
        );

        Ok(result.tokens)
    }
}

fn usable_or_pending(tokens: Tokens, cause: Option<Error>) -> Result<Tokens, Error> {
    if !tokens.is_expired() {
        return Ok(tokens);
    }

    Err(Error {
        source: cause.map(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
        error_kind: ErrorKind::Token(TokenErrorKind::ExpiredPendingRefresh),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigInput, WriteMode};
    use crate::error::{provider_error, HttpErrorKind, OAuthErrorKind};
    use crate::oauth::token::RefreshResult;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use chrono::Utc;
    use secrecy::{ExposeSecret, SecretString};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy, PartialEq)]
    enum RefreshBehaviour {
        Succeed,
        ShortLived,
        Reject,
        TimeOut,
    }

    // Mock provider for testing
    struct MockProvider {
        exchange_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
        refresh_behaviour: RefreshBehaviour,
        refresh_delay: std::time::Duration,
    }

    impl MockProvider {
        fn new(refresh_behaviour: RefreshBehaviour) -> Self {
            Self {
                exchange_calls: AtomicUsize::new(0),
                refresh_calls: AtomicUsize::new(0),
                refresh_behaviour,
                refresh_delay: std::time::Duration::from_millis(0),
            }
        }

        fn with_delay(mut self, delay: std::time::Duration) -> Self {
            self.refresh_delay = delay;
            self
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn authorization_url(
            &self,
            config: &ClientConfig,
            state: &str,
        ) -> Result<AuthorizationRequest, Error> {
            Ok(AuthorizationRequest {
                url: format!("{}?client_id={}&state={}", config.auth_url, config.client_id, state),
                state: state.to_string(),
            })
        }

        async fn exchange_code(&self, _config: &ClientConfig, code: &str) -> Result<Tokens, Error> {
            self.exchange_calls.fetch_add(1, Ordering::SeqCst);
            if code == "validcode" {
                Ok(Tokens::issued(
                    "AT1".to_string(),
                    "RT1".to_string(),
                    None,
                    3600,
                    Utc::now(),
                )
                .unwrap())
            } else {
                Err(provider_error(
                    ErrorKind::OAuth(OAuthErrorKind::ExchangeFailed),
                    400,
                    r#"{"error":"invalid_grant"}"#.to_string(),
                ))
            }
        }

        async fn refresh_token(
            &self,
            _config: &ClientConfig,
            refresh_token: &SecretString,
        ) -> Result<RefreshResult, Error> {
            let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.refresh_delay).await;
            match self.refresh_behaviour {
                RefreshBehaviour::Succeed | RefreshBehaviour::ShortLived => {
                    let expires_in = match self.refresh_behaviour {
                        RefreshBehaviour::ShortLived => 120,
                        _ => 3600,
                    };
                    Ok(RefreshResult::with_rotation(
                        Tokens::issued(
                            format!("AT-refreshed-{}", call),
                            format!("{}-next", refresh_token.expose_secret()),
                            None,
                            expires_in,
                            Utc::now(),
                        )
                        .unwrap(),
                    ))
                }
                RefreshBehaviour::Reject => Err(provider_error(
                    ErrorKind::OAuth(OAuthErrorKind::RefreshFailed),
                    401,
                    r#"{"error":"invalid_grant"}"#.to_string(),
                )),
                RefreshBehaviour::TimeOut => {
                    Err(Error::new(ErrorKind::Http(HttpErrorKind::Timeout)))
                }
            }
        }
    }

    fn test_config() -> ClientConfig {
        ConfigInput {
            client_id: Some("abc".to_string()),
            client_secret: Some(SecretString::from("xyz".to_string())),
            redirect_base_url: Some("https://vault.example.com/v1/monzo".to_string()),
            ..Default::default()
        }
        .apply(None, WriteMode::Create)
        .unwrap()
    }

    async fn setup(settings: ManagerSettings) -> (Arc<MemoryStorage>, Manager) {
        let storage = Arc::new(MemoryStorage::new());
        config::save(storage.as_ref(), &test_config()).await.unwrap();
        let manager = Manager::new(storage.clone(), Arc::new(KeyLocks::new()), settings);
        (storage, manager)
    }

    async fn seed_token(storage: &Arc<MemoryStorage>, lifetime: Duration) -> Tokens {
        let tokens = Tokens {
            access_token: SecretString::from("AT0".to_string()),
            refresh_token: SecretString::from("RT0".to_string()),
            issued_at: Utc::now() - Duration::hours(1),
            expires_at: Utc::now() + lifetime,
            token_type: "Bearer".to_string(),
        };
        TokenStore::new(storage.clone()).store(&tokens).await.unwrap();
        tokens
    }

    fn kind_of<T>(result: Result<T, Error>) -> ErrorKind {
        match result {
            Ok(_) => panic!("expected an error"),
            Err(e) => e.error_kind,
        }
    }

    #[tokio::test]
    async fn test_exchange_code_stores_tokens_and_consumes_state() {
        let (_, manager) = setup(ManagerSettings::default()).await;
        let provider = MockProvider::new(RefreshBehaviour::Succeed);
        let config = test_config();

        let request = manager.authorization_url(&provider, &config).await.unwrap();
        assert!(request.url.contains("client_id=abc"));

        let tokens = manager
            .exchange_code(&provider, &config, "validcode", &request.state)
            .await
            .unwrap();
        assert_eq!(tokens.access_token.expose_secret(), "AT1");

        let stored = manager.get_tokens().await.unwrap().unwrap();
        assert!(stored.same_grant(&tokens));

        let replay = manager
            .exchange_code(&provider, &config, "validcode", &request.state)
            .await;
        assert_eq!(kind_of(replay), ErrorKind::OAuth(OAuthErrorKind::StateMismatch));
        assert_eq!(provider.exchange_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exchange_with_unknown_state_never_calls_provider() {
        let (_, manager) = setup(ManagerSettings::default()).await;
        let provider = MockProvider::new(RefreshBehaviour::Succeed);

        let result = manager
            .exchange_code(&provider, &test_config(), "validcode", "feedface")
            .await;
        assert_eq!(kind_of(result), ErrorKind::OAuth(OAuthErrorKind::StateMismatch));
        assert_eq!(provider.exchange_calls.load(Ordering::SeqCst), 0);
        assert!(manager.get_tokens().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_exchange_still_consumes_state() {
        let (_, manager) = setup(ManagerSettings::default()).await;
        let provider = MockProvider::new(RefreshBehaviour::Succeed);
        let config = test_config();
        let request = manager.authorization_url(&provider, &config).await.unwrap();

        let failed = manager
            .exchange_code(&provider, &config, "badcode", &request.state)
            .await;
        assert_eq!(kind_of(failed), ErrorKind::OAuth(OAuthErrorKind::ExchangeFailed));

        let retried = manager
            .exchange_code(&provider, &config, "validcode", &request.state)
            .await;
        assert_eq!(kind_of(retried), ErrorKind::OAuth(OAuthErrorKind::StateMismatch));
        assert!(manager.get_tokens().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_current_token_without_token_fails_not_found() {
        let (_, manager) = setup(ManagerSettings::default()).await;
        let provider = MockProvider::new(RefreshBehaviour::Succeed);

        let result = manager.current_token(&provider).await;
        assert_eq!(kind_of(result), ErrorKind::Token(TokenErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_current_token_valid_skips_refresh() {
        let (storage, manager) = setup(ManagerSettings::default()).await;
        let provider = MockProvider::new(RefreshBehaviour::Succeed);
        seed_token(&storage, Duration::hours(1)).await;

        let tokens = manager.current_token(&provider).await.unwrap();
        assert_eq!(tokens.access_token.expose_secret(), "AT0");
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_current_token_refreshes_expired_token() {
        let (storage, manager) = setup(ManagerSettings::default()).await;
        let provider = MockProvider::new(RefreshBehaviour::Succeed);
        seed_token(&storage, -Duration::minutes(1)).await;

        let tokens = manager.current_token(&provider).await.unwrap();
        assert_eq!(tokens.access_token.expose_secret(), "AT-refreshed-1");
        assert_eq!(tokens.refresh_token.expose_secret(), "RT0-next");
        assert!(!tokens.is_expired());

        let stored = manager.get_tokens().await.unwrap().unwrap();
        assert!(stored.same_grant(&tokens));
    }

    #[tokio::test]
    async fn test_concurrent_refresh_triggers_share_one_provider_call() {
        let (storage, manager) = setup(ManagerSettings::default()).await;
        let manager = Arc::new(manager);
        let provider = Arc::new(
            MockProvider::new(RefreshBehaviour::Succeed)
                .with_delay(std::time::Duration::from_millis(100)),
        );
        seed_token(&storage, Duration::minutes(2)).await;

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let manager = Arc::clone(&manager);
                let provider = Arc::clone(&provider);
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        manager
                            .refresh_token(provider.as_ref(), &test_config())
                            .await
                    } else {
                        manager.current_token(provider.as_ref()).await
                    }
                })
            })
            .collect();

        for handle in handles {
            let tokens = handle.await.unwrap().unwrap();
            assert_eq!(tokens.access_token.expose_secret(), "AT-refreshed-1");
        }
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_if_stale_leaves_valid_token_alone() {
        let (storage, manager) = setup(ManagerSettings::default()).await;
        let provider = MockProvider::new(RefreshBehaviour::Succeed);
        seed_token(&storage, Duration::hours(1)).await;

        let refreshed = manager
            .refresh_if_stale(&provider, &test_config())
            .await
            .unwrap();
        assert!(refreshed.is_none());
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_forced_refresh_replaces_valid_token() {
        let (storage, manager) = setup(ManagerSettings::default()).await;
        let provider = MockProvider::new(RefreshBehaviour::Succeed);
        seed_token(&storage, Duration::hours(1)).await;

        let tokens = manager.refresh_token(&provider, &test_config()).await.unwrap();
        assert_eq!(tokens.access_token.expose_secret(), "AT-refreshed-1");
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_refresh_clears_token() {
        let (storage, manager) = setup(ManagerSettings::default()).await;
        let provider = MockProvider::new(RefreshBehaviour::Reject);
        seed_token(&storage, -Duration::minutes(1)).await;

        let first = manager.current_token(&provider).await;
        assert_eq!(kind_of(first), ErrorKind::Token(TokenErrorKind::NotFound));
        assert!(manager.get_tokens().await.unwrap().is_none());

        let second = manager.current_token(&provider).await;
        assert_eq!(kind_of(second), ErrorKind::Token(TokenErrorKind::NotFound));
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_direct_refresh_rejection_reports_refresh_failed() {
        let (storage, manager) = setup(ManagerSettings::default()).await;
        let provider = MockProvider::new(RefreshBehaviour::Reject);
        seed_token(&storage, Duration::hours(1)).await;

        let result = manager.refresh_token(&provider, &test_config()).await;
        assert_eq!(kind_of(result), ErrorKind::OAuth(OAuthErrorKind::RefreshFailed));
        assert!(manager.get_tokens().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transient_failure_serves_stale_but_unexpired_token() {
        let (storage, manager) = setup(ManagerSettings::default()).await;
        let provider = MockProvider::new(RefreshBehaviour::TimeOut);
        seed_token(&storage, Duration::minutes(2)).await;

        let tokens = manager.current_token(&provider).await.unwrap();
        assert_eq!(tokens.access_token.expose_secret(), "AT0");
    }

    #[tokio::test]
    async fn test_transient_failure_never_serves_expired_token() {
        let (storage, manager) = setup(ManagerSettings::default()).await;
        let provider = MockProvider::new(RefreshBehaviour::TimeOut);
        seed_token(&storage, -Duration::minutes(1)).await;

        let result = manager.current_token(&provider).await;
        assert_eq!(
            kind_of(result),
            ErrorKind::Token(TokenErrorKind::ExpiredPendingRefresh)
        );
        // A timeout is not a rejection; the record survives for the next attempt.
        assert!(manager.get_tokens().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_token_without_refresh_on_read_is_pending() {
        let settings = ManagerSettings {
            refresh_on_read: false,
            ..Default::default()
        };
        let (storage, manager) = setup(settings).await;
        let provider = MockProvider::new(RefreshBehaviour::Succeed);
        seed_token(&storage, -Duration::seconds(1)).await;

        let result = manager.current_token(&provider).await;
        assert_eq!(
            kind_of(result),
            ErrorKind::Token(TokenErrorKind::ExpiredPendingRefresh)
        );
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_token_without_config_is_pending() {
        let (storage, manager) = setup(ManagerSettings::default()).await;
        config::delete(storage.as_ref()).await.unwrap();
        let provider = MockProvider::new(RefreshBehaviour::Succeed);
        seed_token(&storage, -Duration::seconds(1)).await;

        let result = manager.current_token(&provider).await;
        assert_eq!(
            kind_of(result),
            ErrorKind::Token(TokenErrorKind::ExpiredPendingRefresh)
        );
    }

    #[tokio::test]
    async fn test_short_lived_refresh_is_not_refreshed_again_on_read() {
        let (storage, manager) = setup(ManagerSettings::default()).await;
        let provider = MockProvider::new(RefreshBehaviour::ShortLived);
        seed_token(&storage, -Duration::minutes(1)).await;

        let first = manager.current_token(&provider).await.unwrap();
        let second = manager.current_token(&provider).await.unwrap();

        assert!(first.same_grant(&second));
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_tokens() {
        let (storage, manager) = setup(ManagerSettings::default()).await;
        seed_token(&storage, Duration::hours(1)).await;

        manager.delete_tokens().await.unwrap();
        assert!(manager.get_tokens().await.unwrap().is_none());
    }
}
