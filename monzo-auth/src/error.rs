//! Error types for the `monzo-auth` crate.
//!
//! Follows the same pattern as the service layers: a root Error struct holding an
//! error kind tree and an optional source for error chaining.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for the monzo-auth crate.
/// Holds error kind and optional source for error chaining.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in monzo-auth.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Config(ConfigErrorKind),
    OAuth(OAuthErrorKind),
    Token(TokenErrorKind),
    Storage(StorageErrorKind),
    Http(HttpErrorKind),
}

/// Errors from reading or validating the client configuration.
#[derive(Debug, PartialEq)]
pub enum ConfigErrorKind {
    /// No configuration record has been written.
    Missing,
    /// The stored or supplied configuration lacks the client id or secret.
    Incomplete,
    /// A caller supplied a malformed field (empty code, bad URL, ...).
    InvalidInput,
}

/// Errors from the authorization code flow against the provider.
#[derive(Debug, PartialEq)]
pub enum OAuthErrorKind {
    /// The callback state is unknown, expired or already consumed.
    StateMismatch,
    /// The provider rejected the authorization code or answered with garbage.
    ExchangeFailed,
    /// The provider rejected the refresh token. The stored token has been cleared.
    RefreshFailed,
}

/// Errors from the token accessor.
#[derive(Debug, PartialEq)]
pub enum TokenErrorKind {
    NotFound,
    ExpiredPendingRefresh,
}

/// Errors from the backing key-value store.
#[derive(Debug, PartialEq)]
pub enum StorageErrorKind {
    Unavailable,
    Corrupt,
}

/// Errors from HTTP client operations.
#[derive(Debug, PartialEq)]
pub enum HttpErrorKind {
    BuilderFailed,
    Timeout,
    Network,
    /// The provider answered with a server-side (5xx) failure.
    Upstream,
}

/// Status and body of a non-successful provider response, kept for diagnostics.
#[derive(Debug)]
pub struct ProviderError {
    pub status: u16,
    pub body: String,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.body.is_empty() {
            write!(f, "provider responded with status {}", self.status)
        } else {
            write!(
                f,
                "provider responded with status {}: {}",
                self.status, self.body
            )
        }
    }
}

impl StdError for ProviderError {}

impl Error {
    /// Create an error of the given kind with no source.
    pub fn new(error_kind: ErrorKind) -> Self {
        Error {
            source: None,
            error_kind,
        }
    }

    /// True for every failure of the code exchange step, including network and timeout.
    pub fn is_exchange_failure(&self) -> bool {
        matches!(
            self.error_kind,
            ErrorKind::OAuth(OAuthErrorKind::ExchangeFailed) | ErrorKind::Http(_)
        )
    }

    /// True when the provider refused the refresh token.
    pub fn is_refresh_rejection(&self) -> bool {
        self.error_kind == ErrorKind::OAuth(OAuthErrorKind::RefreshFailed)
    }

    /// True for failures a later retry may clear without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.error_kind,
            ErrorKind::Http(HttpErrorKind::Timeout)
                | ErrorKind::Http(HttpErrorKind::Network)
                | ErrorKind::Http(HttpErrorKind::Upstream)
                | ErrorKind::Token(TokenErrorKind::ExpiredPendingRefresh)
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Config(ConfigErrorKind::Missing) => {
                write!(f, "no client configuration has been written")
            }
            ErrorKind::Config(ConfigErrorKind::Incomplete) => {
                write!(
                    f,
                    "client configuration requires client_id, client_secret and redirect_base_url"
                )
            }
            ErrorKind::Config(ConfigErrorKind::InvalidInput) => write!(f, "invalid input"),
            ErrorKind::OAuth(OAuthErrorKind::StateMismatch) => {
                write!(f, "unknown, expired or already used authorization state")
            }
            ErrorKind::OAuth(OAuthErrorKind::ExchangeFailed) => {
                write!(f, "authorization code exchange failed")
            }
            ErrorKind::OAuth(OAuthErrorKind::RefreshFailed) => {
                write!(f, "refresh token rejected; re-authorization required")
            }
            ErrorKind::Token(TokenErrorKind::NotFound) => {
                write!(f, "no token available; complete the authorization flow")
            }
            ErrorKind::Token(TokenErrorKind::ExpiredPendingRefresh) => {
                write!(f, "token expired and is pending refresh; retry shortly")
            }
            ErrorKind::Storage(kind) => write!(f, "storage error: {:?}", kind),
            ErrorKind::Http(HttpErrorKind::Timeout) => {
                write!(f, "request to the provider timed out")
            }
            ErrorKind::Http(kind) => write!(f, "HTTP error: {:?}", kind),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.error_kind, source),
            None => write!(f, "{}", self.error_kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = if err.is_timeout() {
            ErrorKind::Http(HttpErrorKind::Timeout)
        } else if err.is_builder() {
            ErrorKind::Http(HttpErrorKind::BuilderFailed)
        } else {
            ErrorKind::Http(HttpErrorKind::Network)
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Storage(StorageErrorKind::Corrupt),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Storage(StorageErrorKind::Unavailable),
        }
    }
}

/// Helper function to create configuration errors.
pub fn config_error(kind: ConfigErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Config(kind),
    }
}

/// Helper function to create OAuth errors.
pub fn oauth_error(kind: OAuthErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::OAuth(kind),
    }
}

/// Helper function to create token errors.
pub fn token_error(kind: TokenErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Token(kind),
    }
}

/// Helper function to create storage errors.
pub fn storage_error(kind: StorageErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Storage(kind),
    }
}

/// Wrap a non-successful provider response as an error of the given kind.
pub fn provider_error(error_kind: ErrorKind, status: u16, body: String) -> Error {
    Error {
        source: Some(Box::new(ProviderError { status, body })),
        error_kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_source_message() {
        let err = oauth_error(OAuthErrorKind::StateMismatch, "state abc not found");
        assert_eq!(
            err.to_string(),
            "unknown, expired or already used authorization state: state abc not found"
        );
    }

    #[test]
    fn test_incomplete_config_names_every_required_field() {
        let message = ErrorKind::Config(ConfigErrorKind::Incomplete).to_string();
        for field in ["client_id", "client_secret", "redirect_base_url"] {
            assert!(message.contains(field), "{} missing from {:?}", field, message);
        }
    }

    #[test]
    fn test_expired_pending_refresh_tells_caller_to_retry() {
        let err = Error::new(ErrorKind::Token(TokenErrorKind::ExpiredPendingRefresh));
        assert!(err.to_string().contains("retry shortly"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_provider_error_body_is_attached() {
        let err = provider_error(
            ErrorKind::OAuth(OAuthErrorKind::ExchangeFailed),
            400,
            r#"{"error":"invalid_grant"}"#.to_string(),
        );
        assert!(err.is_exchange_failure());
        assert!(err.to_string().contains("invalid_grant"));
        let source = err.source().map(|s| s.to_string()).unwrap_or_default();
        assert!(source.contains("status 400"));
    }

    #[test]
    fn test_http_failures_count_as_exchange_failures() {
        let err = Error::new(ErrorKind::Http(HttpErrorKind::Timeout));
        assert!(err.is_exchange_failure());
        assert!(!err.is_refresh_rejection());
    }

    #[test]
    fn test_serde_errors_map_to_corrupt_storage() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = parse_err.into();
        assert_eq!(
            err.error_kind,
            ErrorKind::Storage(StorageErrorKind::Corrupt)
        );
    }
}
