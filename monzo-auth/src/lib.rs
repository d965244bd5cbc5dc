//! # monzo-auth
//!
//! OAuth 2.0 token lifecycle for a Monzo API client:
//! - Client configuration records
//! - Authorization URLs bound to one-time CSRF states
//! - Authorization code exchange and single-flight token refresh
//! - A token accessor that never hands out an expired token
//! - Periodic background renewal
//!
//! ## Architecture
//!
//! Every record lives behind the [`storage::Storage`] trait, keyed by
//! `config`, `token` and `pending_auth:<state>`. [`Backend`] exposes the
//! operations a host process maps onto its own surface.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use monzo_auth::{
//!     http::HttpClientBuilder,
//!     oauth::{providers::monzo, token::ManagerSettings},
//!     storage::FileStorage,
//!     Backend,
//! };
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod http;
pub mod oauth;
pub mod scheduler;
pub mod storage;

// Re-export commonly used types
pub use backend::{AuthUrlResponse, Backend, CallbackInput, CallbackResponse, RenewOutcome};
pub use error::{Error, ErrorKind};
pub use scheduler::Scheduler;
