//! OAuth 2.0 authorization code flow.
//!
//! Provides state management, the provider seam, and token lifecycle management.

mod provider;
mod state;

pub mod providers;
pub mod token;

pub use provider::{AuthorizationRequest, Provider, TokenResponse};
pub use state::{PendingAuthorization, StateManager};
