//! OAuth token management with storage and refresh capabilities.

mod manager;
mod storage;
mod tokens;

pub use manager::{Manager, ManagerSettings};
pub use storage::TokenStore;
pub use tokens::{PlainTokens, RefreshResult, TokenStatus, Tokens, DEFAULT_TOKEN_TYPE};
