//! OAuth provider implementations.

pub mod monzo;
