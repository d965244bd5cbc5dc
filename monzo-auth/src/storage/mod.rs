//! Key-value persistence for configuration, tokens and pending authorizations.
//!
//! Every record is a JSON document stored under a logical key. Implementations
//! must make each call linearizable per key; `take` in particular must hand a
//! record to at most one caller.

mod file;
mod locks;
mod memory;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::Error;

pub use file::FileStorage;
pub use locks::KeyLocks;
pub use memory::MemoryStorage;

/// Key of the singleton client configuration record.
pub const CONFIG_KEY: &str = "config";
/// Key of the singleton token record.
pub const TOKEN_KEY: &str = "token";
/// Prefix of pending authorization records, followed by the state value.
pub const PENDING_AUTH_PREFIX: &str = "pending_auth:";

/// Trait for a backing key-value store.
///
/// Encryption at rest, replication and retries are the implementation's concern.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read the record under `key`.
    async fn get(&self, key: &str) -> Result<Option<Value>, Error>;

    /// Replace the record under `key` in full.
    async fn put(&self, key: &str, value: Value) -> Result<(), Error>;

    /// Remove the record under `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), Error>;

    /// Atomically read and remove the record under `key`.
    async fn take(&self, key: &str) -> Result<Option<Value>, Error>;

    /// List every key starting with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, Error>;
}

/// Read and decode a typed record.
pub async fn get_json<T: DeserializeOwned>(
    storage: &dyn Storage,
    key: &str,
) -> Result<Option<T>, Error> {
    match storage.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Encode and write a typed record.
pub async fn put_json<T: Serialize>(
    storage: &dyn Storage,
    key: &str,
    record: &T,
) -> Result<(), Error> {
    let value = serde_json::to_value(record)?;
    storage.put(key, value).await
}

/// Atomically read, remove and decode a typed record.
pub async fn take_json<T: DeserializeOwned>(
    storage: &dyn Storage,
    key: &str,
) -> Result<Option<T>, Error> {
    match storage.take(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Storage key of the pending authorization for `state`.
pub fn pending_auth_key(state: &str) -> String {
    format!("{}{}", PENDING_AUTH_PREFIX, state)
}
