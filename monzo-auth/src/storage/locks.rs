//! Per-key async locks for read-modify-write sequences.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of async mutexes keyed by storage key.
///
/// Callers holding the guard for a key are serialized against every other caller
/// for the same key; different keys never contend.
#[derive(Default)]
pub struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and acquire the lock for `key`.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the DashMap shard is not held across the await.
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = KeyLocks::new();
        let guard = locks.lock("token").await;
        let blocked = timeout(Duration::from_millis(50), locks.lock("token")).await;
        assert!(blocked.is_err());

        drop(guard);
        let acquired = timeout(Duration::from_millis(50), locks.lock("token")).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_contend() {
        let locks = KeyLocks::new();
        let _token = locks.lock("token").await;
        let config = timeout(Duration::from_millis(50), locks.lock("config")).await;
        assert!(config.is_ok());
    }
}
