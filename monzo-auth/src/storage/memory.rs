//! In-process storage backend.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::Storage;
use crate::error::Error;

/// Storage held in memory for the lifetime of the process.
///
/// Used by tests and by deployments that re-authorize on every start.
#[derive(Default)]
pub struct MemoryStorage {
    records: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        let records = self.records.lock().await;
        Ok(records.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), Error> {
        let mut records = self.records.lock().await;
        records.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let mut records = self.records.lock().await;
        records.remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<Value>, Error> {
        let mut records = self.records.lock().await;
        Ok(records.remove(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let records = self.records.lock().await;
        let mut keys: Vec<String> = records
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
