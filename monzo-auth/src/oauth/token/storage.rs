//! Typed access to the persisted token record.

use std::sync::Arc;

use super::{PlainTokens, Tokens};
use crate::error::Error;
use crate::storage::{get_json, put_json, Storage, TOKEN_KEY};

/// Store for the single token record of a deployment.
///
/// Every write replaces the whole record; there is no partial update.
/// Callers that read, decide and write must hold the `token` key lock.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn Storage>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Retrieve the stored tokens (may be expired).
    pub async fn get(&self) -> Result<Option<Tokens>, Error> {
        let plain: Option<PlainTokens> = get_json(self.storage.as_ref(), TOKEN_KEY).await?;
        Ok(plain.map(Tokens::from))
    }

    /// Replace the stored tokens.
    pub async fn store(&self, tokens: &Tokens) -> Result<(), Error> {
        put_json(self.storage.as_ref(), TOKEN_KEY, &tokens.clone().into_plain()).await
    }

    /// Delete the stored tokens.
    pub async fn delete(&self) -> Result<(), Error> {
        self.storage.delete(TOKEN_KEY).await
    }
}
