//! File-backed storage: one JSON document per key inside a directory.
//!
//! Writes land in a temporary sibling file that is renamed over the target, so a
//! reader sees either the previous record or the new one, never a torn write.
//! `take` renames the record away before reading it, which hands it to exactly
//! one caller even across processes sharing the directory.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use tracing::debug;

use super::Storage;
use crate::error::{storage_error, Error, StorageErrorKind};

const RECORD_EXTENSION: &str = ".json";

/// Storage rooted at a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Create a file storage rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the records.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, Error> {
        Ok(self.dir.join(file_name_for(key)?))
    }

    fn scratch_path(&self, key: &str, suffix: &str) -> Result<PathBuf, Error> {
        let nonce: [u8; 8] = rand::thread_rng().gen();
        Ok(self.dir.join(format!(
            ".{}.{}.{}",
            file_name_for(key)?,
            hex::encode(nonce),
            suffix
        )))
    }
}

/// Map a logical key onto a file name. Keys are restricted to a safe alphabet so
/// the mapping is reversible and cannot escape the storage directory.
fn file_name_for(key: &str) -> Result<String, Error> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ':');
    if !valid {
        return Err(storage_error(
            StorageErrorKind::Unavailable,
            &format!("invalid storage key: {:?}", key),
        ));
    }
    Ok(format!("{}{}", key.replace(':', "."), RECORD_EXTENSION))
}

fn key_for(file_name: &str) -> Option<String> {
    if file_name.starts_with('.') {
        return None;
    }
    file_name
        .strip_suffix(RECORD_EXTENSION)
        .map(|stem| stem.replace('.', ":"))
}

async fn read_value(path: &Path) -> Result<Option<Value>, Error> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<(), Error> {
    Ok(())
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        read_value(&self.path_for(key)?).await
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), Error> {
        let target = self.path_for(key)?;
        let scratch = self.scratch_path(key, "tmp")?;
        let bytes = serde_json::to_vec_pretty(&value)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&scratch, &bytes).await?;
        restrict_permissions(&scratch).await?;

        if let Err(e) = tokio::fs::rename(&scratch, &target).await {
            let _ = tokio::fs::remove_file(&scratch).await;
            return Err(e.into());
        }
        debug!("Stored record {}", key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        match tokio::fs::remove_file(self.path_for(key)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn take(&self, key: &str) -> Result<Option<Value>, Error> {
        let target = self.path_for(key)?;
        let claimed = self.scratch_path(key, "taken")?;

        match tokio::fs::rename(&target, &claimed).await {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let value = read_value(&claimed).await;
        let _ = tokio::fs::remove_file(&claimed).await;
        value
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(key) = file_name.to_str().and_then(key_for) else {
                continue;
            };
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
