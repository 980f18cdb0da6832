use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StorageError;
use crate::storage::{LocalCache, SecureStorage};

/// JSON-object file used as a storage backend by the CLI.
///
/// Every mutation rewrites the whole file through a sibling temp file and a
/// rename, so readers never observe a half-written object. A missing file is
/// an empty store.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Map<String, Value>, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(StorageError::Unavailable(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StorageError::Corrupt(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
            Err(e) => Err(StorageError::Corrupt(format!("{}: {}", self.path.display(), e))),
        }
    }

    async fn persist(&self, map: &Map<String, Value>, key: &str) -> Result<(), StorageError> {
        let write_err = |reason: String| StorageError::Write {
            key: key.to_string(),
            reason,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| write_err(e.to_string()))?;
        }

        let payload = serde_json::to_vec_pretty(map).map_err(|e| write_err(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, payload)
            .await
            .map_err(|e| write_err(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| write_err(e.to_string()))?;

        debug!(path = %self.path.display(), entries = map.len(), "Persisted store");
        Ok(())
    }

    async fn update<F>(&self, key: &str, mutate: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut Map<String, Value>) -> bool,
    {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load().await?;
        if mutate(&mut map) {
            self.persist(&map, key).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SecureStorage for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.load().await?.remove(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(value)) => Ok(Some(value)),
            Some(_) => Err(StorageError::Read {
                key: key.to_string(),
                reason: "secure value is not a string".to_string(),
            }),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let value = Value::String(value.to_string());
        self.update(key, |map| {
            map.insert(key.to_string(), value);
            true
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.update(key, |map| map.remove(key).is_some()).await
    }
}

#[async_trait]
impl LocalCache for JsonFileStore {
    async fn list_keys(&self) -> Result<BTreeSet<String>, StorageError> {
        Ok(self.load().await?.keys().cloned().collect())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.update(key, |map| {
            map.insert(key.to_string(), value);
            true
        })
        .await
    }

    async fn remove_many(&self, keys: &[String]) -> Result<(), StorageError> {
        let label = format!("{} keys", keys.len());
        self.update(&label, |map| {
            let before = map.len();
            for key in keys {
                map.remove(key);
            }
            map.len() != before
        })
        .await
    }
}
