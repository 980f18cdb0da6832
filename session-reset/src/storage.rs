//! Storage collaborators consumed by the reset flow.
//!
//! Secure storage holds session identity; the local cache holds non-secret UI
//! flags. Both are opaque to the coordinator and reached only through the
//! traits below.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::secret::Secret;

/// Tamper-resistant key/value store scoped to session identity
#[async_trait]
pub trait SecureStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    /// Deleting an absent key succeeds
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// General-purpose cache of UI convenience state
#[async_trait]
pub trait LocalCache: Send + Sync {
    async fn list_keys(&self) -> Result<BTreeSet<String>, StorageError>;
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
    /// Remove every key in one batch; absent keys are ignored
    async fn remove_many(&self, keys: &[String]) -> Result<(), StorageError>;
}

/// Well-known session-scoped secure storage keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecureKey {
    WorkerId,
    DisplayName,
    ActiveGroupId,
    SessionToken,
}

impl SecureKey {
    pub const ALL: [SecureKey; 4] = [
        SecureKey::WorkerId,
        SecureKey::DisplayName,
        SecureKey::ActiveGroupId,
        SecureKey::SessionToken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecureKey::WorkerId => "workerId",
            SecureKey::DisplayName => "displayName",
            SecureKey::ActiveGroupId => "activeGroupId",
            SecureKey::SessionToken => "sessionToken",
        }
    }
}

impl fmt::Display for SecureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend identifier of the logged-in worker
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    /// Blank identifiers are treated as absent
    pub fn parse(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the current session as held in secure storage
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub worker_id: WorkerId,
    pub display_name: Option<String>,
    pub active_group_id: Option<String>,
    pub session_token: Option<Secret<String>>,
}

impl SessionIdentity {
    /// Read the identity; `Ok(None)` when no worker is logged in.
    ///
    /// Only the worker id read is fatal. Unreadable optional fields load as
    /// `None` so a damaged field never hides the worker from teardown.
    pub async fn load(storage: &dyn SecureStorage) -> Result<Option<Self>, StorageError> {
        let worker_id = match storage.get(SecureKey::WorkerId.as_str()).await? {
            Some(raw) => match WorkerId::parse(raw) {
                Some(id) => id,
                None => return Ok(None),
            },
            None => return Ok(None),
        };

        Ok(Some(Self {
            worker_id,
            display_name: read_optional(storage, SecureKey::DisplayName).await,
            active_group_id: read_optional(storage, SecureKey::ActiveGroupId).await,
            session_token: read_optional(storage, SecureKey::SessionToken)
                .await
                .map(Secret::new),
        }))
    }

    /// Persist every present field
    pub async fn store(&self, storage: &dyn SecureStorage) -> Result<(), StorageError> {
        storage
            .set(SecureKey::WorkerId.as_str(), self.worker_id.as_str())
            .await?;
        if let Some(name) = &self.display_name {
            storage.set(SecureKey::DisplayName.as_str(), name).await?;
        }
        if let Some(group) = &self.active_group_id {
            storage.set(SecureKey::ActiveGroupId.as_str(), group).await?;
        }
        if let Some(token) = &self.session_token {
            storage
                .set(SecureKey::SessionToken.as_str(), token.expose_secret())
                .await?;
        }
        Ok(())
    }
}

async fn read_optional(storage: &dyn SecureStorage, key: SecureKey) -> Option<String> {
    match storage.get(key.as_str()).await {
        Ok(value) => value,
        Err(e) => {
            warn!(key = key.as_str(), error = %e, "Unreadable identity field, treating as absent");
            None
        }
    }
}

/// In-process secure storage, for embedding and tests
#[derive(Debug, Default)]
pub struct MemorySecureStorage {
    entries: DashMap<String, Secret<String>>,
}

impl MemorySecureStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SecureStorage for MemorySecureStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .entries
            .get(key)
            .map(|entry| entry.value().expose_secret().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .insert(key.to_string(), Secret::new(value.to_string()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        if self.entries.remove(key).is_some() {
            debug!(key = %key, "Deleted secure storage entry");
        }
        Ok(())
    }
}

/// In-process local cache, for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Value>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cache pre-populated from a JSON object
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let cache = Self::new();
        for (key, value) in entries {
            cache.entries.insert(key.into(), value);
        }
        cache
    }

    /// Snapshot of the current contents
    pub fn snapshot(&self) -> serde_json::Map<String, Value> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn list_keys(&self) -> Result<BTreeSet<String>, StorageError> {
        Ok(self.entries.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_many(&self, keys: &[String]) -> Result<(), StorageError> {
        for key in keys {
            self.entries.remove(key);
        }
        Ok(())
    }
}
