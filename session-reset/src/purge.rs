use metrics::counter;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{PurgeError, PurgeTarget};
use crate::storage::{LocalCache, SecureKey, SecureStorage};

/// Cache keys describing the device rather than the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreservationAllowlist {
    keys: BTreeSet<String>,
}

impl PreservationAllowlist {
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn keys(&self) -> &BTreeSet<String> {
        &self.keys
    }

    /// `all_keys - allowlist`, in key order
    pub fn removable(&self, all_keys: &BTreeSet<String>) -> Vec<String> {
        all_keys.difference(&self.keys).cloned().collect()
    }
}

impl Default for PreservationAllowlist {
    fn default() -> Self {
        Self::new(["onboardingSeen", "hide_permission_banner"])
    }
}

/// What a purge actually removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    pub secure_keys_deleted: Vec<String>,
    pub cache_keys_removed: Vec<String>,
    pub cache_keys_preserved: Vec<String>,
}

/// Deletes session identity and clears the cache except the allowlist.
///
/// Best-effort, not transactional: every secure key is attempted even after
/// a failure, and all failures are reported together.
#[derive(Clone)]
pub struct LocalPurger {
    secure: Arc<dyn SecureStorage>,
    cache: Arc<dyn LocalCache>,
    secure_keys: Vec<String>,
    allowlist: PreservationAllowlist,
}

impl LocalPurger {
    pub fn new(
        secure: Arc<dyn SecureStorage>,
        cache: Arc<dyn LocalCache>,
        secure_keys: Vec<String>,
        allowlist: PreservationAllowlist,
    ) -> Self {
        Self {
            secure,
            cache,
            secure_keys,
            allowlist,
        }
    }

    /// Purger over the standard session keys and the default allowlist
    pub fn with_defaults(secure: Arc<dyn SecureStorage>, cache: Arc<dyn LocalCache>) -> Self {
        Self::new(
            secure,
            cache,
            SecureKey::ALL.iter().map(|k| k.as_str().to_string()).collect(),
            PreservationAllowlist::default(),
        )
    }

    pub fn allowlist(&self) -> &PreservationAllowlist {
        &self.allowlist
    }

    pub async fn purge_local(&self) -> Result<PurgeSummary, PurgeError> {
        let mut summary = PurgeSummary::default();
        let mut failures = Vec::new();

        for key in &self.secure_keys {
            match self.secure.delete(key).await {
                Ok(()) => summary.secure_keys_deleted.push(key.clone()),
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to delete secure storage key");
                    failures.push((PurgeTarget::SecureKey(key.clone()), e));
                }
            }
        }

        match self.cache.list_keys().await {
            Ok(all_keys) => {
                let to_remove = self.allowlist.removable(&all_keys);
                summary.cache_keys_preserved = all_keys
                    .iter()
                    .filter(|key| self.allowlist.contains(key))
                    .cloned()
                    .collect();

                if to_remove.is_empty() {
                    debug!("No cache keys to remove");
                } else {
                    match self.cache.remove_many(&to_remove).await {
                        Ok(()) => summary.cache_keys_removed = to_remove,
                        Err(e) => {
                            warn!(count = to_remove.len(), error = %e, "Failed to clear local cache");
                            failures.push((PurgeTarget::CacheBatch(to_remove), e));
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to enumerate local cache keys");
                failures.push((PurgeTarget::CacheListing, e));
            }
        }

        if !failures.is_empty() {
            counter!("session_reset_purge_failures_total", failures.len() as u64);
            return Err(PurgeError { failures });
        }

        info!(
            secure_keys = summary.secure_keys_deleted.len(),
            cache_removed = summary.cache_keys_removed.len(),
            cache_preserved = summary.cache_keys_preserved.len(),
            "Local state purged"
        );
        Ok(summary)
    }
}

impl std::fmt::Debug for LocalPurger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPurger")
            .field("secure_keys", &self.secure_keys)
            .field("allowlist", &self.allowlist)
            .finish_non_exhaustive()
    }
}
