use thiserror::Error;

/// Errors raised by the session reset library outside of the teardown flow itself
#[derive(Error, Debug)]
pub enum ResetError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Secret management error
    #[error("Secret error: {0}")]
    Secret(String),

    /// Secure storage or cache error
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias using ResetError
pub type Result<T> = std::result::Result<T, ResetError>;

impl From<String> for ResetError {
    fn from(s: String) -> Self {
        ResetError::Other(s)
    }
}

impl From<&str> for ResetError {
    fn from(s: &str) -> Self {
        ResetError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for ResetError {
    fn from(err: serde_json::Error) -> Self {
        ResetError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for ResetError {
    fn from(err: config::ConfigError) -> Self {
        ResetError::Config(err.to_string())
    }
}

/// Failure reported by a secure storage or local cache collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backing store could not be reached or opened
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Reading a key failed
    #[error("Failed to read '{key}': {reason}")]
    Read { key: String, reason: String },

    /// Writing or deleting a key failed
    #[error("Failed to write '{key}': {reason}")]
    Write { key: String, reason: String },

    /// Stored data could not be decoded
    #[error("Corrupt storage data: {0}")]
    Corrupt(String),
}

/// Failure of a single best-effort backend teardown request.
///
/// Never escapes the remote teardown phase; it is logged and counted only.
#[derive(Error, Debug)]
pub enum TeardownError {
    /// Transport-level failure (DNS, connect, TLS, timeout)
    #[error("Teardown request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a non-success status
    #[error("Teardown rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The request did not settle before the teardown deadline
    #[error("Teardown request did not settle within {0:?}")]
    DeadlineExceeded(std::time::Duration),

    /// Any other backend failure
    #[error("Teardown error: {0}")]
    Other(String),
}

/// One target the purger could not clear
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeTarget {
    /// A secure storage key
    SecureKey(String),
    /// Enumerating the local cache
    CacheListing,
    /// The batched local cache removal
    CacheBatch(Vec<String>),
}

impl std::fmt::Display for PurgeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PurgeTarget::SecureKey(key) => write!(f, "secure key '{}'", key),
            PurgeTarget::CacheListing => f.write_str("cache key listing"),
            PurgeTarget::CacheBatch(keys) => write!(f, "cache batch of {} keys", keys.len()),
        }
    }
}

/// Aggregated local purge failure.
///
/// Collects every failed target; the purge itself keeps going past each one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Local purge incomplete: {} target(s) failed", failures.len())]
pub struct PurgeError {
    pub failures: Vec<(PurgeTarget, StorageError)>,
}

impl PurgeError {
    /// Whether a given secure key failed to delete
    pub fn secure_key_failed(&self, key: &str) -> bool {
        self.failures
            .iter()
            .any(|(target, _)| matches!(target, PurgeTarget::SecureKey(k) if k == key))
    }
}
