use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::error::{ResetError, Result};
use crate::secret::Secret;

/// Top-level configuration for the reset coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetConfig {
    /// Confirmation gate settings
    pub gate: GateConfig,
    /// Backend teardown endpoints
    pub backend: BackendConfig,
    /// Secure storage, cache and preservation allowlist
    pub storage: StorageConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Confirmation gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// How long the gate stays armed after the first trigger, in milliseconds
    pub arming_window_ms: u64,
}

/// Backend teardown configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the coordination API, without trailing slash
    pub base_url: String,
    /// Bearer token for the teardown endpoints
    #[serde(default, skip_serializing)]
    pub api_token: Option<Secret<String>>,
    /// Per-request timeout in seconds
    pub request_timeout_seconds: u64,
    /// Upper bound on the whole remote phase in seconds
    pub teardown_deadline_seconds: u64,
}

/// Local storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON file backing secure storage (CLI only)
    pub secure_store_path: PathBuf,
    /// JSON file backing the local cache (CLI only)
    pub cache_path: PathBuf,
    /// Session-identifying secure storage keys deleted on reset
    pub secure_keys: Vec<String>,
    /// Cache keys that survive a reset
    pub preserved_cache_keys: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, text)
    pub format: Option<String>,
    /// Include target
    pub include_target: Option<bool>,
    /// Include line number
    pub include_line_number: Option<bool>,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            gate: GateConfig {
                arming_window_ms: 5_000,
            },
            backend: BackendConfig {
                base_url: "http://localhost:3000/api".to_string(),
                api_token: None,
                request_timeout_seconds: 10,
                teardown_deadline_seconds: 15,
            },
            storage: StorageConfig {
                secure_store_path: PathBuf::from("data/secure.json"),
                cache_path: PathBuf::from("data/cache.json"),
                secure_keys: vec![
                    "workerId".to_string(),
                    "displayName".to_string(),
                    "activeGroupId".to_string(),
                    "sessionToken".to_string(),
                ],
                preserved_cache_keys: vec![
                    "onboardingSeen".to_string(),
                    "hide_permission_banner".to_string(),
                ],
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: Some("text".to_string()),
                include_target: Some(false),
                include_line_number: Some(true),
            },
        }
    }
}

impl ResetConfig {
    /// Load configuration from file, layered with `SESSION_RESET_<SECTION>__<FIELD>`
    /// environment variables
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("SESSION_RESET")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Save configuration to file. The API token is never written.
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let toml_string =
            toml::to_string_pretty(self).map_err(|e| ResetError::Serialization(e.to_string()))?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    pub fn arming_window(&self) -> Duration {
        Duration::from_millis(self.gate.arming_window_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_seconds)
    }

    pub fn teardown_deadline(&self) -> Duration {
        Duration::from_secs(self.backend.teardown_deadline_seconds)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.gate.arming_window_ms == 0 {
            return Err(ResetError::Config("Arming window cannot be 0".to_string()));
        }

        if self.backend.base_url.trim().is_empty() {
            return Err(ResetError::Config("Backend base URL cannot be empty".to_string()));
        }

        reqwest::Url::parse(&self.backend.base_url)
            .map_err(|e| ResetError::Config(format!("Invalid backend base URL: {}", e)))?;

        if self.backend.request_timeout_seconds == 0 {
            return Err(ResetError::Config("Request timeout cannot be 0".to_string()));
        }

        if self.backend.teardown_deadline_seconds < self.backend.request_timeout_seconds {
            return Err(ResetError::Config(
                "Teardown deadline cannot be shorter than the request timeout".to_string(),
            ));
        }

        if let Some(key) = self
            .storage
            .preserved_cache_keys
            .iter()
            .find(|key| self.storage.secure_keys.contains(key))
        {
            return Err(ResetError::Config(format!(
                "Key '{}' cannot be both a secure key and a preserved cache key",
                key
            )));
        }

        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.logging.level = log_level;
        }

        if let Ok(base_url) = std::env::var("SESSION_RESET_BACKEND_URL") {
            self.backend.base_url = base_url;
        }

        if std::env::var_os("SESSION_RESET_API_TOKEN").is_some() {
            self.backend.api_token = Some(Secret::from_env("SESSION_RESET_API_TOKEN")?);
        }

        info!("Applied environment variable overrides");
        Ok(())
    }
}
