use crate::error::{ResetError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Credential material that must never reach logs.
///
/// Used for the backend API token and for session token values read out of
/// secure storage. `Debug`, `Display` and `Serialize` all redact.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret<T> {
    inner: T,
}

impl<T> Secret<T> {
    pub fn new(value: T) -> Self {
        Self { inner: value }
    }

    /// Borrow the raw credential
    pub fn expose_secret(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl Secret<String> {
    /// Load a credential from an environment variable.
    ///
    /// # Errors
    /// Fails if the variable is unset or empty.
    pub fn from_env(var_name: &str) -> Result<Self> {
        let value = std::env::var(var_name).map_err(|e| {
            ResetError::Secret(format!("Environment variable '{}' not set: {}", var_name, e))
        })?;

        if value.trim().is_empty() {
            return Err(ResetError::Secret(format!(
                "Environment variable '{}' is empty",
                var_name
            )));
        }

        Ok(Self::new(value))
    }

    /// Value to send in an `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.inner)
    }
}

impl<T> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for Secret<String> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl Serialize for Secret<String> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for Secret<String> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Secret::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_redacted() {
        let token = Secret::new("sess-4f1c9".to_string());
        assert_eq!(format!("{:?}", token), "[REDACTED]");
        assert_eq!(format!("{}", token), "[REDACTED]");
        assert_eq!(serde_json::to_string(&token).unwrap(), "\"[REDACTED]\"");
    }

    #[test]
    fn test_secret_bearer() {
        let token = Secret::new("abc".to_string());
        assert_eq!(token.bearer(), "Bearer abc");
        assert_eq!(token.expose_secret(), "abc");
    }

    #[test]
    fn test_secret_from_env() {
        std::env::set_var("SESSION_RESET_TEST_TOKEN", "value");
        let secret = Secret::<String>::from_env("SESSION_RESET_TEST_TOKEN").unwrap();
        assert_eq!(secret.expose_secret(), "value");
        std::env::remove_var("SESSION_RESET_TEST_TOKEN");
    }

    #[test]
    fn test_secret_from_env_empty() {
        std::env::set_var("SESSION_RESET_TEST_EMPTY", "  ");
        let result = Secret::<String>::from_env("SESSION_RESET_TEST_EMPTY");
        assert!(matches!(result, Err(ResetError::Secret(msg)) if msg.contains("empty")));
        std::env::remove_var("SESSION_RESET_TEST_EMPTY");
    }

    #[test]
    fn test_secret_deserializes_raw_value() {
        let token: Secret<String> = serde_json::from_str("\"raw\"").unwrap();
        assert_eq!(token.expose_secret(), "raw");
    }
}
