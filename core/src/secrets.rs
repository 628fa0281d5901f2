//! Environment-backed secret loading. A process-wide instance is created
//! once at startup (see [`crate::config`]) and referenced read-only from
//! then on; its set of loaded values feeds [`crate::security::scrub_value`].

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::SecurityError;

const MIN_SECRET_LEN: usize = 4;

pub struct SecretsLoader {
    loaded: RwLock<HashMap<String, String>>,
}

impl SecretsLoader {
    pub fn new() -> Self {
        Self {
            loaded: RwLock::new(HashMap::new()),
        }
    }

    /// Read `name` from the environment, caching the value. Fails if the
    /// variable is unset or shorter than [`MIN_SECRET_LEN`].
    pub fn require(&self, name: &str) -> Result<String, SecurityError> {
        if let Some(cached) = self.loaded.read().get(name) {
            return Ok(cached.clone());
        }
        let value = std::env::var(name).map_err(|_| SecurityError::SecretNotFound(name.to_string()))?;
        if value.len() < MIN_SECRET_LEN {
            return Err(SecurityError::SecretInvalid(name.to_string()));
        }
        self.loaded.write().insert(name.to_string(), value.clone());
        Ok(value)
    }

    pub fn optional(&self, name: &str) -> Option<String> {
        self.require(name).ok()
    }

    /// Snapshot of every value loaded so far, for use by the scrubber.
    pub fn known_values(&self) -> Vec<String> {
        self.loaded.read().values().cloned().collect()
    }
}

impl Default for SecretsLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_missing_fails() {
        let loader = SecretsLoader::new();
        assert!(loader.require("KESTREL_TEST_DOES_NOT_EXIST_XYZ").is_err());
    }

    #[test]
    fn require_too_short_fails() {
        std::env::set_var("KESTREL_TEST_SHORT", "ab");
        let loader = SecretsLoader::new();
        assert!(loader.require("KESTREL_TEST_SHORT").is_err());
        std::env::remove_var("KESTREL_TEST_SHORT");
    }

    #[test]
    fn require_caches_and_feeds_known_values() {
        std::env::set_var("KESTREL_TEST_SECRET", "abcdefgh");
        let loader = SecretsLoader::new();
        let value = loader.require("KESTREL_TEST_SECRET").unwrap();
        assert_eq!(value, "abcdefgh");
        assert!(loader.known_values().contains(&"abcdefgh".to_string()));
        std::env::remove_var("KESTREL_TEST_SECRET");
    }

    #[test]
    fn optional_returns_none_when_unset() {
        let loader = SecretsLoader::new();
        assert!(loader.optional("KESTREL_TEST_DOES_NOT_EXIST_ABC").is_none());
    }
}
