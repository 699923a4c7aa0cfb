//! Hashing for change detection.
//!
//! Hashes are SHA-256 over canonical JSON: object keys are sorted, so two
//! values that compare equal always hash the same.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::spec::StackConfig;

/// Hasher for configurations and realized property bags.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Hash of the whole stack configuration.
    #[must_use]
    pub fn hash_config(&self, config: &StackConfig) -> String {
        self.hash_serializable(config)
    }

    /// Hash of a realized property bag.
    #[must_use]
    pub fn hash_properties(&self, properties: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(properties.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn hash_serializable<T: Serialize>(&self, value: &T) -> String {
        // Going through `Value` sorts every map by key.
        let canonical = serde_json::to_value(value).unwrap_or(Value::Null);
        self.hash_properties(&canonical)
    }

    /// First 8 characters, for display.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Constant-time comparison of two hashes.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_property_hash_ignores_key_order() {
        let hasher = ConfigHasher::new();
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": 2, "x": 3}}"#).expect("json");
        let b: Value = serde_json::from_str(r#"{"a": {"x": 3, "y": 2}, "b": 1}"#).expect("json");
        assert_eq!(hasher.hash_properties(&a), hasher.hash_properties(&b));
        assert_ne!(hasher.hash_properties(&a), hasher.hash_properties(&json!({ "b": 2 })));
    }

    #[test]
    fn test_config_hash_tracks_changes() {
        let hasher = ConfigHasher::new();
        let mut config: StackConfig =
            serde_yaml::from_str("project:\n  name: blackcandy\n").expect("parses");
        let before = hasher.hash_config(&config);
        assert_eq!(before, hasher.hash_config(&config));

        config.app.replicas = 4;
        assert_ne!(before, hasher.hash_config(&config));
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        assert_eq!(hasher.short_hash("abcdef1234567890"), "abcdef12");
    }

    #[test]
    fn test_hashes_match() {
        assert!(ConfigHasher::hashes_match("abc123", "abc123"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc124"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc12"));
    }
}
