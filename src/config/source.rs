//! Named stack values.
//!
//! A [`ConfigSource`] is the explicit configuration object handed to stack
//! construction. Values come from the `values` section of the stack file
//! after environment overrides. They are returned as known [`Deferred`]
//! values so they compose with resource outputs.

use std::collections::BTreeMap;

use crate::error::ConfigError;
use crate::graph::Deferred;

use super::spec::StackConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SourceValue {
    value: String,
    secret: bool,
}

/// Required and optional named values supplied before any declaration.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    values: BTreeMap<String, SourceValue>,
}

impl ConfigSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the `values` section of a stack configuration.
    #[must_use]
    pub fn from_config(config: &StackConfig) -> Self {
        let values = config
            .values
            .iter()
            .map(|(key, value)| {
                (
                    key.clone(),
                    SourceValue {
                        value: value.value().to_string(),
                        secret: value.is_secret(),
                    },
                )
            })
            .collect();
        Self { values }
    }

    /// Adds a plain value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(
            key.into(),
            SourceValue {
                value: value.into(),
                secret: false,
            },
        );
        self
    }

    /// Adds a secret value.
    #[must_use]
    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(
            key.into(),
            SourceValue {
                value: value.into(),
                secret: true,
            },
        );
        self
    }

    /// An optional value. Values flagged secret stay secret.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Deferred<String>> {
        self.values.get(key).map(|v| {
            let value = Deferred::ready(v.value.clone());
            if v.secret { value.into_secret() } else { value }
        })
    }

    /// A required value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingValue`] if the key is absent or empty.
    pub fn require(&self, key: &str) -> Result<Deferred<String>, ConfigError> {
        match self.values.get(key) {
            Some(v) if !v.value.is_empty() => self.get(key).ok_or_else(|| missing(key)),
            _ => Err(missing(key)),
        }
    }

    /// A required value that is always treated as secret.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingValue`] if the key is absent or empty.
    pub fn require_secret(&self, key: &str) -> Result<Deferred<String>, ConfigError> {
        self.require(key).map(Deferred::into_secret)
    }

    /// Keys of every value, in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Returns true if `key` is flagged secret.
    #[must_use]
    pub fn is_secret(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|v| v.secret)
    }
}

fn missing(key: &str) -> ConfigError {
    ConfigError::MissingValue {
        key: key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_require_and_get() {
        let source = ConfigSource::new()
            .with("gke-cluster-id", "main")
            .with_secret("vpc-id", "vpc-1");

        let cluster = source.require("gke-cluster-id").expect("present");
        assert_eq!(cluster.resolve().await, Ok(String::from("main")));
        assert!(!cluster.is_secret());

        assert!(source.get("vpc-id").expect("present").is_secret());
        assert!(source.require_secret("gke-cluster-id").expect("present").is_secret());
        assert!(source.get("missing").is_none());
    }

    #[test]
    fn test_missing_and_empty_values_fail() {
        let source = ConfigSource::new().with("empty", "");

        let err = source.require("hub-project").expect_err("absent");
        assert!(matches!(err, ConfigError::MissingValue { key } if key == "hub-project"));
        assert!(source.require_secret("empty").is_err());
    }
}
