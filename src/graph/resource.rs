//! Realized resources.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use super::declaration::DeclarationMode;
use super::id::ResourceId;

/// What the resolver did to realize a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveAction {
    /// The provider created the resource.
    Created,
    /// The provider updated an existing resource.
    Updated,
    /// Inputs matched the recorded state; outputs were reused.
    Unchanged,
    /// An existing resource was looked up.
    Read,
}

/// The realized counterpart of a declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedResource {
    /// Identity of the declaration.
    pub id: ResourceId,
    /// Provider-assigned identifier.
    pub provider_id: String,
    /// Output fields as a JSON object.
    pub outputs: Value,
    /// Output keys that must be masked.
    #[serde(default)]
    pub secret_outputs: BTreeSet<String>,
    /// Hash of the realized input properties.
    pub properties_hash: String,
    /// Whether the resource is managed or looked up.
    pub mode: DeclarationMode,
    /// What the resolver did.
    pub action: ResolveAction,
    /// Declarations this one waited on.
    pub dependencies: Vec<ResourceId>,
    /// Declaration providing this resource's provider configuration.
    pub provider: Option<ResourceId>,
    /// Logical parent (component) of the declaration.
    pub parent: Option<ResourceId>,
    /// When the resolver finished with this declaration.
    pub resolved_at: DateTime<Utc>,
}

impl ResolvedResource {
    /// Looks up an output by dotted path. Numeric segments index arrays,
    /// so `status.loadBalancer.ingress.0.ip` is a valid path.
    #[must_use]
    pub fn output(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.outputs, path)
    }

    /// Returns true if the output at `path` (or its top-level key) is secret.
    #[must_use]
    pub fn is_secret_output(&self, path: &str) -> bool {
        let top = path.split('.').next().unwrap_or(path);
        self.secret_outputs.contains(path) || self.secret_outputs.contains(top)
    }
}

impl std::fmt::Display for ResolveAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Read => "read",
        };
        write!(f, "{s}")
    }
}

/// Walks a dotted path through a JSON value.
#[must_use]
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }

    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
