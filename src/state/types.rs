//! Recorded stack state.
//!
//! The state holds one record per realized declaration. It is what makes
//! repeated runs idempotent and what teardown walks, in reverse, to delete
//! resources.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::graph::{DeclarationMode, ResolvedResource, ResourceId};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Number of history entries kept.
const MAX_HISTORY: usize = 100;

/// The complete recorded state of one stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Stack name.
    pub stack: String,
    /// Hash of the last applied configuration.
    pub config_hash: String,
    /// Records keyed by the textual identity `type::name`.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Recent operations.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// A realized resource as recorded in state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Identity of the declaration.
    pub id: ResourceId,
    /// Provider-assigned identifier.
    pub provider_id: String,
    /// Hash of the realized input properties.
    pub properties_hash: String,
    /// Last known outputs.
    pub outputs: Value,
    /// Output keys that must be masked.
    #[serde(default)]
    pub secret_outputs: BTreeSet<String>,
    /// Managed or lookup.
    pub mode: DeclarationMode,
    /// Declarations this one depended on when it was realized.
    #[serde(default)]
    pub dependencies: Vec<ResourceId>,
    /// Declaration providing this resource's provider configuration.
    #[serde(default)]
    pub provider: Option<ResourceId>,
    /// Logical parent.
    #[serde(default)]
    pub parent: Option<ResourceId>,
    /// When the resource was first realized.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

/// A single entry in the stack history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the operation finished.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: StackOperation,
    /// Configuration hash at the time.
    pub config_hash: String,
    /// Resources touched, in textual form.
    pub resources: Vec<String>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message of a failed operation.
    #[serde(default)]
    pub error: Option<String>,
}

/// Operations recorded in history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StackOperation {
    /// Resources were created or updated.
    Up,
    /// Resources were deleted.
    Destroy,
}

impl StackState {
    /// Creates an empty state.
    #[must_use]
    pub fn new(project: &str, stack: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            stack: stack.to_string(),
            config_hash: String::new(),
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Returns the record of a resource.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&ResourceRecord> {
        self.resources.get(&id.to_string())
    }

    /// Records a realized resource, keeping its creation time if it was
    /// already known.
    pub fn record(&mut self, resource: &ResolvedResource) {
        let key = resource.id.to_string();
        let created_at = self
            .resources
            .get(&key)
            .map_or(resource.resolved_at, |r| r.created_at);

        self.resources.insert(
            key,
            ResourceRecord {
                id: resource.id.clone(),
                provider_id: resource.provider_id.clone(),
                properties_hash: resource.properties_hash.clone(),
                outputs: resource.outputs.clone(),
                secret_outputs: resource.secret_outputs.clone(),
                mode: resource.mode,
                dependencies: resource.dependencies.clone(),
                provider: resource.provider.clone(),
                parent: resource.parent.clone(),
                created_at,
                updated_at: resource.resolved_at,
            },
        );
        self.last_updated = Utc::now();
    }

    /// Removes a record.
    pub fn remove(&mut self, id: &ResourceId) -> Option<ResourceRecord> {
        let removed = self.resources.remove(&id.to_string());
        if removed.is_some() {
            self.last_updated = Utc::now();
        }
        removed
    }

    /// Identities of every recorded resource.
    #[must_use]
    pub fn ids(&self) -> Vec<&ResourceId> {
        self.resources.values().map(|r| &r.id).collect()
    }

    /// Number of recorded resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Adds a history entry, dropping the oldest beyond the retention limit.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }
}

impl ResourceRecord {
    /// Returns true if the output at `path` (or its top-level key) is secret.
    #[must_use]
    pub fn is_secret_output(&self, path: &str) -> bool {
        let top = path.split('.').next().unwrap_or(path);
        self.secret_outputs.contains(path) || self.secret_outputs.contains(top)
    }
}

impl HistoryEntry {
    /// Creates a successful entry.
    #[must_use]
    pub fn new(operation: StackOperation, config_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed entry.
    #[must_use]
    pub fn failed(
        operation: StackOperation,
        config_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::new(operation, config_hash, resources)
        }
    }
}

impl std::fmt::Display for StackOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Up => "up",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}
