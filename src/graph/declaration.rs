//! Resource declarations.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::DeferredError;

use super::deferred::Deferred;
use super::id::ResourceId;
use super::property::Properties;
use super::resource::ResolvedResource;

/// How a declaration is realized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclarationMode {
    /// The provider creates and owns the resource.
    #[default]
    Managed,
    /// The resource already exists and is only read.
    Lookup,
}

/// Options attached to a declaration.
#[derive(Debug, Clone, Default)]
pub struct DeclarationOptions {
    /// Declarations that must resolve first, beyond those referenced by
    /// deferred properties.
    pub depends_on: Vec<ResourceId>,
    /// Declaration whose outputs configure the provider for this resource.
    pub provider: Option<ResourceId>,
    /// Logical parent used for grouping.
    pub parent: Option<ResourceId>,
    /// Managed or lookup.
    pub mode: DeclarationMode,
    /// Output keys that consumers should treat as secret.
    pub secret_outputs: Vec<String>,
}

impl DeclarationOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an explicit predecessor.
    #[must_use]
    pub fn depends_on(mut self, id: ResourceId) -> Self {
        self.depends_on.push(id);
        self
    }

    /// Sets the provider declaration.
    #[must_use]
    pub fn provider(mut self, id: ResourceId) -> Self {
        self.provider = Some(id);
        self
    }

    /// Sets the parent.
    #[must_use]
    pub fn parent(mut self, id: ResourceId) -> Self {
        self.parent = Some(id);
        self
    }

    /// Marks the declaration as a lookup of an existing resource.
    #[must_use]
    pub const fn lookup(mut self) -> Self {
        self.mode = DeclarationMode::Lookup;
        self
    }

    /// Marks an output key as secret.
    #[must_use]
    pub fn secret_output(mut self, key: impl Into<String>) -> Self {
        self.secret_outputs.push(key.into());
        self
    }
}

/// A named, typed request to create, update or read one resource.
///
/// Cloning is cheap; clones share the same pending result.
#[derive(Debug, Clone)]
pub struct ResourceDeclaration {
    id: ResourceId,
    properties: Arc<Properties>,
    options: Arc<DeclarationOptions>,
    index: usize,
    resolved: Deferred<Arc<ResolvedResource>>,
}

impl ResourceDeclaration {
    pub(crate) fn new(
        id: ResourceId,
        properties: Properties,
        options: DeclarationOptions,
        index: usize,
        resolved: Deferred<Arc<ResolvedResource>>,
    ) -> Self {
        Self {
            id,
            properties: Arc::new(properties),
            options: Arc::new(options),
            index,
            resolved,
        }
    }

    /// Identity of the declaration.
    #[must_use]
    pub const fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Declared properties.
    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Declared options.
    #[must_use]
    pub fn options(&self) -> &DeclarationOptions {
        &self.options
    }

    /// Position in declaration order.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// The realized resource, once the resolver has handled this declaration.
    #[must_use]
    pub fn resolved(&self) -> Deferred<Arc<ResolvedResource>> {
        self.resolved.clone()
    }

    /// An output field, by dotted path.
    #[must_use]
    pub fn output(&self, path: &str) -> Deferred<Value> {
        output_of(&self.resolved, &self.id, path, self.is_secret_output(path))
    }

    /// A string output field, by dotted path.
    #[must_use]
    pub fn output_string(&self, path: &str) -> Deferred<String> {
        let id = self.id.clone();
        let key = path.to_string();
        self.output(path).try_map(move |value| match value {
            Value::String(s) => Ok(s),
            _ => Err(DeferredError::UnexpectedType {
                id,
                key,
                expected: "string",
            }),
        })
    }

    /// Every declaration this one must wait on: explicit predecessors,
    /// sources of deferred properties, and the provider declaration.
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<ResourceId> {
        let mut deps = self.properties.sources();
        deps.extend(self.options.depends_on.iter().cloned());
        if let Some(provider) = &self.options.provider {
            deps.insert(provider.clone());
        }
        deps
    }

    fn is_secret_output(&self, path: &str) -> bool {
        let top = path.split('.').next().unwrap_or(path);
        self.options
            .secret_outputs
            .iter()
            .any(|k| k == path || k == top)
    }
}

/// Projects an output field out of a pending resolved resource.
pub(crate) fn output_of(
    resolved: &Deferred<Arc<ResolvedResource>>,
    id: &ResourceId,
    path: &str,
    secret: bool,
) -> Deferred<Value> {
    let id = id.clone();
    let key = path.to_string();
    let value = resolved.try_map(move |resource| {
        resource
            .output(&key)
            .cloned()
            .ok_or(DeferredError::MissingOutput { id, key })
    });
    if secret { value.into_secret() } else { value }
}
