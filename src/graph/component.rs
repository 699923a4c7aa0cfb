//! Component scopes.
//!
//! A component groups several declarations under one logical parent. The
//! component itself is never sent to a provider; it only prefixes child
//! names and stamps the parent on every child declaration.

use super::declaration::DeclarationOptions;
use super::id::ResourceId;

/// Logical parent of a group of declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentScope {
    id: ResourceId,
}

impl ComponentScope {
    /// Creates a component scope.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(kind, name),
        }
    }

    /// Identity of the component.
    #[must_use]
    pub const fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Name of the component.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// Name of a child declaration: `component/child`.
    #[must_use]
    pub fn child_name(&self, child: &str) -> String {
        format!("{}/{child}", self.id.name)
    }

    /// Options for a child declaration, with the parent set.
    #[must_use]
    pub fn options(&self) -> DeclarationOptions {
        DeclarationOptions::new().parent(self.id.clone())
    }
}
