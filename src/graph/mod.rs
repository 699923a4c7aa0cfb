//! Resource graph module.
//!
//! This module provides the declaration side of a stack: identities,
//! deferred values, property bags, declarations, and the builder that
//! validates them into an acyclic [`ResourceGraph`].

mod builder;
mod component;
mod declaration;
mod deferred;
mod id;
mod property;
mod resource;

pub(crate) use builder::{GraphNode, ResolvedSender};

pub use builder::{GraphBuilder, ResourceGraph};
pub use component::ComponentScope;
pub use declaration::{DeclarationMode, DeclarationOptions, ResourceDeclaration};
pub use deferred::{Deferred, DeferredResult};
pub use id::ResourceId;
pub use property::{
    PathError, Properties, PropertyValue, COMPUTED_PLACEHOLDER, SECRET_PLACEHOLDER,
};
pub use resource::{lookup_path, ResolveAction, ResolvedResource};
