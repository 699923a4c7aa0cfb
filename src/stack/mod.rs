//! The blackcandy stack.
//!
//! Everything specific to the application lives here: resource type names,
//! the inputs read from configuration, the kubeconfig template, the
//! reusable database component and the stack declaration itself.

mod app;
mod database;
mod inputs;
pub mod kinds;
mod kubeconfig;

use crate::error::GraphError;
use crate::graph::{Properties, PropertyValue, ResourceId};

pub use app::{BlackcandyStack, K8S_PROVIDER_NAME};
pub use database::{CloudSqlArgs, CloudSqlDatabase};
pub use inputs::StackInputs;
pub use kubeconfig::{cluster_kubeconfig, render_kubeconfig};

/// Sets a nested property, reporting a bad path against the declaration
/// about to be made.
fn set_path(
    properties: &mut Properties,
    kind: &str,
    name: &str,
    path: &str,
    value: impl Into<PropertyValue>,
) -> Result<(), GraphError> {
    properties
        .set_path(path, value)
        .map_err(|e| GraphError::InvalidPropertyPath {
            id: ResourceId::new(kind, name),
            path: path.to_string(),
            message: e.0,
        })
}
