//! Provider integration.
//!
//! A provider turns a realized declaration into a real resource. The
//! resolver treats it as a black box: every call either succeeds with the
//! resource's outputs or fails with a [`ProviderError`] naming the
//! declaration.

mod http;
mod local;
mod router;
mod timeout;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::error::ProviderError;
use crate::graph::{DeclarationMode, ResourceId};

pub use http::HttpProvider;
pub use local::LocalProvider;
pub use router::ProviderRouter;
pub use timeout::TimeoutProvider;

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A realized declaration handed to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRequest {
    /// Identity of the declaration.
    pub id: ResourceId,
    /// Input properties with every deferred value resolved.
    pub properties: Value,
    /// Outputs of the declaration named as this resource's provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<Value>,
    /// Managed or lookup.
    pub mode: DeclarationMode,
}

/// What a provider reports back for a realized resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResponse {
    /// Provider-assigned identifier.
    pub provider_id: String,
    /// Output fields as a JSON object.
    pub outputs: Value,
    /// Output keys that must be masked.
    #[serde(default)]
    pub secret_outputs: BTreeSet<String>,
}

impl ProviderResponse {
    /// Creates a response with no secret outputs.
    #[must_use]
    pub fn new(provider_id: impl Into<String>, outputs: Value) -> Self {
        Self {
            provider_id: provider_id.into(),
            outputs,
            secret_outputs: BTreeSet::new(),
        }
    }

    /// Flags an output key as secret.
    #[must_use]
    pub fn with_secret(mut self, key: impl Into<String>) -> Self {
        self.secret_outputs.insert(key.into());
        self
    }
}

/// A recorded resource to delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    /// Identity of the resource.
    pub id: ResourceId,
    /// Provider-assigned identifier.
    pub provider_id: String,
    /// Last recorded outputs.
    pub outputs: Value,
    /// Last recorded outputs of the resource's provider declaration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<Value>,
}

/// Backend able to create, read, update and delete resources.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Creates a resource.
    async fn create(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse>;

    /// Reads an existing resource that this stack does not own.
    async fn read(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse>;

    /// Updates a resource previously created under `provider_id`.
    ///
    /// Providers without in-place updates replace the resource.
    async fn update(
        &self,
        provider_id: &str,
        request: &ProviderRequest,
    ) -> ProviderResult<ProviderResponse> {
        let _ = provider_id;
        self.create(request).await
    }

    /// Deletes a resource. Deleting a resource that no longer exists succeeds.
    async fn delete(&self, request: &DeleteRequest) -> ProviderResult<()>;
}

#[async_trait]
impl<P: Provider + ?Sized> Provider for std::sync::Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn create(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        (**self).create(request).await
    }

    async fn read(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        (**self).read(request).await
    }

    async fn update(
        &self,
        provider_id: &str,
        request: &ProviderRequest,
    ) -> ProviderResult<ProviderResponse> {
        (**self).update(provider_id, request).await
    }

    async fn delete(&self, request: &DeleteRequest) -> ProviderResult<()> {
        (**self).delete(request).await
    }
}
