//! Dispatch by resource type package.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::graph::ResourceId;

use super::{DeleteRequest, Provider, ProviderRequest, ProviderResponse, ProviderResult};

/// Routes each call to the provider registered for the package of the
/// resource type (`gcp` for `gcp:sql:User`).
#[derive(Default)]
pub struct ProviderRouter {
    routes: BTreeMap<String, Arc<dyn Provider>>,
    fallback: Option<Arc<dyn Provider>>,
}

impl ProviderRouter {
    /// Creates a router with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider for a package.
    #[must_use]
    pub fn route(mut self, package: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.routes.insert(package.into(), provider);
        self
    }

    /// Provider used for packages without a route.
    #[must_use]
    pub fn fallback(mut self, provider: Arc<dyn Provider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    fn resolve(&self, id: &ResourceId) -> ProviderResult<&Arc<dyn Provider>> {
        self.routes
            .get(id.package())
            .or(self.fallback.as_ref())
            .ok_or_else(|| ProviderError::NoProvider { id: id.clone() })
    }
}

impl std::fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRouter")
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

#[async_trait]
impl Provider for ProviderRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn create(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        self.resolve(&request.id)?.create(request).await
    }

    async fn read(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        self.resolve(&request.id)?.read(request).await
    }

    async fn update(
        &self,
        provider_id: &str,
        request: &ProviderRequest,
    ) -> ProviderResult<ProviderResponse> {
        self.resolve(&request.id)?.update(provider_id, request).await
    }

    async fn delete(&self, request: &DeleteRequest) -> ProviderResult<()> {
        self.resolve(&request.id)?.delete(request).await
    }
}
