//! Per-call deadline for providers.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::error::ProviderError;
use crate::graph::ResourceId;

use super::{DeleteRequest, Provider, ProviderRequest, ProviderResponse, ProviderResult};

/// Fails any call that takes longer than the configured deadline.
#[derive(Debug)]
pub struct TimeoutProvider<P> {
    inner: P,
    timeout: Duration,
}

impl<P: Provider> TimeoutProvider<P> {
    /// Wraps `inner` with a deadline.
    pub const fn new(inner: P, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn guard<T: Send>(
        &self,
        id: &ResourceId,
        call: impl Future<Output = ProviderResult<T>> + Send,
    ) -> ProviderResult<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(ProviderError::Timeout {
                    id: id.clone(),
                    timeout_secs: self.timeout.as_secs(),
                })
            })
    }
}

#[async_trait]
impl<P: Provider> Provider for TimeoutProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn create(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        self.guard(&request.id, self.inner.create(request)).await
    }

    async fn read(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        self.guard(&request.id, self.inner.read(request)).await
    }

    async fn update(
        &self,
        provider_id: &str,
        request: &ProviderRequest,
    ) -> ProviderResult<ProviderResponse> {
        self.guard(&request.id, self.inner.update(provider_id, request))
            .await
    }

    async fn delete(&self, request: &DeleteRequest) -> ProviderResult<()> {
        self.guard(&request.id, self.inner.delete(request)).await
    }
}
