//! Deferred values.
//!
//! A [`Deferred`] is a value that becomes known only once some other
//! resource has been realized. It is backed by a shared future, so awaiting
//! it any number of times yields the same cached result, and it tracks the
//! identities of the declarations it is derived from. Those identities are
//! how the graph builder discovers implicit dependency edges.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::error::DeferredError;

use super::id::ResourceId;

/// Result of resolving a deferred value.
pub type DeferredResult<T> = std::result::Result<T, DeferredError>;

/// A value produced by another resource's eventual output.
#[derive(Clone)]
pub struct Deferred<T: Clone + Send + Sync + 'static> {
    future: Shared<BoxFuture<'static, DeferredResult<T>>>,
    sources: Arc<BTreeSet<ResourceId>>,
    secret: bool,
}

impl<T: Clone + Send + Sync + 'static> Deferred<T> {
    /// Wraps an already-known value. It has no sources.
    #[must_use]
    pub fn ready(value: T) -> Self {
        let future = futures::future::ready(Ok::<T, DeferredError>(value)).boxed();
        Self::from_future(future, BTreeSet::new())
    }

    /// Wraps an already-known value that must be masked in output.
    #[must_use]
    pub fn secret(value: T) -> Self {
        Self::ready(value).into_secret()
    }

    /// A value that will never resolve successfully.
    #[must_use]
    pub fn failed(error: DeferredError) -> Self {
        let future = futures::future::ready(Err::<T, DeferredError>(error)).boxed();
        Self::from_future(future, BTreeSet::new())
    }

    pub(crate) fn from_future(
        future: BoxFuture<'static, DeferredResult<T>>,
        sources: BTreeSet<ResourceId>,
    ) -> Self {
        Self {
            future: future.shared(),
            sources: Arc::new(sources),
            secret: false,
        }
    }

    /// Derives a new value by applying a pure function once this one resolves.
    ///
    /// The function runs lazily, at most once per derived value.
    #[must_use]
    pub fn map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Like [`Deferred::map`], for transforms that can reject their input.
    #[must_use]
    pub fn try_map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> DeferredResult<U> + Send + 'static,
    {
        let upstream = self.future.clone();
        let future = async move { upstream.await.and_then(f) }.boxed();
        Deferred {
            future: future.shared(),
            sources: Arc::clone(&self.sources),
            secret: self.secret,
        }
    }

    /// Joins several values into one. The result keeps input order and
    /// resolves only if every input resolves; the inputs themselves are
    /// awaited concurrently.
    #[must_use]
    pub fn combine(values: impl IntoIterator<Item = Self>) -> Deferred<Vec<T>> {
        let values: Vec<Self> = values.into_iter().collect();
        let secret = values.iter().any(|v| v.secret);
        let sources: BTreeSet<ResourceId> = values
            .iter()
            .flat_map(|v| v.sources.iter().cloned())
            .collect();
        let futures: Vec<_> = values.into_iter().map(|v| v.future).collect();
        let future = async move { futures::future::try_join_all(futures).await }.boxed();

        Deferred {
            future: future.shared(),
            sources: Arc::new(sources),
            secret,
        }
    }

    /// Joins this value with one of a different type.
    #[must_use]
    pub fn zip<U>(&self, other: &Deferred<U>) -> Deferred<(T, U)>
    where
        U: Clone + Send + Sync + 'static,
    {
        let left = self.future.clone();
        let right = other.future.clone();
        let future = async move { futures::future::try_join(left, right).await }.boxed();
        let sources = self
            .sources
            .iter()
            .chain(other.sources.iter())
            .cloned()
            .collect();

        Deferred {
            future: future.shared(),
            sources: Arc::new(sources),
            secret: self.secret || other.secret,
        }
    }

    /// Marks this value as secret. Secrecy propagates through `map`,
    /// `combine` and `zip`.
    #[must_use]
    pub fn into_secret(mut self) -> Self {
        self.secret = true;
        self
    }

    /// Returns true if this value must be masked in output.
    #[must_use]
    pub const fn is_secret(&self) -> bool {
        self.secret
    }

    /// Declarations this value is derived from.
    #[must_use]
    pub fn sources(&self) -> &BTreeSet<ResourceId> {
        &self.sources
    }

    /// Waits for the value. Repeated calls return the cached result.
    ///
    /// # Errors
    ///
    /// Returns an error if an underlying resource was not realized or a
    /// transform rejected its input.
    pub async fn resolve(&self) -> DeferredResult<T> {
        self.future.clone().await
    }

    /// Returns the result if it is already available, without waiting.
    /// Values derived only from known inputs are computed on the spot.
    #[must_use]
    pub fn peek(&self) -> Option<DeferredResult<T>> {
        self.future
            .peek()
            .cloned()
            .or_else(|| self.future.clone().now_or_never())
    }
}

impl<T: Clone + Send + Sync + 'static> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("sources", &self.sources)
            .field("secret", &self.secret)
            .field("resolved", &self.future.peek().is_some())
            .finish()
    }
}
