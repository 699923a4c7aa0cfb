//! Provider calls in flight.

use futures::future::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::task::{Id, JoinSet};
use tracing::error;

use crate::error::ProviderError;
use crate::graph::ResourceId;
use crate::provider::ProviderResult;

/// Provider calls spawned by a coordinator, each tagged with the node it
/// was issued for so that every outcome, lost tasks included, can be
/// attributed.
pub(super) struct InFlight<T> {
    tasks: JoinSet<ProviderResult<T>>,
    owners: HashMap<Id, (usize, ResourceId)>,
}

impl<T: Send + 'static> InFlight<T> {
    pub(super) fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            owners: HashMap::new(),
        }
    }

    pub(super) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Spawns `call` for node `index`. A panic becomes
    /// [`ProviderError::Panicked`].
    pub(super) fn spawn<F>(&mut self, index: usize, id: ResourceId, call: F)
    where
        F: Future<Output = ProviderResult<T>> + Send + 'static,
    {
        let panicked = ProviderError::Panicked { id: id.clone() };
        let handle = self.tasks.spawn(async move {
            AssertUnwindSafe(call)
                .catch_unwind()
                .await
                .unwrap_or(Err(panicked))
        });
        self.owners.insert(handle.id(), (index, id));
    }

    /// The next finished call, or `None` once nothing is in flight. A task
    /// that ended without reporting comes back as [`ProviderError::Lost`].
    ///
    /// Cancel safe: nothing is removed unless a task is returned.
    pub(super) async fn next(&mut self) -> Option<(usize, ProviderResult<T>)> {
        loop {
            match self.tasks.join_next_with_id().await? {
                Ok((task, result)) => {
                    if let Some((index, _)) = self.owners.remove(&task) {
                        return Some((index, result));
                    }
                    error!("Provider task {task} finished without an owner");
                }
                Err(e) => {
                    let Some((index, id)) = self.owners.remove(&e.id()) else {
                        error!("Provider task without an owner was lost: {e}");
                        continue;
                    };
                    let lost = ProviderError::Lost {
                        id,
                        message: e.to_string(),
                    };
                    return Some((index, Err(lost)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thing(name: &str) -> ResourceId {
        ResourceId::new("t:i:Thing", name)
    }

    #[tokio::test]
    async fn test_aborted_call_is_reported_for_its_node() {
        let mut in_flight: InFlight<()> = InFlight::new();
        in_flight.spawn(3, thing("a"), futures::future::pending());
        in_flight.tasks.abort_all();

        let (index, result) = in_flight.next().await.expect("one outcome");
        assert_eq!(index, 3);
        assert!(matches!(result, Err(ProviderError::Lost { ref id, .. }) if id.name == "a"));
        assert!(in_flight.is_empty());
        assert!(in_flight.next().await.is_none());
    }

    #[tokio::test]
    async fn test_panic_and_success_keep_their_index() {
        let mut in_flight: InFlight<u32> = InFlight::new();
        in_flight.spawn(0, thing("ok"), async { Ok(7) });
        in_flight.spawn(1, thing("boom"), async { panic!("provider bug") });
        assert_eq!(in_flight.len(), 2);

        let mut outcomes = vec![
            in_flight.next().await.expect("first"),
            in_flight.next().await.expect("second"),
        ];
        outcomes.sort_by_key(|(i, _)| *i);

        assert!(matches!(outcomes[0], (0, Ok(7))));
        assert!(matches!(outcomes[1], (1, Err(ProviderError::Panicked { ref id })) if id.name == "boom"));
    }
}
