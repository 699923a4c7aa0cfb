//! Stack teardown.
//!
//! Deletes recorded resources in reverse dependency order: a record is
//! deleted only after every record that depends on it is gone. Independent
//! deletions run concurrently. Looked-up resources are never deleted, only
//! forgotten. When a deletion fails, everything the failed record depends
//! on is kept. A targeted teardown also takes every recorded dependent of
//! its targets.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{PoisonedDependencyError, ProviderError, ResolveError};
use crate::graph::{DeclarationMode, ResourceId};
use crate::provider::{DeleteRequest, Provider};
use crate::state::{ResourceRecord, StackState};

use super::tasks::InFlight;

/// Deletes recorded resources through a provider.
#[derive(Clone)]
pub struct Teardown {
    provider: Arc<dyn Provider>,
    cancel: CancellationToken,
}

/// Outcome of a teardown.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Deleted resources, in completion order.
    pub deleted: Vec<ResourceId>,
    /// Looked-up resources dropped from state without a provider call.
    pub forgotten: Vec<ResourceId>,
    /// Failed deletions.
    pub failures: Vec<ProviderError>,
    /// Records kept because a record depending on them failed to delete.
    pub poisoned: Vec<PoisonedDependencyError>,
    /// Records never attempted because the run was cancelled.
    pub skipped: Vec<ResourceId>,
    /// Whether the run was cancelled.
    pub cancelled: bool,
    /// Wall time of the run.
    pub elapsed: Duration,
}

impl Teardown {
    /// Creates a teardown using `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            cancel: CancellationToken::new(),
        }
    }

    /// Stops issuing deletions once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// `targets` plus every record in `state` that transitively depends on
    /// one of them.
    #[must_use]
    pub fn with_dependents(state: &StackState, targets: &BTreeSet<ResourceId>) -> BTreeSet<ResourceId> {
        let mut closure = targets.clone();
        loop {
            let added: Vec<ResourceId> = state
                .resources
                .values()
                .filter(|r| !closure.contains(&r.id))
                .filter(|r| r.dependencies.iter().any(|d| closure.contains(d)))
                .map(|r| r.id.clone())
                .collect();
            if added.is_empty() {
                return closure;
            }
            closure.extend(added);
        }
    }

    /// Deletes `targets` and their recorded dependents from `state`, or
    /// every record when `targets` is `None`. The state itself is not
    /// modified; see [`TeardownReport::apply`].
    pub async fn destroy(
        &self,
        state: &StackState,
        targets: Option<&BTreeSet<ResourceId>>,
    ) -> TeardownReport {
        let started = Instant::now();
        let targets = targets.map(|t| {
            let closure = Self::with_dependents(state, t);
            for id in closure.difference(t) {
                info!("Including {id}: it depends on a target");
            }
            closure
        });
        let records: Vec<&ResourceRecord> = state
            .resources
            .values()
            .filter(|r| targets.as_ref().is_none_or(|t| t.contains(&r.id)))
            .collect();
        let position: HashMap<&ResourceId, usize> =
            records.iter().enumerate().map(|(i, r)| (&r.id, i)).collect();

        // The target set is closed under dependents, so edges leaving it
        // only point at records that stay. `waiting[i]` counts the records
        // that depend on `i` and are not yet gone.
        let dependencies: Vec<Vec<usize>> = records
            .iter()
            .map(|r| {
                let mut deps: Vec<usize> = r
                    .dependencies
                    .iter()
                    .filter_map(|d| position.get(d).copied())
                    .collect();
                deps.sort_unstable();
                deps.dedup();
                deps
            })
            .collect();
        let mut waiting = vec![0_usize; records.len()];
        for deps in &dependencies {
            for &d in deps {
                waiting[d] += 1;
            }
        }

        info!("Tearing down {} resource(s)", records.len());

        let mut report = TeardownReport::default();
        let mut ready: BTreeSet<usize> = (0..records.len()).filter(|&i| waiting[i] == 0).collect();
        let mut done = vec![false; records.len()];
        let mut blocked = vec![false; records.len()];
        let mut failed: Vec<(usize, ProviderError)> = Vec::new();
        let mut tasks: InFlight<()> = InFlight::new();

        loop {
            if !report.cancelled && self.cancel.is_cancelled() {
                report.cancelled = true;
            }

            let mut released = Vec::new();
            if !report.cancelled {
                while let Some(i) = ready.pop_first() {
                    let record = records[i];
                    if record.mode == DeclarationMode::Lookup {
                        debug!("Forgetting looked-up {}", record.id);
                        report.forgotten.push(record.id.clone());
                        done[i] = true;
                        released.push(i);
                        continue;
                    }
                    self.issue(i, record, state, &mut tasks);
                }
            }

            for i in released {
                release(i, &dependencies, &mut waiting, &blocked, &mut ready);
            }
            if !ready.is_empty() && !report.cancelled {
                continue;
            }
            if tasks.is_empty() {
                break;
            }

            let joined = tokio::select! {
                () = self.cancel.cancelled(), if !report.cancelled => {
                    warn!("Teardown cancelled; waiting for {} in-flight deletion(s)", tasks.len());
                    report.cancelled = true;
                    continue;
                }
                joined = tasks.next() => joined,
            };

            let Some((i, result)) = joined else {
                break;
            };

            match result {
                Ok(()) => {
                    info!("Deleted {}", records[i].id);
                    done[i] = true;
                    report.deleted.push(records[i].id.clone());
                    release(i, &dependencies, &mut waiting, &blocked, &mut ready);
                }
                Err(e) => {
                    error!("{e}");
                    let root = records[i].id.clone();
                    let mut stack = dependencies[i].clone();
                    while let Some(d) = stack.pop() {
                        if blocked[d] || done[d] {
                            continue;
                        }
                        blocked[d] = true;
                        ready.remove(&d);
                        warn!("Keeping {}: dependent {root} failed to delete", records[d].id);
                        report.poisoned.push(PoisonedDependencyError {
                            id: records[d].id.clone(),
                            root: root.clone(),
                        });
                        stack.extend(dependencies[d].iter().copied());
                    }
                    failed.push((i, e));
                }
            }
        }

        let attempted: BTreeSet<&ResourceId> = failed.iter().map(|(i, _)| &records[*i].id).collect();
        report.skipped = records
            .iter()
            .enumerate()
            .filter(|(i, r)| !done[*i] && !blocked[*i] && !attempted.contains(&r.id))
            .map(|(_, r)| r.id.clone())
            .collect();
        failed.sort_by_key(|(i, _)| *i);
        report.failures = failed.into_iter().map(|(_, e)| e).collect();
        report.elapsed = started.elapsed();
        report
    }

    fn issue(
        &self,
        i: usize,
        record: &ResourceRecord,
        state: &StackState,
        tasks: &mut InFlight<()>,
    ) {
        debug!("Deleting {}", record.id);
        let request = DeleteRequest {
            id: record.id.clone(),
            provider_id: record.provider_id.clone(),
            outputs: record.outputs.clone(),
            provider_config: record
                .provider
                .as_ref()
                .and_then(|p| state.get(p))
                .map(|p| p.outputs.clone()),
        };
        let provider = Arc::clone(&self.provider);

        tasks.spawn(i, record.id.clone(), async move {
            provider.delete(&request).await
        });
    }
}

/// Marks `i` as gone and readies every dependency with nothing left
/// waiting on it.
fn release(
    i: usize,
    dependencies: &[Vec<usize>],
    waiting: &mut [usize],
    blocked: &[bool],
    ready: &mut BTreeSet<usize>,
) {
    for &d in &dependencies[i] {
        waiting[d] -= 1;
        if waiting[d] == 0 && !blocked[d] {
            ready.insert(d);
        }
    }
}

impl std::fmt::Debug for Teardown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Teardown")
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}

impl TeardownReport {
    /// Returns true if every targeted record is gone.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.poisoned.is_empty() && self.skipped.is_empty()
    }

    /// Removes every deleted or forgotten record from `state`.
    pub fn apply(&self, state: &mut StackState) {
        for id in self.deleted.iter().chain(&self.forgotten) {
            state.remove(id);
        }
    }

    /// Converts failures into an error.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Aggregate`] if any deletion failed, carrying
    /// whatever a cancellation left unattempted, and
    /// [`ResolveError::Cancelled`] if records were only left unattempted.
    pub fn into_result(self) -> std::result::Result<Self, ResolveError> {
        if !self.failures.is_empty() {
            return Err(ResolveError::Aggregate {
                failed: self.failures,
                poisoned: self.poisoned,
                skipped: self.skipped,
            });
        }
        if !self.skipped.is_empty() {
            return Err(ResolveError::Cancelled {
                skipped: self.skipped,
            });
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ResolveAction, ResolvedResource};
    use crate::provider::{ProviderRequest, ProviderResponse, ProviderResult};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingProvider {
        deleted: Mutex<Vec<String>>,
        fail: Option<String>,
    }

    #[async_trait]
    impl Provider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        async fn create(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
            Ok(ProviderResponse::new(request.id.name.clone(), json!({})))
        }

        async fn read(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
            Err(ProviderError::NotFound { id: request.id.clone() })
        }

        async fn delete(&self, request: &DeleteRequest) -> ProviderResult<()> {
            if self.fail.as_deref() == Some(request.id.name.as_str()) {
                return Err(ProviderError::Rejected {
                    id: request.id.clone(),
                    message: String::from("in use"),
                });
            }
            self.deleted.lock().await.push(request.id.name.clone());
            Ok(())
        }
    }

    fn add(state: &mut StackState, name: &str, deps: &[&str], mode: DeclarationMode) -> ResourceId {
        let id = ResourceId::new("t:i:Thing", name);
        state.record(&ResolvedResource {
            id: id.clone(),
            provider_id: name.to_string(),
            outputs: json!({ "name": name }),
            secret_outputs: BTreeSet::new(),
            properties_hash: String::new(),
            mode,
            action: ResolveAction::Created,
            dependencies: deps.iter().map(|d| ResourceId::new("t:i:Thing", *d)).collect(),
            provider: None,
            parent: None,
            resolved_at: Utc::now(),
        });
        id
    }

    /// cluster (lookup) <- instance <- user <- deployment
    fn chain() -> StackState {
        let mut state = StackState::new("p", "dev");
        add(&mut state, "cluster", &[], DeclarationMode::Lookup);
        add(&mut state, "instance", &[], DeclarationMode::Managed);
        add(&mut state, "user", &["instance"], DeclarationMode::Managed);
        add(&mut state, "deployment", &["user", "cluster"], DeclarationMode::Managed);
        state
    }

    #[tokio::test]
    async fn test_deletes_in_reverse_order_and_forgets_lookups() {
        let provider = Arc::new(RecordingProvider::default());
        let mut state = chain();

        let report = Teardown::new(provider.clone()).destroy(&state, None).await;
        assert!(report.is_success());
        assert_eq!(
            *provider.deleted.lock().await,
            vec!["deployment", "user", "instance"]
        );
        assert_eq!(report.forgotten.len(), 1);

        report.apply(&mut state);
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_failure_keeps_dependencies() {
        let provider = Arc::new(RecordingProvider {
            fail: Some(String::from("user")),
            ..RecordingProvider::default()
        });
        let mut state = chain();

        let report = Teardown::new(provider.clone()).destroy(&state, None).await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.poisoned.len(), 1);
        assert_eq!(report.poisoned[0].id.name, "instance");
        assert!(report.skipped.is_empty());

        report.apply(&mut state);
        assert_eq!(state.len(), 2);
        assert!(matches!(
            report.into_result(),
            Err(ResolveError::Aggregate { .. })
        ));
    }

    #[tokio::test]
    async fn test_targets_limit_the_teardown() {
        let provider = Arc::new(RecordingProvider::default());
        let state = chain();
        let targets = BTreeSet::from([ResourceId::new("t:i:Thing", "deployment")]);

        let report = Teardown::new(provider.clone())
            .destroy(&state, Some(&targets))
            .await;
        assert_eq!(report.deleted, vec![ResourceId::new("t:i:Thing", "deployment")]);
    }

    #[tokio::test]
    async fn test_targets_take_their_dependents_along() {
        let provider = Arc::new(RecordingProvider::default());
        let mut state = chain();
        let targets = BTreeSet::from([ResourceId::new("t:i:Thing", "instance")]);

        let widened = Teardown::with_dependents(&state, &targets);
        let names: Vec<&str> = widened.iter().map(|id| id.name.as_str()).collect();
        assert_eq!(names, ["deployment", "instance", "user"]);

        let report = Teardown::new(provider.clone())
            .destroy(&state, Some(&targets))
            .await;
        assert!(report.is_success());
        assert_eq!(
            *provider.deleted.lock().await,
            vec!["deployment", "user", "instance"]
        );
        assert!(report.forgotten.is_empty());

        report.apply(&mut state);
        assert_eq!(state.len(), 1);
        assert!(state.get(&ResourceId::new("t:i:Thing", "cluster")).is_some());
    }

    #[test]
    fn test_failed_and_cancelled_teardown_keeps_unattempted_records() {
        let report = TeardownReport {
            failures: vec![ProviderError::Rejected {
                id: ResourceId::new("t:i:Thing", "user"),
                message: String::from("in use"),
            }],
            skipped: vec![ResourceId::new("t:i:Thing", "bucket")],
            cancelled: true,
            ..TeardownReport::default()
        };

        match report.into_result() {
            Err(ResolveError::Aggregate { failed, skipped, .. }) => {
                assert_eq!(failed.len(), 1);
                assert_eq!(skipped, vec![ResourceId::new("t:i:Thing", "bucket")]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_everything() {
        let provider = Arc::new(RecordingProvider::default());
        let state = chain();
        let token = CancellationToken::new();
        token.cancel();

        let report = Teardown::new(provider.clone())
            .with_cancellation(token)
            .destroy(&state, None)
            .await;
        assert!(report.cancelled);
        assert_eq!(report.skipped.len(), 4);
        assert!(provider.deleted.lock().await.is_empty());
    }
}
