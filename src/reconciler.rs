//! Reconciles a declared stack with its recorded state.
//!
//! `up` resolves the declared graph against the provider, records every
//! resolved resource as it completes and then deletes the recorded
//! resources the stack no longer declares. `destroy` tears down whatever
//! is recorded. Both hold the state lock for the whole run and save the
//! state even when the run fails part way.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigHasher, ConfigSource, StackConfig};
use crate::error::{ResolveError, Result};
use crate::graph::ResourceId;
use crate::planner::{orphans, DeploymentPlan, ResolutionReport, Resolver, Teardown, TeardownReport};
use crate::provider::Provider;
use crate::stack::BlackcandyStack;
use crate::state::{HistoryEntry, StackOperation, StackState, StateStore};

/// Drives `preview`, `up` and `destroy` for one stack.
pub struct StackReconciler<'a, S: StateStore> {
    /// Stack configuration.
    config: &'a StackConfig,
    /// Named input values.
    source: &'a ConfigSource,
    /// State store.
    state_store: &'a S,
    /// Provider every call goes through.
    provider: Arc<dyn Provider>,
    /// Configuration hasher.
    hasher: ConfigHasher,
    /// Stops the run when cancelled.
    cancel: CancellationToken,
}

/// Public values of a deployed stack.
#[derive(Debug, Clone, Serialize)]
pub struct StackOutputs {
    /// Host name the application is served on.
    pub domain: String,
    /// Load-balancer IPs of the ingress, once assigned.
    pub ingress_ips: Vec<String>,
    /// Whether a kubeconfig is recorded for the cluster.
    pub kubeconfig: bool,
}

/// Outcome of `up`.
#[derive(Debug)]
pub struct UpReport {
    /// Resolution of the declared resources.
    pub resolution: ResolutionReport,
    /// Deletion of resources no longer declared. Empty when resolution
    /// failed, since orphans are only removed after a complete run.
    pub pruned: TeardownReport,
    /// Stack outputs, when every resource resolved.
    pub outputs: Option<StackOutputs>,
    /// State as saved.
    pub state: StackState,
}

/// Outcome of `destroy`.
#[derive(Debug)]
pub struct DestroyReport {
    /// Deletion of recorded resources.
    pub teardown: TeardownReport,
    /// State as saved. Empty after a complete teardown.
    pub state: StackState,
}

impl<'a, S: StateStore> StackReconciler<'a, S> {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(
        config: &'a StackConfig,
        source: &'a ConfigSource,
        state_store: &'a S,
        provider: Arc<dyn Provider>,
    ) -> Self {
        Self {
            config,
            source,
            state_store,
            provider,
            hasher: ConfigHasher::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Stops scheduling new provider calls once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Loads the recorded state, or an empty one for a new stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read.
    pub async fn load_state(&self) -> Result<StackState> {
        Ok(self.state_store.load().await?.unwrap_or_else(|| {
            StackState::new(&self.config.project.name, &self.config.project.stack)
        }))
    }

    /// Builds the plan for the declared stack without calling any provider.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a missing input, a graph error, or
    /// a state error.
    pub async fn preview(&self) -> Result<DeploymentPlan> {
        let (builder, _) = BlackcandyStack::define(self.config, self.source)?;
        let graph = builder.build()?;
        let state = self.state_store.load().await?;
        let config_hash = self.hasher.hash_config(self.config);

        let plan = DeploymentPlan::from_graph(&graph, state.as_ref(), &self.hasher, &config_hash);
        info!("Plan: {}", plan.summary());
        Ok(plan)
    }

    /// Resolves the declared stack and removes what it no longer declares.
    ///
    /// Provider failures do not make this return an error; they are in the
    /// report. See [`UpReport::into_result`].
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired, the stack cannot be
    /// declared, or the state cannot be loaded or saved.
    pub async fn up(&self) -> Result<UpReport> {
        let lock = self.state_store.acquire_lock("", "up").await?;
        let result = self.up_locked().await;
        if let Err(e) = self.state_store.release_lock(&lock.lock_id).await {
            error!("Failed to release state lock: {e}");
        }
        result
    }

    async fn up_locked(&self) -> Result<UpReport> {
        let config_hash = self.hasher.hash_config(self.config);
        let mut state = self.load_state().await?;

        let (builder, stack) = BlackcandyStack::define(self.config, self.source)?;
        let graph = builder.build()?;
        let orphaned: BTreeSet<ResourceId> = orphans(&graph, &state)
            .into_iter()
            .map(|r| r.id.clone())
            .collect();

        let resolver = Resolver::new(Arc::clone(&self.provider))
            .with_prior_state(&state)
            .with_cancellation(self.cancel.clone());
        let mut resolution = resolver.start(graph);
        while let Some(resource) = resolution.next().await {
            debug!("Recording {} ({})", resource.id, resource.action);
            state.record(&resource);
        }
        let report = resolution.finish().await?;

        let mut pruned = TeardownReport::default();
        let mut outputs = None;
        if report.is_success() {
            if !orphaned.is_empty() {
                info!("Removing {} resource(s) no longer declared", orphaned.len());
                pruned = self.teardown().destroy(&state, Some(&orphaned)).await;
                pruned.apply(&mut state);
            }
            outputs = Some(Self::outputs(&stack).await);
        } else {
            warn!("Resolution incomplete; keeping {} undeclared resource(s)", orphaned.len());
        }

        let resources: Vec<String> = report.resolved.iter().map(|r| r.id.to_string()).collect();
        let entry = if report.is_success() && pruned.is_success() {
            state.config_hash.clone_from(&config_hash);
            HistoryEntry::new(StackOperation::Up, &config_hash, resources)
        } else {
            let reason = format!(
                "{} failed, {} poisoned, {} skipped",
                report.failures.len() + pruned.failures.len(),
                report.poisoned.len() + pruned.poisoned.len(),
                report.skipped.len() + pruned.skipped.len()
            );
            HistoryEntry::failed(StackOperation::Up, &config_hash, resources, &reason)
        };
        state.add_history(entry);
        self.state_store.save(&state).await?;

        Ok(UpReport {
            resolution: report,
            pruned,
            outputs,
            state,
        })
    }

    /// Deletes every recorded resource, or only `targets` when given.
    ///
    /// The state file is removed once nothing is recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired or the state cannot
    /// be loaded or saved.
    pub async fn destroy(&self, targets: Option<&BTreeSet<ResourceId>>) -> Result<DestroyReport> {
        let lock = self.state_store.acquire_lock("", "destroy").await?;
        let result = self.destroy_locked(targets).await;
        if let Err(e) = self.state_store.release_lock(&lock.lock_id).await {
            error!("Failed to release state lock: {e}");
        }
        result
    }

    async fn destroy_locked(&self, targets: Option<&BTreeSet<ResourceId>>) -> Result<DestroyReport> {
        let mut state = self.load_state().await?;
        if state.is_empty() {
            info!("Nothing recorded for {}", self.config.project.stack);
            return Ok(DestroyReport {
                teardown: TeardownReport::default(),
                state,
            });
        }

        let teardown = self.teardown().destroy(&state, targets).await;
        teardown.apply(&mut state);

        let gone: Vec<String> = teardown
            .deleted
            .iter()
            .chain(&teardown.forgotten)
            .map(ToString::to_string)
            .collect();
        let config_hash = state.config_hash.clone();
        if teardown.is_success() {
            state.add_history(HistoryEntry::new(StackOperation::Destroy, &config_hash, gone));
        } else {
            let reason = format!("{} deletion(s) failed", teardown.failures.len());
            state.add_history(HistoryEntry::failed(
                StackOperation::Destroy,
                &config_hash,
                gone,
                &reason,
            ));
        }

        if state.is_empty() {
            info!("Stack {} fully destroyed", self.config.project.stack);
            self.state_store.delete().await?;
        } else {
            self.state_store.save(&state).await?;
        }

        Ok(DestroyReport { teardown, state })
    }

    fn teardown(&self) -> Teardown {
        Teardown::new(Arc::clone(&self.provider)).with_cancellation(self.cancel.clone())
    }

    async fn outputs(stack: &BlackcandyStack) -> StackOutputs {
        let ingress_ips = stack.ingress_ips().resolve().await.unwrap_or_else(|e| {
            warn!("Ingress has no load balancer IP yet: {e}");
            Vec::new()
        });
        StackOutputs {
            domain: stack.domain().to_string(),
            ingress_ips,
            kubeconfig: stack.kubeconfig().resolve().await.is_ok(),
        }
    }
}

impl<S: StateStore> std::fmt::Debug for StackReconciler<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackReconciler")
            .field("stack", &self.config.project.stack)
            .field("backend", &self.state_store.backend_type())
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}

impl UpReport {
    /// Returns true if every declared resource resolved and every orphan
    /// was removed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.resolution.is_success() && self.pruned.is_success()
    }

    /// Converts failures into an error.
    ///
    /// # Errors
    ///
    /// Returns the resolution error first, then the pruning error.
    pub fn into_result(self) -> std::result::Result<Self, ResolveError> {
        let Self {
            resolution,
            pruned,
            outputs,
            state,
        } = self;
        let resolution = resolution.into_result()?;
        let pruned = pruned.into_result()?;
        Ok(Self {
            resolution,
            pruned,
            outputs,
            state,
        })
    }
}

impl DestroyReport {
    /// Converts failures into an error.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Aggregate`] if any deletion failed.
    pub fn into_result(self) -> std::result::Result<Self, ResolveError> {
        let Self { teardown, state } = self;
        Ok(Self {
            teardown: teardown.into_result()?,
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResolveAction;
    use crate::provider::LocalProvider;
    use crate::stack::kinds;
    use crate::state::LocalStateStore;
    use tempfile::TempDir;

    fn config() -> StackConfig {
        serde_yaml::from_str("project:\n  name: blackcandy\n  stack: dev\n").expect("parses")
    }

    fn source() -> ConfigSource {
        ConfigSource::new()
            .with_secret("gcp-project", "gcp-123")
            .with_secret("gke-cluster-id", "main")
            .with_secret("vpc-id", "vpc")
            .with_secret("hub-project", "hub")
    }

    #[tokio::test]
    async fn test_up_records_every_resource_then_converges() {
        let dir = TempDir::new().expect("temp dir");
        let store = LocalStateStore::for_stack(dir.path(), "dev");
        let (config, source) = (config(), source());
        let provider: Arc<dyn Provider> = Arc::new(LocalProvider::new("gcp-123", "us-west1"));
        let reconciler = StackReconciler::new(&config, &source, &store, Arc::clone(&provider));

        let first = reconciler.up().await.expect("up").into_result().expect("success");
        assert_eq!(first.state.len(), 13);
        assert_eq!(first.resolution.count(ResolveAction::Read), 1);
        let outputs = first.outputs.expect("outputs");
        assert_eq!(outputs.domain, "dev-test.interviews.binti.engineering");
        assert!(!outputs.ingress_ips.is_empty());
        assert!(outputs.kubeconfig);

        let second = reconciler.up().await.expect("up").into_result().expect("success");
        assert_eq!(second.resolution.count(ResolveAction::Unchanged), 12);
        assert_eq!(second.resolution.count(ResolveAction::Created), 0);
        assert_eq!(second.state.history.len(), 2);
        assert!(store.lock_info().await.expect("lock").is_none());
    }

    #[tokio::test]
    async fn test_preview_of_new_stack_creates_everything() {
        let dir = TempDir::new().expect("temp dir");
        let store = LocalStateStore::for_stack(dir.path(), "dev");
        let (config, source) = (config(), source());
        let reconciler = StackReconciler::new(
            &config,
            &source,
            &store,
            Arc::new(LocalProvider::new("gcp-123", "us-west1")),
        );

        let plan = reconciler.preview().await.expect("plan");
        assert_eq!(plan.actions.len(), 13);
        assert_eq!(plan.actions[0].resource.kind, kinds::CONTAINER_CLUSTER);
        assert!(plan.has_changes());
    }

    #[tokio::test]
    async fn test_destroy_removes_state_file() {
        let dir = TempDir::new().expect("temp dir");
        let store = LocalStateStore::for_stack(dir.path(), "dev");
        let (config, source) = (config(), source());
        let reconciler = StackReconciler::new(
            &config,
            &source,
            &store,
            Arc::new(LocalProvider::new("gcp-123", "us-west1")),
        );

        reconciler.up().await.expect("up");
        let report = reconciler.destroy(None).await.expect("destroy").into_result().expect("success");

        assert_eq!(report.teardown.deleted.len(), 12);
        assert_eq!(report.teardown.forgotten.len(), 1);
        assert!(report.state.is_empty());
        assert!(store.load().await.expect("load").is_none());
    }
}
