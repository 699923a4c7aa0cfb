//! Graph resolution.
//!
//! The resolver walks a validated [`ResourceGraph`] in topological order.
//! A single coordinating task owns the in-degree counters and the resolved
//! cache; every declaration whose dependencies are all resolved is issued
//! to the provider concurrently. Ties are broken by declaration order.
//!
//! When a provider call fails, calls already in flight run to completion,
//! every transitive dependent of the failed declaration is poisoned and
//! never issued, and the run ends with one aggregate error.

use futures::Stream;
use std::collections::{BTreeSet, HashMap};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConfigHasher;
use crate::error::{
    DeferredError, GraphError, HalldyllError, PoisonedDependencyError, ProviderError, ResolveError,
    Result,
};
use crate::graph::{
    DeclarationMode, GraphBuilder, GraphNode, ResolveAction, ResolvedResource, ResolvedSender,
    ResourceDeclaration, ResourceGraph, ResourceId,
};
use crate::provider::{Provider, ProviderRequest, ProviderResponse, ProviderResult};
use crate::state::{ResourceRecord, StackState};

use super::tasks::InFlight;

/// Resolves resource graphs against a provider.
#[derive(Clone)]
pub struct Resolver {
    provider: Arc<dyn Provider>,
    prior: Arc<HashMap<ResourceId, ResourceRecord>>,
    cancel: CancellationToken,
    hasher: ConfigHasher,
}

impl Resolver {
    /// Creates a resolver with no recorded state.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            prior: Arc::new(HashMap::new()),
            cancel: CancellationToken::new(),
            hasher: ConfigHasher::new(),
        }
    }

    /// Uses recorded state to skip, update or create each declaration.
    #[must_use]
    pub fn with_prior_state(mut self, state: &StackState) -> Self {
        self.prior = Arc::new(
            state
                .resources
                .values()
                .map(|record| (record.id.clone(), record.clone()))
                .collect(),
        );
        self
    }

    /// Stops scheduling new declarations once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Builds the graph and resolves it to completion.
    ///
    /// A graph error (cycle, dangling reference) is returned before any
    /// provider call is made.
    ///
    /// # Errors
    ///
    /// Returns the graph error, or [`ResolveError::Aggregate`] naming every
    /// failed and poisoned declaration, or [`ResolveError::Cancelled`].
    pub async fn resolve(&self, builder: GraphBuilder) -> Result<ResolutionReport> {
        let graph = builder.build().map_err(|e: GraphError| {
            error!("Graph validation failed: {e}");
            e
        })?;
        let report = self.start(graph).finish().await?;
        report.into_result().map_err(HalldyllError::from)
    }

    /// Starts resolving `graph` in the background.
    ///
    /// Resolved resources are yielded by the returned [`Resolution`] as
    /// they complete.
    #[must_use]
    pub fn start(&self, graph: ResourceGraph) -> Resolution {
        let (events, receiver) = mpsc::unbounded_channel();
        let cancel = self.cancel.child_token();

        info!("Resolving {} declarations", graph.len());
        let coordinator = Coordinator {
            provider: Arc::clone(&self.provider),
            prior: Arc::clone(&self.prior),
            hasher: self.hasher,
            cancel: cancel.clone(),
            nodes: graph.nodes,
            senders: graph.senders,
            events,
        };

        Resolution {
            events: receiver,
            handle: tokio::spawn(coordinator.run()),
            cancel,
        }
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("provider", &self.provider.name())
            .field("prior", &self.prior.len())
            .finish_non_exhaustive()
    }
}

/// A resolution in progress.
#[derive(Debug)]
pub struct Resolution {
    events: mpsc::UnboundedReceiver<Arc<ResolvedResource>>,
    handle: JoinHandle<ResolutionReport>,
    cancel: CancellationToken,
}

impl Resolution {
    /// The next resolved resource, or `None` once resolution has ended.
    pub async fn next(&mut self) -> Option<Arc<ResolvedResource>> {
        self.events.recv().await
    }

    /// Stops scheduling new declarations. Calls already issued complete.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for resolution to end.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the coordinating task was lost.
    pub async fn finish(self) -> Result<ResolutionReport> {
        self.handle
            .await
            .map_err(|e| HalldyllError::internal(format!("Resolution task failed: {e}")))
    }
}

impl Stream for Resolution {
    type Item = Arc<ResolvedResource>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

/// Outcome of a resolution.
#[derive(Debug)]
pub struct ResolutionReport {
    /// Resolved resources, in completion order.
    pub resolved: Vec<Arc<ResolvedResource>>,
    /// Failed provider calls, in declaration order.
    pub failures: Vec<ProviderError>,
    /// Declarations skipped because an ancestor failed, in declaration order.
    pub poisoned: Vec<PoisonedDependencyError>,
    /// Declarations never issued because the run was cancelled.
    pub skipped: Vec<ResourceId>,
    /// Whether the run was cancelled.
    pub cancelled: bool,
    /// Wall time of the run.
    pub elapsed: Duration,
}

impl ResolutionReport {
    /// Returns true if every declaration was resolved.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.poisoned.is_empty() && self.skipped.is_empty()
    }

    /// The resolved resource for `id`.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&Arc<ResolvedResource>> {
        self.resolved.iter().find(|r| &r.id == id)
    }

    /// Number of resolved resources with the given action.
    #[must_use]
    pub fn count(&self, action: ResolveAction) -> usize {
        self.resolved.iter().filter(|r| r.action == action).count()
    }

    /// Converts failures into an error.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Aggregate`] if any provider call failed,
    /// carrying whatever a cancellation left unissued, and
    /// [`ResolveError::Cancelled`] if declarations were only left unissued.
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    Issued,
    Resolved,
    Failed,
    Poisoned,
}

/// Owns every piece of mutable scheduling state.
struct Coordinator {
    provider: Arc<dyn Provider>,
    prior: Arc<HashMap<ResourceId, ResourceRecord>>,
    hasher: ConfigHasher,
    cancel: CancellationToken,
    nodes: Vec<GraphNode>,
    senders: Vec<Option<ResolvedSender>>,
    events: mpsc::UnboundedSender<Arc<ResolvedResource>>,
}

impl Coordinator {
    async fn run(mut self) -> ResolutionReport {
        let started = Instant::now();
        let count = self.nodes.len();

        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.dependencies.len()).collect();
        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut states = vec![NodeState::Pending; count];
        let mut outputs: Vec<Option<Arc<ResolvedResource>>> = vec![None; count];

        let mut resolved = Vec::with_capacity(count);
        let mut failures: Vec<(usize, ProviderError)> = Vec::new();
        let mut poisoned: Vec<(usize, PoisonedDependencyError)> = Vec::new();
        let mut tasks: InFlight<ResolvedResource> = InFlight::new();
        let mut cancelled = false;

        loop {
            if !cancelled && self.cancel.is_cancelled() {
                cancelled = true;
            }

            if !cancelled {
                while let Some(i) = ready.pop_first() {
                    debug!("Issuing {}", self.nodes[i].declaration.id());
                    states[i] = NodeState::Issued;
                    self.issue(i, &outputs, &mut tasks);
                }
            }

            if tasks.is_empty() {
                break;
            }

            let joined = tokio::select! {
                () = self.cancel.cancelled(), if !cancelled => {
                    warn!("Resolution cancelled; waiting for {} in-flight call(s)", tasks.len());
                    cancelled = true;
                    continue;
                }
                joined = tasks.next() => joined,
            };

            let Some((i, result)) = joined else {
                break;
            };

            match result {
                Ok(resource) => {
                    let resource = Arc::new(resource);
                    info!("Resolved {} ({})", resource.id, resource.action);
                    states[i] = NodeState::Resolved;

                    if let Some(sender) = self.senders[i].take() {
                        let _ = sender.send(Ok(Arc::clone(&resource)));
                    }
                    let _ = self.events.send(Arc::clone(&resource));
                    outputs[i] = Some(Arc::clone(&resource));
                    resolved.push(resource);

                    for &d in &self.nodes[i].dependents {
                        in_degree[d] -= 1;
                        if in_degree[d] == 0 && states[d] == NodeState::Pending {
                            ready.insert(d);
                        }
                    }
                }
                Err(e) => {
                    error!("{e}");
                    states[i] = NodeState::Failed;
                    let root = self.nodes[i].declaration.id().clone();
                    if let Some(sender) = self.senders[i].take() {
                        let _ = sender.send(Err(DeferredError::unresolved(&root, e.to_string())));
                    }
                    for p in self.poison(i, &mut states) {
                        ready.remove(&p);
                        poisoned.push((
                            p,
                            PoisonedDependencyError {
                                id: self.nodes[p].declaration.id().clone(),
                                root: root.clone(),
                            },
                        ));
                    }
                    failures.push((i, e));
                }
            }
        }

        let skipped: Vec<ResourceId> = states
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, NodeState::Pending | NodeState::Issued))
            .map(|(i, _)| self.nodes[i].declaration.id().clone())
            .collect();
        if !skipped.is_empty() {
            warn!("{} declaration(s) never issued", skipped.len());
        }

        failures.sort_by_key(|(i, _)| *i);
        poisoned.sort_by_key(|(i, _)| *i);

        // Dropping the remaining senders fails every unresolved output.
        self.senders.clear();

        ResolutionReport {
            resolved,
            failures: failures.into_iter().map(|(_, e)| e).collect(),
            poisoned: poisoned.into_iter().map(|(_, e)| e).collect(),
            skipped,
            cancelled,
            elapsed: started.elapsed(),
        }
    }

    /// Marks every pending transitive dependent of `failed` as poisoned.
    fn poison(&mut self, failed: usize, states: &mut [NodeState]) -> Vec<usize> {
        let root = self.nodes[failed].declaration.id().clone();
        let mut stack: Vec<usize> = self.nodes[failed].dependents.clone();
        let mut poisoned = Vec::new();

        while let Some(d) = stack.pop() {
            if states[d] != NodeState::Pending {
                continue;
            }
            states[d] = NodeState::Poisoned;
            warn!(
                "Skipping {}: dependency {root} failed",
                self.nodes[d].declaration.id()
            );
            if let Some(sender) = self.senders[d].take() {
                let _ = sender.send(Err(DeferredError::unresolved(
                    self.nodes[d].declaration.id(),
                    format!("dependency {root} failed"),
                )));
            }
            stack.extend(self.nodes[d].dependents.iter().copied());
            poisoned.push(d);
        }

        poisoned
    }

    fn issue(
        &self,
        i: usize,
        outputs: &[Option<Arc<ResolvedResource>>],
        tasks: &mut InFlight<ResolvedResource>,
    ) {
        let node = &self.nodes[i];
        let declaration = node.declaration.clone();

        let provider_config = declaration.options().provider.as_ref().and_then(|provider| {
            node.dependencies
                .iter()
                .find(|&&j| self.nodes[j].declaration.id() == provider)
                .and_then(|&j| outputs[j].as_ref())
                .map(|r| r.outputs.clone())
        });

        let id = declaration.id().clone();
        let task = Realization {
            provider: Arc::clone(&self.provider),
            prior: self.prior.get(declaration.id()).cloned(),
            dependencies: node
                .dependencies
                .iter()
                .map(|&j| self.nodes[j].declaration.id().clone())
                .collect(),
            provider_config,
            hasher: self.hasher,
            declaration,
        };

        tasks.spawn(i, id, task.run());
    }
}

/// Everything one declaration needs to be realized.
struct Realization {
    provider: Arc<dyn Provider>,
    declaration: ResourceDeclaration,
    prior: Option<ResourceRecord>,
    dependencies: Vec<ResourceId>,
    provider_config: Option<serde_json::Value>,
    hasher: ConfigHasher,
}

impl Realization {
    async fn run(self) -> ProviderResult<ResolvedResource> {
        let id = self.declaration.id().clone();
        let options = self.declaration.options();

        let properties = self
            .declaration
            .properties()
            .realize()
            .await
            .map_err(|cause| ProviderError::InputUnavailable {
                id: id.clone(),
                cause,
            })?;
        let properties_hash = self.hasher.hash_properties(&properties);

        let request = ProviderRequest {
            id: id.clone(),
            properties,
            provider_config: self.provider_config,
            mode: options.mode,
        };

        let (response, action) = match (options.mode, self.prior) {
            (DeclarationMode::Lookup, _) => {
                (self.provider.read(&request).await?, ResolveAction::Read)
            }
            (DeclarationMode::Managed, Some(prior))
                if prior.mode == DeclarationMode::Managed
                    && ConfigHasher::hashes_match(&prior.properties_hash, &properties_hash) =>
            {
                debug!("{id} unchanged, reusing recorded outputs");
                let response = ProviderResponse {
                    provider_id: prior.provider_id,
                    outputs: prior.outputs,
                    secret_outputs: prior.secret_outputs,
                };
                (response, ResolveAction::Unchanged)
            }
            (DeclarationMode::Managed, Some(prior)) if prior.mode == DeclarationMode::Managed => (
                self.provider.update(&prior.provider_id, &request).await?,
                ResolveAction::Updated,
            ),
            (DeclarationMode::Managed, _) => {
                (self.provider.create(&request).await?, ResolveAction::Created)
            }
        };

        let mut secret_outputs = response.secret_outputs;
        secret_outputs.extend(options.secret_outputs.iter().cloned());

        Ok(ResolvedResource {
            id,
            provider_id: response.provider_id,
            outputs: response.outputs,
            secret_outputs,
            properties_hash,
            mode: options.mode,
            action,
            dependencies: self.dependencies,
            provider: options.provider.clone(),
            parent: options.parent.clone(),
            resolved_at: chrono::Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DeclarationOptions, Properties};
    use crate::provider::LocalProvider;
    use serde_json::json;

    fn local() -> Arc<dyn Provider> {
        Arc::new(LocalProvider::new("proj", "us-west1"))
    }

    #[tokio::test]
    async fn test_chain_resolves_in_order_and_threads_outputs() {
        let mut builder = GraphBuilder::new();
        let pw = builder
            .declare(
                "random:index:RandomPassword",
                "pw",
                Properties::new().with("length", 12_i64),
                DeclarationOptions::new().secret_output("result"),
            )
            .expect("pw");
        let user = builder
            .declare(
                "gcp:sql:User",
                "user",
                Properties::new().with("password", pw.output("result")),
                DeclarationOptions::new(),
            )
            .expect("user");

        let report = Resolver::new(local()).resolve(builder).await.expect("resolves");
        assert_eq!(report.resolved.len(), 2);
        assert_eq!(report.resolved[0].id, *pw.id());
        assert_eq!(report.count(ResolveAction::Created), 2);

        let password = pw.output_string("result").resolve().await.expect("known");
        let user_outputs = user.resolved().resolve().await.expect("resolved");
        assert_eq!(user_outputs.outputs["password"], json!(password));
        assert!(user.output("password").peek().is_some());
        assert_eq!(user_outputs.dependencies, vec![pw.id().clone()]);
    }

    #[tokio::test]
    async fn test_unchanged_declarations_are_not_reissued() {
        let declare = |builder: &mut GraphBuilder| {
            builder
                .declare("gcp:sql:User", "user", Properties::new().with("name", "app"), DeclarationOptions::new())
                .expect("user");
        };

        let provider = Arc::new(LocalProvider::new("proj", "us-west1"));
        let mut first = GraphBuilder::new();
        declare(&mut first);
        let report = Resolver::new(provider.clone()).resolve(first).await.expect("first run");

        let mut state = StackState::new("proj", "dev");
        for resource in &report.resolved {
            state.record(resource);
        }

        let mut second = GraphBuilder::new();
        declare(&mut second);
        let report = Resolver::new(provider)
            .with_prior_state(&state)
            .resolve(second)
            .await
            .expect("second run");
        assert_eq!(report.count(ResolveAction::Unchanged), 1);
    }

    #[tokio::test]
    async fn test_cycle_is_rejected_before_any_call() {
        let provider = Arc::new(LocalProvider::new("proj", "us-west1"));
        let mut builder = GraphBuilder::new();
        let b = ResourceId::new("t:i:B", "b");
        let forward = builder.output(&b, "x");
        let a = builder
            .declare("t:i:A", "a", Properties::new().with("x", forward), DeclarationOptions::new())
            .expect("a");
        builder
            .declare("t:i:B", "b", Properties::new().with("x", a.output("x")), DeclarationOptions::new())
            .expect("b");

        let err = Resolver::new(provider.clone())
            .resolve(builder)
            .await
            .expect_err("cycle");
        assert!(matches!(err, HalldyllError::Graph(GraphError::CyclicDependency { .. })));
        assert!(provider.is_empty().await);
    }

    #[tokio::test]
    async fn test_resolution_stream_yields_each_resource_once() {
        use futures::StreamExt;

        let mut builder = GraphBuilder::new();
        for name in ["a", "b", "c"] {
            builder
                .declare("t:i:Thing", name, Properties::new(), DeclarationOptions::new())
                .expect("declare");
        }
        let graph = builder.build().expect("acyclic");

        let resolution = Resolver::new(local()).start(graph);
        let names: Vec<String> = resolution.map(|r| r.id.name.clone()).collect().await;
        assert_eq!(names.len(), 3);
    }

    #[tokio::test]
    async fn test_lookup_reads_instead_of_creating() {
        let mut builder = GraphBuilder::new();
        let cluster = builder
            .declare(
                crate::stack::kinds::CONTAINER_CLUSTER,
                "gke",
                Properties::new().with("clusterId", "main"),
                DeclarationOptions::new().lookup(),
            )
            .expect("cluster");

        let report = Resolver::new(local()).resolve(builder).await.expect("resolves");
        assert_eq!(report.count(ResolveAction::Read), 1);
        assert_eq!(
            cluster.output_string("name").resolve().await,
            Ok(String::from("main"))
        );
    }

    #[test]
    fn test_failed_and_cancelled_run_keeps_unissued_declarations() {
        let failed = ResourceId::new("t:i:Thing", "a");
        let unissued = ResourceId::new("t:i:Thing", "b");
        let report = ResolutionReport {
            resolved: Vec::new(),
            failures: vec![ProviderError::Lost {
                id: failed,
                message: String::from("task 7 was cancelled"),
            }],
            poisoned: Vec::new(),
            skipped: vec![unissued.clone()],
            cancelled: true,
            elapsed: Duration::ZERO,
        };

        let err = report.into_result().expect_err("failed");
        assert!(err.to_string().contains("1 never issued"));
        match err {
            ResolveError::Aggregate { failed, skipped, .. } => {
                assert_eq!(failed.len(), 1);
                assert_eq!(skipped, vec![unissued]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
