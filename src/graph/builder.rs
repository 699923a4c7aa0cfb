//! Graph construction and validation.

use futures::future::FutureExt;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{DeferredError, GraphError};

use super::declaration::{output_of, DeclarationOptions, ResourceDeclaration};
use super::deferred::{Deferred, DeferredResult};
use super::id::ResourceId;
use super::property::Properties;
use super::resource::ResolvedResource;

/// Completes a declaration's pending result.
pub(crate) type ResolvedSender = oneshot::Sender<DeferredResult<Arc<ResolvedResource>>>;

/// Pending result of one identity, created on first declaration or reference.
struct OutputSlot {
    sender: ResolvedSender,
    deferred: Deferred<Arc<ResolvedResource>>,
}

/// Collects declarations and hands out deferred outputs.
#[derive(Default)]
pub struct GraphBuilder {
    declarations: Vec<ResourceDeclaration>,
    index: HashMap<ResourceId, usize>,
    slots: HashMap<ResourceId, OutputSlot>,
}

impl GraphBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a declaration.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Conflict`] if `(kind, name)` is already
    /// declared; the builder is left untouched.
    pub fn declare(
        &mut self,
        kind: impl Into<String>,
        name: impl Into<String>,
        properties: Properties,
        options: DeclarationOptions,
    ) -> Result<ResourceDeclaration, GraphError> {
        let id = ResourceId::new(kind, name);
        if self.index.contains_key(&id) {
            return Err(GraphError::Conflict { id });
        }

        let position = self.declarations.len();
        let resolved = self.slot(&id).deferred.clone();
        let declaration = ResourceDeclaration::new(id.clone(), properties, options, position, resolved);

        debug!("Declared {id} (#{position})");
        self.index.insert(id, position);
        self.declarations.push(declaration.clone());
        Ok(declaration)
    }

    /// The pending result of `id`, which does not need to be declared yet.
    /// References that are still undeclared when the graph is built make
    /// [`GraphBuilder::build`] fail.
    pub fn reference(&mut self, id: &ResourceId) -> Deferred<Arc<ResolvedResource>> {
        self.slot(id).deferred.clone()
    }

    /// An output of `id` by dotted path; `id` does not need to be declared yet.
    pub fn output(&mut self, id: &ResourceId, path: &str) -> Deferred<Value> {
        if let Some(declaration) = self.get(id) {
            return declaration.output(path);
        }
        let resolved = self.reference(id);
        output_of(&resolved, id, path, false)
    }

    /// Returns a declaration by identity.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&ResourceDeclaration> {
        self.index.get(id).map(|&i| &self.declarations[i])
    }

    /// Declarations in insertion order.
    #[must_use]
    pub fn declarations(&self) -> &[ResourceDeclaration] {
        &self.declarations
    }

    /// Number of declarations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    /// Returns true if nothing has been declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Resolves every dependency to a declaration and checks the graph is
    /// acyclic.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownDependency`] for dangling references and
    /// [`GraphError::CyclicDependency`] naming every declaration on a cycle.
    pub fn build(mut self) -> Result<ResourceGraph, GraphError> {
        let count = self.declarations.len();
        let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        let mut dag: DiGraph<usize, ()> = DiGraph::with_capacity(count, count);
        let handles: Vec<NodeIndex> = (0..count).map(|i| dag.add_node(i)).collect();

        for (i, declaration) in self.declarations.iter().enumerate() {
            for dependency in declaration.dependencies() {
                let Some(&j) = self.index.get(&dependency) else {
                    return Err(GraphError::UnknownDependency {
                        id: declaration.id().clone(),
                        dependency,
                    });
                };
                dependencies[i].push(j);
                dependents[j].push(i);
                dag.add_edge(handles[j], handles[i], ());
            }
            dependencies[i].sort_unstable();
        }

        if toposort(&dag, None).is_err() {
            let mut members: Vec<usize> = tarjan_scc(&dag)
                .into_iter()
                .filter(|scc| scc.len() > 1 || dag.find_edge(scc[0], scc[0]).is_some())
                .flatten()
                .map(|handle| dag[handle])
                .collect();
            members.sort_unstable();

            return Err(GraphError::CyclicDependency {
                cycle: members
                    .into_iter()
                    .map(|i| self.declarations[i].id().clone())
                    .collect(),
            });
        }

        let mut senders = Vec::with_capacity(count);
        for declaration in &self.declarations {
            senders.push(self.slots.remove(declaration.id()).map(|slot| slot.sender));
        }

        let nodes = self
            .declarations
            .into_iter()
            .zip(dependencies.into_iter().zip(dependents))
            .map(|(declaration, (dependencies, dependents))| GraphNode {
                declaration,
                dependencies,
                dependents,
            })
            .collect();

        Ok(ResourceGraph {
            nodes,
            index: self.index,
            senders,
        })
    }

    fn slot(&mut self, id: &ResourceId) -> &OutputSlot {
        self.slots.entry(id.clone()).or_insert_with(|| {
            let (sender, receiver) = oneshot::channel();
            let owner = id.clone();
            let future = async move {
                match receiver.await {
                    Ok(result) => result,
                    Err(_) => Err(DeferredError::unresolved(
                        &owner,
                        "resolution ended before the resource was realized",
                    )),
                }
            }
            .boxed();
            OutputSlot {
                sender,
                deferred: Deferred::from_future(future, BTreeSet::from([id.clone()])),
            }
        })
    }
}

impl std::fmt::Debug for GraphBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphBuilder")
            .field("declarations", &self.declarations.len())
            .field("references", &self.slots.len())
            .finish()
    }
}

/// One validated node of the graph.
#[derive(Debug)]
pub(crate) struct GraphNode {
    pub(crate) declaration: ResourceDeclaration,
    /// Indices of declarations this node waits on, ascending.
    pub(crate) dependencies: Vec<usize>,
    /// Indices of declarations waiting on this node, ascending.
    pub(crate) dependents: Vec<usize>,
}

/// A validated, acyclic set of declarations ready for resolution.
#[derive(Debug)]
pub struct ResourceGraph {
    pub(crate) nodes: Vec<GraphNode>,
    index: HashMap<ResourceId, usize>,
    pub(crate) senders: Vec<Option<ResolvedSender>>,
}

impl ResourceGraph {
    /// Number of declarations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no declarations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns a declaration by identity.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&ResourceDeclaration> {
        self.index.get(id).map(|&i| &self.nodes[i].declaration)
    }

    /// Returns true if `id` is declared.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    /// Declarations in insertion order.
    pub fn declarations(&self) -> impl Iterator<Item = &ResourceDeclaration> {
        self.nodes.iter().map(|n| &n.declaration)
    }

    /// Direct dependencies of `id`, in declaration order.
    #[must_use]
    pub fn dependencies_of(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.index.get(id).map_or_else(Vec::new, |&i| {
            self.nodes[i]
                .dependencies
                .iter()
                .map(|&j| self.nodes[j].declaration.id())
                .collect()
        })
    }

    /// Groups declarations into waves: every member of a wave depends only
    /// on members of earlier waves. Within a wave, declaration order is kept.
    #[must_use]
    pub fn waves(&self) -> Vec<Vec<&ResourceDeclaration>> {
        let mut remaining: Vec<usize> = self.nodes.iter().map(|n| n.dependencies.len()).collect();
        let mut current: Vec<usize> = (0..self.nodes.len()).filter(|&i| remaining[i] == 0).collect();
        let mut waves = Vec::new();

        while !current.is_empty() {
            let mut next = Vec::new();
            for &i in &current {
                for &d in &self.nodes[i].dependents {
                    remaining[d] -= 1;
                    if remaining[d] == 0 {
                        next.push(d);
                    }
                }
            }
            next.sort_unstable();
            waves.push(current.iter().map(|&i| &self.nodes[i].declaration).collect());
            current = next;
        }

        waves
    }

    /// A creation order consistent with every dependency.
    #[must_use]
    pub fn topological_order(&self) -> Vec<&ResourceDeclaration> {
        self.waves().into_iter().flatten().collect()
    }
}
