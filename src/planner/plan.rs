//! Deployment plan types and construction.
//!
//! A plan previews what `up` would do without calling any provider. It is
//! derived from the validated graph and the recorded state: declarations
//! whose inputs are already known are hashed and compared against the
//! record, the rest are reported by what they depend on.

use chrono::{DateTime, Utc};
use futures::future::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use crate::config::ConfigHasher;
use crate::graph::{DeclarationMode, ResourceDeclaration, ResourceGraph, ResourceId};
use crate::state::{ResourceRecord, StackState};

/// A complete deployment plan.
#[derive(Debug, Serialize)]
pub struct DeploymentPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Configuration hash this plan is based on.
    pub config_hash: String,
    /// Planned actions, wave by wave.
    pub actions: Vec<PlannedAction>,
}

/// A single planned action.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedAction {
    /// Action type.
    pub action_type: ActionType,
    /// Resource the action applies to.
    pub resource: ResourceId,
    /// Wave the resource belongs to; every dependency is in an earlier wave.
    pub wave: usize,
    /// Direct dependencies.
    pub dependencies: Vec<ResourceId>,
    /// Reason for this action.
    pub reason: String,
    /// Properties as far as they are known, with secrets masked.
    pub properties: Value,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// Create a new resource.
    Create,
    /// Update a recorded resource whose inputs changed.
    Update,
    /// Re-evaluate a recorded resource once its computed inputs are known.
    Refresh,
    /// Reuse the recorded resource as is.
    Unchanged,
    /// Look up an existing resource.
    Read,
    /// Delete a recorded resource that is no longer declared.
    Delete,
}

impl DeploymentPlan {
    /// Builds a plan for `graph` against the recorded `state`.
    #[must_use]
    pub fn from_graph(
        graph: &ResourceGraph,
        state: Option<&StackState>,
        hasher: &ConfigHasher,
        config_hash: &str,
    ) -> Self {
        let mut actions = Vec::with_capacity(graph.len());
        let mut planned: HashMap<ResourceId, ActionType> = HashMap::new();

        for (wave, declarations) in graph.waves().into_iter().enumerate() {
            for declaration in declarations {
                let prior = state.and_then(|s| s.get(declaration.id()));
                let dependencies: Vec<ResourceId> = graph
                    .dependencies_of(declaration.id())
                    .into_iter()
                    .cloned()
                    .collect();
                let (action_type, reason) =
                    Self::classify(declaration, prior, &dependencies, &planned, hasher);

                planned.insert(declaration.id().clone(), action_type);
                actions.push(PlannedAction {
                    action_type,
                    resource: declaration.id().clone(),
                    wave,
                    dependencies,
                    reason,
                    properties: declaration.properties().preview(),
                });
            }
        }

        if let Some(state) = state {
            let wave = actions.iter().map(|a| a.wave + 1).max().unwrap_or(0);
            for record in orphans(graph, state) {
                actions.push(PlannedAction {
                    action_type: ActionType::Delete,
                    resource: record.id.clone(),
                    wave,
                    dependencies: record.dependencies.clone(),
                    reason: String::from("Resource removed from the stack"),
                    properties: Value::Null,
                });
            }
        }

        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            actions,
        }
    }

    fn classify(
        declaration: &ResourceDeclaration,
        prior: Option<&ResourceRecord>,
        dependencies: &[ResourceId],
        planned: &HashMap<ResourceId, ActionType>,
        hasher: &ConfigHasher,
    ) -> (ActionType, String) {
        if declaration.options().mode == DeclarationMode::Lookup {
            return (ActionType::Read, String::from("Existing resource is looked up"));
        }

        let Some(prior) = prior.filter(|p| p.mode == DeclarationMode::Managed) else {
            return (ActionType::Create, String::from("Resource declared in the stack"));
        };

        // Realize only when nothing is pending; literal and config-derived
        // inputs are available before any provider call.
        if declaration.properties().is_known()
            && let Some(Ok(properties)) = declaration.properties().realize().now_or_never()
        {
            let hash = hasher.hash_properties(&properties);
            return if ConfigHasher::hashes_match(&prior.properties_hash, &hash) {
                (ActionType::Unchanged, String::new())
            } else {
                (ActionType::Update, String::from("Inputs changed"))
            };
        }

        let changed: Vec<String> = dependencies
            .iter()
            .filter(|d| {
                matches!(
                    planned.get(*d),
                    Some(ActionType::Create | ActionType::Update)
                )
            })
            .map(ToString::to_string)
            .collect();

        if changed.is_empty() {
            (
                ActionType::Refresh,
                String::from("Inputs are computed during up"),
            )
        } else {
            (
                ActionType::Update,
                format!("Depends on changed {}", changed.join(", ")),
            )
        }
    }

    /// Returns true if the plan has no actions.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Returns true if applying the plan may change anything.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.actions
            .iter()
            .any(|a| !matches!(a.action_type, ActionType::Unchanged | ActionType::Read))
    }

    /// Returns the number of actions of a type.
    #[must_use]
    pub fn count(&self, action_type: ActionType) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count()
    }

    /// Number of waves.
    #[must_use]
    pub fn wave_count(&self) -> usize {
        self.actions.iter().map(|a| a.wave + 1).max().unwrap_or(0)
    }

    /// One-line summary, e.g. `3 to create, 1 to update, 2 unchanged`.
    #[must_use]
    pub fn summary(&self) -> String {
        let parts: Vec<String> = [
            (ActionType::Create, "to create"),
            (ActionType::Update, "to update"),
            (ActionType::Refresh, "to refresh"),
            (ActionType::Delete, "to delete"),
            (ActionType::Read, "to read"),
            (ActionType::Unchanged, "unchanged"),
        ]
        .into_iter()
        .filter_map(|(action, label)| {
            let n = self.count(action);
            (n > 0).then(|| format!("{n} {label}"))
        })
        .collect();

        if parts.is_empty() {
            String::from("nothing declared")
        } else {
            parts.join(", ")
        }
    }
}

/// Records in `state` with no declaration in `graph`, dependents first.
pub(crate) fn orphans<'a>(graph: &ResourceGraph, state: &'a StackState) -> Vec<&'a ResourceRecord> {
    let orphaned: BTreeSet<&ResourceId> = state
        .resources
        .values()
        .map(|r| &r.id)
        .filter(|id| !graph.contains(id))
        .collect();

    let mut ordered: Vec<&ResourceRecord> = state
        .resources
        .values()
        .filter(|r| orphaned.contains(&r.id))
        .collect();
    // A record is listed before anything it depends on.
    ordered.sort_by_key(|r| dependent_depth(state, &r.id, &orphaned, &mut BTreeSet::new()));
    ordered
}

/// Length of the longest chain of orphaned dependents above `id`.
fn dependent_depth(
    state: &StackState,
    id: &ResourceId,
    orphaned: &BTreeSet<&ResourceId>,
    seen: &mut BTreeSet<ResourceId>,
) -> usize {
    if !seen.insert(id.clone()) {
        return 0;
    }
    state
        .resources
        .values()
        .filter(|r| orphaned.contains(&r.id) && r.dependencies.contains(id))
        .map(|r| 1 + dependent_depth(state, &r.id, orphaned, seen))
        .max()
        .unwrap_or(0)
}

impl PlannedAction {
    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action_type {
            ActionType::Create => format!("Create {}", self.resource),
            ActionType::Update => format!("Update {}", self.resource),
            ActionType::Refresh => format!("Refresh {}", self.resource),
            ActionType::Unchanged => format!("No change for {}", self.resource),
            ActionType::Read => format!("Read {}", self.resource),
            ActionType::Delete => format!("Delete {}", self.resource),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Refresh => "refresh",
            Self::Unchanged => "unchanged",
            Self::Read => "read",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action_type, self.resource)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for DeploymentPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_changes() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Deployment Plan ({} actions):", self.actions.len())?;
        for action in &self.actions {
            writeln!(f, "  [wave {}] {action}", action.wave)?;
        }
        write!(f, "{}", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{
        DeclarationOptions, GraphBuilder, Properties, ResolveAction, ResolvedResource,
    };
    use serde_json::json;
    use std::collections::BTreeSet as Set;

    fn record_for(state: &mut StackState, id: ResourceId, properties: &Value, deps: Vec<ResourceId>) {
        state.record(&ResolvedResource {
            id,
            provider_id: String::from("p-1"),
            outputs: json!({}),
            secret_outputs: Set::new(),
            properties_hash: ConfigHasher::new().hash_properties(properties),
            mode: DeclarationMode::Managed,
            action: ResolveAction::Created,
            dependencies: deps,
            provider: None,
            parent: None,
            resolved_at: Utc::now(),
        });
    }

    fn graph() -> (ResourceGraph, ResourceId, ResourceId) {
        let mut builder = GraphBuilder::new();
        let pw = builder
            .declare(
                "random:index:RandomPassword",
                "pw",
                Properties::new().with("length", 30_i64),
                DeclarationOptions::new(),
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
        let ids = (pw.id().clone(), user.id().clone());
        (builder.build().expect("acyclic"), ids.0, ids.1)
    }

    #[test]
    fn test_fresh_stack_creates_everything() {
        let (graph, _, _) = graph();
        let plan = DeploymentPlan::from_graph(&graph, None, &ConfigHasher::new(), "h");

        assert_eq!(plan.count(ActionType::Create), 2);
        assert_eq!(plan.wave_count(), 2);
        assert_eq!(plan.actions[1].properties["password"], json!("<computed>"));
        assert_eq!(plan.summary(), "2 to create");
    }

    #[test]
    fn test_recorded_stack_is_unchanged_or_refreshed() {
        let (graph, pw, user) = graph();
        let mut state = StackState::new("p", "dev");
        record_for(&mut state, pw.clone(), &json!({ "length": 30 }), vec![]);
        record_for(&mut state, user, &json!({ "password": "x" }), vec![pw]);

        let plan = DeploymentPlan::from_graph(&graph, Some(&state), &ConfigHasher::new(), "h");
        assert_eq!(plan.actions[0].action_type, ActionType::Unchanged);
        assert_eq!(plan.actions[1].action_type, ActionType::Refresh);
        assert!(plan.has_changes());
    }

    #[test]
    fn test_changed_input_propagates_to_dependents() {
        let (graph, pw, user) = graph();
        let mut state = StackState::new("p", "dev");
        record_for(&mut state, pw.clone(), &json!({ "length": 16 }), vec![]);
        record_for(&mut state, user, &json!({ "password": "x" }), vec![pw]);

        let plan = DeploymentPlan::from_graph(&graph, Some(&state), &ConfigHasher::new(), "h");
        assert_eq!(plan.actions[0].action_type, ActionType::Update);
        assert_eq!(plan.actions[1].action_type, ActionType::Update);
        assert!(plan.actions[1].reason.contains("pw"));
    }

    #[test]
    fn test_orphans_are_deleted_dependents_first() {
        let (graph, _, _) = graph();
        let mut state = StackState::new("p", "dev");
        let base = ResourceId::new("gcp:sql:DatabaseInstance", "old");
        let top = ResourceId::new("gcp:sql:User", "old-user");
        record_for(&mut state, base.clone(), &json!({}), vec![]);
        record_for(&mut state, top.clone(), &json!({}), vec![base.clone()]);

        let plan = DeploymentPlan::from_graph(&graph, Some(&state), &ConfigHasher::new(), "h");
        let deletes: Vec<&ResourceId> = plan
            .actions
            .iter()
            .filter(|a| a.action_type == ActionType::Delete)
            .map(|a| &a.resource)
            .collect();
        assert_eq!(deletes, vec![&top, &base]);
    }
}
