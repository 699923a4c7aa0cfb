//! Resolver behavior against a recording provider.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use halldyll_stack::error::{DeferredError, GraphError, HalldyllError, ProviderError, ResolveError};
use halldyll_stack::graph::{
    DeclarationOptions, Deferred, GraphBuilder, Properties, ResolveAction, ResourceId,
};
use halldyll_stack::planner::Resolver;
use halldyll_stack::provider::{
    DeleteRequest, Provider, ProviderRequest, ProviderResponse, ProviderResult,
};
use halldyll_stack::state::StackState;

const KIND: &str = "test:index:Thing";

/// Echoes properties as outputs and records every call.
#[derive(Default)]
struct RecordingProvider {
    calls: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
    delays: HashMap<String, Duration>,
    failing: HashSet<String>,
    panicking: HashSet<String>,
}

impl RecordingProvider {
    fn new() -> Self {
        Self::default()
    }

    fn with_delay(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }

    fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    fn panicking(mut self, name: &str) -> Self {
        self.panicking.insert(name.to_string());
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }

    fn completed(&self) -> Vec<String> {
        self.completed.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    fn name(&self) -> &str {
        "recording"
    }

    async fn create(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        let name = request.id.name.clone();
        self.calls.lock().expect("lock").push(name.clone());

        if let Some(delay) = self.delays.get(&name) {
            tokio::time::sleep(*delay).await;
        }
        assert!(!self.panicking.contains(&name), "provider bug for {name}");
        if self.failing.contains(&name) {
            return Err(ProviderError::Rejected {
                id: request.id.clone(),
                message: String::from("quota exceeded"),
            });
        }

        self.completed.lock().expect("lock").push(name.clone());
        let mut outputs = request.properties.clone();
        if let Value::Object(map) = &mut outputs {
            map.insert(String::from("id"), json!(format!("{name}-id")));
        }
        Ok(ProviderResponse::new(format!("{name}-id"), outputs))
    }

    async fn read(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        Err(ProviderError::NotFound {
            id: request.id.clone(),
        })
    }

    async fn delete(&self, _request: &DeleteRequest) -> ProviderResult<()> {
        Ok(())
    }
}

fn id(name: &str) -> ResourceId {
    ResourceId::new(KIND, name)
}

fn names(ids: &[ResourceId]) -> Vec<&str> {
    ids.iter().map(|i| i.name.as_str()).collect()
}

#[tokio::test]
async fn chain_resolves_in_dependency_order() {
    let provider = Arc::new(RecordingProvider::new());
    let mut builder = GraphBuilder::new();
    let a = builder
        .declare(KIND, "a", Properties::new().with("size", 1_i64), DeclarationOptions::new())
        .expect("a");
    let b = builder
        .declare(KIND, "b", Properties::new().with("parent", a.output("id")), DeclarationOptions::new())
        .expect("b");
    let c = builder
        .declare(KIND, "c", Properties::new().with("parent", b.output("id")), DeclarationOptions::new())
        .expect("c");

    let report = Resolver::new(provider.clone()).resolve(builder).await.expect("resolves");

    assert_eq!(provider.calls(), ["a", "b", "c"]);
    assert_eq!(report.count(ResolveAction::Created), 3);
    assert_eq!(
        c.output("parent").resolve().await.expect("known"),
        json!("b-id")
    );
}

#[tokio::test]
async fn explicit_depends_on_orders_without_data_flow() {
    let provider = Arc::new(RecordingProvider::new().with_delay("first", Duration::from_millis(20)));
    let mut builder = GraphBuilder::new();
    builder
        .declare(KIND, "second", Properties::new(), DeclarationOptions::new().depends_on(id("first")))
        .expect("second");
    builder
        .declare(KIND, "first", Properties::new(), DeclarationOptions::new())
        .expect("first");

    Resolver::new(provider.clone()).resolve(builder).await.expect("resolves");
    assert_eq!(provider.calls(), ["first", "second"]);
}

#[tokio::test]
async fn ready_declarations_are_issued_in_declaration_order() {
    let provider = Arc::new(RecordingProvider::new());
    let mut builder = GraphBuilder::new();
    for name in ["zeta", "alpha", "mid"] {
        builder
            .declare(KIND, name, Properties::new(), DeclarationOptions::new())
            .expect("declare");
    }

    Resolver::new(provider.clone()).resolve(builder).await.expect("resolves");
    assert_eq!(provider.calls(), ["zeta", "alpha", "mid"]);
}

#[tokio::test]
async fn cycle_creates_nothing() {
    let provider = Arc::new(RecordingProvider::new());
    let mut builder = GraphBuilder::new();
    let forward = builder.output(&id("b"), "id");
    let a = builder
        .declare(KIND, "a", Properties::new().with("peer", forward), DeclarationOptions::new())
        .expect("a");
    builder
        .declare(KIND, "b", Properties::new().with("peer", a.output("id")), DeclarationOptions::new())
        .expect("b");

    let err = Resolver::new(provider.clone()).resolve(builder).await.expect_err("cycle");
    assert!(matches!(
        err,
        HalldyllError::Graph(GraphError::CyclicDependency { .. })
    ));
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn duplicate_declaration_leaves_graph_unchanged() {
    let mut builder = GraphBuilder::new();
    builder
        .declare(KIND, "a", Properties::new().with("v", 1_i64), DeclarationOptions::new())
        .expect("first");

    let err = builder
        .declare(KIND, "a", Properties::new().with("v", 2_i64), DeclarationOptions::new())
        .expect_err("duplicate");

    assert_eq!(err, GraphError::Conflict { id: id("a") });
    assert_eq!(builder.len(), 1);
    let kept = builder.get(&id("a")).expect("kept");
    assert_eq!(kept.properties().preview(), json!({ "v": 1 }));
}

#[tokio::test(start_paused = true)]
async fn independent_declarations_run_concurrently() {
    let provider = Arc::new(
        RecordingProvider::new()
            .with_delay("fast", Duration::from_millis(100))
            .with_delay("slow", Duration::from_millis(300)),
    );
    let mut builder = GraphBuilder::new();
    for name in ["fast", "slow"] {
        builder
            .declare(KIND, name, Properties::new(), DeclarationOptions::new())
            .expect("declare");
    }

    let report = Resolver::new(provider.clone()).resolve(builder).await.expect("resolves");

    assert!(report.elapsed >= Duration::from_millis(300));
    assert!(report.elapsed < Duration::from_millis(400));
    assert_eq!(provider.completed(), ["fast", "slow"]);
}

#[tokio::test]
async fn failure_poisons_dependents_and_spares_siblings() {
    let provider = Arc::new(
        RecordingProvider::new()
            .failing("a")
            .with_delay("sibling", Duration::from_millis(20)),
    );
    let mut builder = GraphBuilder::new();
    let a = builder
        .declare(KIND, "a", Properties::new(), DeclarationOptions::new())
        .expect("a");
    let b = builder
        .declare(KIND, "b", Properties::new().with("parent", a.output("id")), DeclarationOptions::new())
        .expect("b");
    builder
        .declare(KIND, "c", Properties::new().with("parent", b.output("id")), DeclarationOptions::new())
        .expect("c");
    builder
        .declare(KIND, "sibling", Properties::new(), DeclarationOptions::new())
        .expect("sibling");

    let err = Resolver::new(provider.clone()).resolve(builder).await.expect_err("fails");

    let HalldyllError::Resolve(ResolveError::Aggregate {
        failed,
        poisoned,
        skipped,
    }) = err
    else {
        panic!("expected an aggregate error, got {err}");
    };
    assert!(skipped.is_empty());
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id(), &id("a"));
    let poisoned_ids: Vec<ResourceId> = poisoned.iter().map(|p| p.id.clone()).collect();
    assert_eq!(names(&poisoned_ids), ["b", "c"]);
    assert!(poisoned.iter().all(|p| p.root == id("a")));

    let calls = provider.calls();
    assert!(!calls.contains(&String::from("b")));
    assert!(!calls.contains(&String::from("c")));
    assert_eq!(provider.completed(), ["sibling"]);
    assert!(matches!(
        b.output("id").resolve().await,
        Err(DeferredError::Unresolved { .. })
    ));
}

#[tokio::test]
async fn report_keeps_partial_results() {
    let provider = Arc::new(RecordingProvider::new().failing("broken"));
    let mut builder = GraphBuilder::new();
    builder
        .declare(KIND, "ok", Properties::new(), DeclarationOptions::new())
        .expect("ok");
    builder
        .declare(KIND, "broken", Properties::new(), DeclarationOptions::new())
        .expect("broken");
    let graph = builder.build().expect("acyclic");

    let report = Resolver::new(provider).start(graph).finish().await.expect("report");

    assert!(!report.is_success());
    assert!(report.get(&id("ok")).is_some());
    assert!(report.get(&id("broken")).is_none());
    assert!(report.into_result().is_err());
}

#[tokio::test]
async fn provider_panic_is_reported_as_failure() {
    let provider = Arc::new(RecordingProvider::new().panicking("a"));
    let mut builder = GraphBuilder::new();
    let a = builder
        .declare(KIND, "a", Properties::new(), DeclarationOptions::new())
        .expect("a");
    builder
        .declare(KIND, "b", Properties::new().with("parent", a.output("id")), DeclarationOptions::new())
        .expect("b");

    let graph = builder.build().expect("acyclic");
    let report = Resolver::new(provider).start(graph).finish().await.expect("report");

    assert!(matches!(report.failures[0], ProviderError::Panicked { ref id } if id.name == "a"));
    assert_eq!(report.poisoned.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_scheduling_but_finishes_in_flight_calls() {
    let provider = Arc::new(
        RecordingProvider::new()
            .with_delay("a", Duration::from_millis(100))
            .with_delay("slow", Duration::from_millis(500)),
    );
    let mut builder = GraphBuilder::new();
    let a = builder
        .declare(KIND, "a", Properties::new(), DeclarationOptions::new())
        .expect("a");
    builder
        .declare(KIND, "b", Properties::new().with("parent", a.output("id")), DeclarationOptions::new())
        .expect("b");
    builder
        .declare(KIND, "slow", Properties::new(), DeclarationOptions::new())
        .expect("slow");
    let graph = builder.build().expect("acyclic");

    let token = CancellationToken::new();
    let resolution = Resolver::new(provider.clone())
        .with_cancellation(token.clone())
        .start(graph);

    // `a` and `slow` are in flight by now.
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    let report = resolution.finish().await.expect("report");
    assert!(report.cancelled);
    assert_eq!(report.resolved.len(), 2);
    assert_eq!(names(&report.skipped), ["b"]);
    assert_eq!(provider.completed(), ["a", "slow"]);
    assert!(!provider.calls().contains(&String::from("b")));
    assert!(matches!(
        report.into_result(),
        Err(ResolveError::Cancelled { .. })
    ));
}

#[tokio::test]
async fn combine_resolves_only_when_every_input_does() {
    let provider = Arc::new(RecordingProvider::new().failing("bad"));
    let mut builder = GraphBuilder::new();
    let x = builder
        .declare(KIND, "x", Properties::new().with("v", "x"), DeclarationOptions::new())
        .expect("x");
    let y = builder
        .declare(KIND, "y", Properties::new().with("v", "y"), DeclarationOptions::new())
        .expect("y");
    let bad = builder
        .declare(KIND, "bad", Properties::new().with("v", "bad"), DeclarationOptions::new())
        .expect("bad");
    let graph = builder.build().expect("acyclic");

    let both = Deferred::combine([y.output_string("v"), x.output_string("v")]);
    let with_bad = Deferred::combine([x.output_string("v"), bad.output_string("v")]);

    Resolver::new(provider).start(graph).finish().await.expect("report");

    assert_eq!(
        both.resolve().await,
        Ok(vec![String::from("y"), String::from("x")])
    );
    assert!(with_bad.resolve().await.is_err());
}

#[tokio::test]
async fn rerun_with_recorded_state_skips_unchanged() {
    let provider = Arc::new(RecordingProvider::new());
    let declare = |builder: &mut GraphBuilder, size: i64| {
        let a = builder
            .declare(KIND, "a", Properties::new().with("size", size), DeclarationOptions::new())
            .expect("a");
        builder
            .declare(KIND, "b", Properties::new().with("parent", a.output("id")), DeclarationOptions::new())
            .expect("b");
    };

    let mut first = GraphBuilder::new();
    declare(&mut first, 1);
    let report = Resolver::new(provider.clone()).resolve(first).await.expect("first");
    let mut state = StackState::new("test", "dev");
    for resource in &report.resolved {
        state.record(resource);
    }

    let mut second = GraphBuilder::new();
    declare(&mut second, 1);
    let report = Resolver::new(provider.clone())
        .with_prior_state(&state)
        .resolve(second)
        .await
        .expect("second");
    assert_eq!(report.count(ResolveAction::Unchanged), 2);
    assert_eq!(provider.calls().len(), 2);

    let mut third = GraphBuilder::new();
    declare(&mut third, 2);
    let report = Resolver::new(provider.clone())
        .with_prior_state(&state)
        .resolve(third)
        .await
        .expect("third");
    assert_eq!(report.count(ResolveAction::Updated), 1);
    assert_eq!(report.count(ResolveAction::Unchanged), 1);
}
