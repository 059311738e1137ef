//! End-to-end tests for the delta engine against the in-memory hosts.
//!
//! Exercises the full handshake lifecycle:
//! 1. First build (implicit reset)
//! 2. Idempotent re-request with the issued sequence id
//! 3. Incremental single-module edit
//! 4. Tombstone propagation for deletions
//! 5. Desynchronized-client reset
//! 6. Strict serialization of concurrent builds
//! 7. Failure semantics (gate release, sequence id untouched)

use std::sync::Arc;

use delta_bundler::host::memory::CallLog;
use delta_bundler::{
    BundleOptions, DeltaEngine, DeltaError, DependencyEdge, IdAllocator, IdScope,
    InMemoryGraphService, InMemoryResolver, InMemoryTransformer, ModuleId, ModuleOutput,
    ModulePath, SequenceId, TransformOptions,
};
use indexmap::IndexMap;

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

type TestEngine = DeltaEngine<InMemoryGraphService, InMemoryResolver, InMemoryTransformer>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn module(path: &str, deps: &[(&str, &str)]) -> DependencyEdge {
    let dependencies: IndexMap<String, ModulePath> = deps
        .iter()
        .map(|(name, target)| (name.to_string(), ModulePath::new(*target)))
        .collect();
    DependencyEdge::new(
        ModulePath::new(path),
        dependencies,
        ModuleOutput::module(format!("__d(function(){{/*{path}*/}})"), format!("source of {path}")),
    )
}

/// Graph with entry `/entry.js` depending on leaf `/b.js`.
fn entry_and_leaf() -> Arc<InMemoryGraphService> {
    let graph = Arc::new(InMemoryGraphService::new());
    graph.set_module(module("/entry.js", &[("./b", "/b.js")]));
    graph.set_module(module("/b.js", &[]));
    graph
}

fn engine_over(graph: Arc<InMemoryGraphService>) -> TestEngine {
    DeltaEngine::new(
        graph,
        Arc::new(InMemoryResolver::new()),
        Arc::new(InMemoryTransformer::new()),
        BundleOptions::new(ModulePath::new("/entry.js")),
        IdScope::Isolated,
    )
}

// Allocator order on a fresh isolated engine: the prepend segment runs
// first (prelude, then module system), then modified paths in diff
// enumeration order (/b.js sorts before /entry.js).
const PRELUDE_ID: ModuleId = ModuleId(1000);
const MODULE_SYSTEM_ID: ModuleId = ModuleId(1001);
const B_ID: ModuleId = ModuleId(1002);
const ENTRY_ID: ModuleId = ModuleId(1003);

// ─────────────────────────────────────────────────────────────────────────────
// Handshake lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_first_build_is_a_full_reset() {
    init_tracing();
    let engine = engine_over(entry_and_leaf());

    let response = engine.get_delta(None).await.unwrap();
    assert!(response.reset);

    // Prelude first, module system second.
    let pre_ids: Vec<ModuleId> = response.pre.ids().copied().collect();
    assert_eq!(pre_ids, vec![PRELUDE_ID, MODULE_SYSTEM_ID]);

    // Main delta in allocator order: B before its dependent.
    let delta_ids: Vec<ModuleId> = response.delta.ids().copied().collect();
    assert_eq!(delta_ids, vec![B_ID, ENTRY_ID]);

    let entry = response.delta.get(&ENTRY_ID).unwrap().as_ref().unwrap();
    assert_eq!(entry.code, "__d(function(){/*/entry.js*/},1003,[1002]);");
    assert_eq!(entry.name, "entry");
    assert_eq!(entry.source, "source of /entry.js");

    // Append: the entry point's startup require, last.
    let post: Vec<_> = response.post.iter().collect();
    assert_eq!(post.len(), 1);
    assert_eq!(post[0].1.as_ref().unwrap().code, "require(1003);");
}

#[tokio::test]
async fn test_matching_sequence_id_yields_empty_delta() {
    let engine = engine_over(entry_and_leaf());

    let first = engine.get_delta(None).await.unwrap();
    let second = engine.get_delta(Some(first.id.clone())).await.unwrap();

    assert!(!second.reset);
    assert!(second.pre.is_empty());
    assert!(second.post.is_empty());
    assert!(second.delta.is_empty());
    assert_ne!(second.id, first.id);
}

#[tokio::test]
async fn test_single_module_edit_produces_minimal_delta() {
    let graph = entry_and_leaf();
    let engine = engine_over(Arc::clone(&graph));

    let first = engine.get_delta(None).await.unwrap();
    let second = engine.get_delta(Some(first.id)).await.unwrap();

    // Edit /b.js only.
    graph.set_module(module("/b.js", &[]));
    let third = engine.get_delta(Some(second.id)).await.unwrap();

    assert!(!third.reset);
    assert!(third.pre.is_empty());
    assert!(third.post.is_empty());
    let ids: Vec<ModuleId> = third.delta.ids().copied().collect();
    assert_eq!(ids, vec![B_ID]);
    // /b.js keeps the id it was assigned on the first build.
    let entry = third.delta.get(&B_ID).unwrap().as_ref().unwrap();
    assert_eq!(entry.code, "__d(function(){/*/b.js*/},1002,[]);");
}

#[tokio::test]
async fn test_deletion_propagates_a_tombstone() {
    let graph = entry_and_leaf();
    let engine = engine_over(Arc::clone(&graph));

    let first = engine.get_delta(None).await.unwrap();

    graph.remove_module(&ModulePath::new("/b.js"));
    let second = engine.get_delta(Some(first.id)).await.unwrap();

    assert!(!second.reset);
    assert_eq!(second.delta.len(), 1);
    // A tombstone pair, not an omission.
    assert_eq!(second.delta.get(&B_ID), Some(&None));
}

#[tokio::test]
async fn test_deleting_a_never_built_path_yields_no_tombstone() {
    let graph = entry_and_leaf();
    let engine = engine_over(Arc::clone(&graph));

    let first = engine.get_delta(None).await.unwrap();

    // /ghost.js never appeared in any build, so no client holds an id
    // for it; there is nothing to tombstone and nothing to fail over.
    graph.remove_module(&ModulePath::new("/ghost.js"));
    let second = engine.get_delta(Some(first.id)).await.unwrap();

    assert!(!second.reset);
    assert!(second.delta.is_empty());
}

#[tokio::test]
async fn test_stale_sequence_id_forces_reset() {
    let engine = engine_over(entry_and_leaf());

    let first = engine.get_delta(None).await.unwrap();

    // A client holding some other session's id is desynchronized.
    let stale = SequenceId::generate();
    let response = engine.get_delta(Some(stale)).await.unwrap();

    assert!(response.reset);
    assert!(!response.pre.is_empty());
    assert_eq!(response.pre.first_id(), Some(PRELUDE_ID));
    assert_ne!(response.id, first.id);
}

#[tokio::test]
async fn test_missing_sequence_id_after_build_forces_reset() {
    let engine = engine_over(entry_and_leaf());

    engine.get_delta(None).await.unwrap();
    let response = engine.get_delta(None).await.unwrap();
    assert!(response.reset);
}

// ─────────────────────────────────────────────────────────────────────────────
// Id determinism across engines
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_isolated_engines_assign_identical_ids() {
    let left = engine_over(entry_and_leaf());
    let right = engine_over(entry_and_leaf());

    let left_response = left.get_delta(None).await.unwrap();
    let right_response = right.get_delta(None).await.unwrap();

    let left_ids: Vec<ModuleId> = left_response.delta.ids().copied().collect();
    let right_ids: Vec<ModuleId> = right_response.delta.ids().copied().collect();
    assert_eq!(left_ids, right_ids);

    let left_pre: Vec<ModuleId> = left_response.pre.ids().copied().collect();
    let right_pre: Vec<ModuleId> = right_response.pre.ids().copied().collect();
    assert_eq!(left_pre, right_pre);
}

#[tokio::test]
async fn test_shared_allocator_couples_engine_instances() {
    let shared = Arc::new(IdAllocator::default());

    let first = DeltaEngine::new(
        entry_and_leaf(),
        Arc::new(InMemoryResolver::new()),
        Arc::new(InMemoryTransformer::new()),
        BundleOptions::new(ModulePath::new("/entry.js")),
        IdScope::Shared(Arc::clone(&shared)),
    );
    first.get_delta(None).await.unwrap();

    // A second engine over a disjoint graph keeps allocating past the
    // ids the first engine consumed.
    let other_graph = Arc::new(InMemoryGraphService::new());
    other_graph.set_module(module("/other.js", &[]));
    let second = DeltaEngine::new(
        other_graph,
        Arc::new(InMemoryResolver::new()),
        Arc::new(InMemoryTransformer::new()),
        BundleOptions::new(ModulePath::new("/other.js")),
        IdScope::Shared(Arc::clone(&shared)),
    );
    let response = second.get_delta(None).await.unwrap();

    let min_id = response.delta.ids().map(|id| id.value()).min().unwrap();
    assert!(min_id > ENTRY_ID.value());
    assert_eq!(
        shared.known_id(&ModulePath::new("/b.js")),
        Some(B_ID),
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Serialization of concurrent builds
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_builds_never_interleave() {
    let log = CallLog::new();
    let graph = Arc::new(InMemoryGraphService::with_log(log.clone()));
    graph.set_module(module("/entry.js", &[("./b", "/b.js")]));
    graph.set_module(module("/b.js", &[]));

    let engine = DeltaEngine::new(
        graph,
        Arc::new(InMemoryResolver::with_log(log.clone())),
        Arc::new(InMemoryTransformer::with_log(log.clone())),
        BundleOptions::new(ModulePath::new("/entry.js")),
        IdScope::Isolated,
    );

    let (first, second) = tokio::join!(engine.get_delta(None), engine.get_delta(None));
    let first = first.unwrap();
    let second = second.unwrap();

    // No coalescing: each call performed its own full computation and
    // minted its own sequence id.
    assert_ne!(first.id, second.id);

    // Whichever caller won the gate did the reset build (5 host calls);
    // the loser's diff request was only issued afterwards.
    let events = log.events();
    assert_eq!(
        events,
        vec![
            "graph.get_delta:start",
            "graph.get_delta:end",
            "resolver.synthetic:/lib/require.js",
            "transformer.read:/lib/require.js",
            "graph.get_graph",
            "graph.get_delta:start",
            "graph.get_delta:end",
        ]
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure semantics
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_minify_failure_aborts_whole_batch() {
    let graph = entry_and_leaf();
    graph.set_transform_options(TransformOptions {
        minify: true,
        ..TransformOptions::default()
    });
    let engine = engine_over(Arc::clone(&graph));

    let first = engine.get_delta(None).await.unwrap();

    let broken_graph = entry_and_leaf();
    broken_graph.set_transform_options(TransformOptions {
        minify: true,
        ..TransformOptions::default()
    });
    let transformer = Arc::new(InMemoryTransformer::new());
    transformer.fail_minify_on(ModulePath::new("/b.js"));
    let failing = DeltaEngine::new(
        broken_graph,
        Arc::new(InMemoryResolver::new()),
        transformer,
        BundleOptions::new(ModulePath::new("/entry.js")),
        IdScope::Isolated,
    );

    // The engine with the broken minifier cannot complete any build
    // that touches /b.js; no partial delta is returned.
    let err = failing.get_delta(None).await.unwrap_err();
    assert!(matches!(err, DeltaError::Minify { .. }));
    assert_eq!(failing.last_sequence_id(), None);

    // The healthy engine's handshake is untouched by the other failure.
    assert_eq!(engine.last_sequence_id(), Some(first.id));
}

#[tokio::test]
async fn test_graph_diff_failure_keeps_handshake_token() {
    let graph = entry_and_leaf();
    let engine = engine_over(Arc::clone(&graph));

    let first = engine.get_delta(None).await.unwrap();

    graph.fail_next_delta("filesystem watcher crashed");
    let err = engine.get_delta(Some(first.id.clone())).await.unwrap_err();
    assert!(matches!(err, DeltaError::GraphDiff(_)));
    assert_eq!(engine.last_sequence_id(), Some(first.id.clone()));

    // "Try again later" works: the gate was released and the old
    // sequence id still matches.
    let retry = engine.get_delta(Some(first.id)).await.unwrap();
    assert!(!retry.reset);
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot queries
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_queries_trigger_one_internal_build() {
    let engine = engine_over(entry_and_leaf());
    assert_eq!(engine.last_sequence_id(), None);

    let deps = engine
        .dependencies_of(&ModulePath::new("/entry.js"))
        .await
        .unwrap();
    assert_eq!(
        deps.into_iter().collect::<Vec<_>>(),
        vec![ModulePath::new("/b.js")]
    );
    // The query populated the graph through a real build.
    assert!(engine.last_sequence_id().is_some());
}

#[tokio::test]
async fn test_inverse_dependencies_are_keyed_by_id() {
    let engine = engine_over(entry_and_leaf());

    let inverse = engine.inverse_dependencies().await.unwrap();
    assert_eq!(inverse.get(&B_ID), Some(&vec![ENTRY_ID]));
    assert_eq!(inverse.get(&ENTRY_ID), Some(&vec![]));
}

#[tokio::test]
async fn test_query_between_edit_and_rebuild_does_not_disturb_ids() {
    // Two isolated engines fed the identical edit sequence; only one
    // answers a query between the edit and its rebuild. If the query
    // minted ids (in path-sorted snapshot order instead of diff order),
    // the two rebuilds would disagree.
    let queried_graph = entry_and_leaf();
    let queried = engine_over(Arc::clone(&queried_graph));
    let control_graph = entry_and_leaf();
    let control = engine_over(Arc::clone(&control_graph));

    let queried_seq = queried.get_delta(None).await.unwrap().id;
    let control_seq = control.get_delta(None).await.unwrap().id;

    // /z.js queued before /a.js: diff order differs from path order.
    for graph in [&queried_graph, &control_graph] {
        graph.set_module(module("/z.js", &[]));
        graph.set_module(module("/a.js", &[]));
    }

    // The new paths have no ids yet, so the query omits them.
    let inverse = queried.inverse_dependencies().await.unwrap();
    let known: Vec<ModuleId> = inverse.keys().copied().collect();
    assert_eq!(known, vec![B_ID, ENTRY_ID]);

    let queried_response = queried.get_delta(Some(queried_seq)).await.unwrap();
    let control_response = control.get_delta(Some(control_seq)).await.unwrap();

    let assigned = |response: &delta_bundler::DeltaTransformResponse| {
        response
            .delta
            .iter()
            .filter_map(|(id, entry)| entry.as_ref().map(|e| (e.path.clone(), *id)))
            .collect::<Vec<(ModulePath, ModuleId)>>()
    };
    assert_eq!(assigned(&queried_response), assigned(&control_response));
}

#[tokio::test]
async fn test_query_for_unknown_path_fails() {
    let engine = engine_over(entry_and_leaf());

    let err = engine
        .dependencies_of(&ModulePath::new("/missing.js"))
        .await
        .unwrap_err();
    assert!(matches!(err, DeltaError::EntryNotFound(_)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Teardown
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_end_delegates_to_graph_service() {
    let graph = entry_and_leaf();
    let engine = engine_over(Arc::clone(&graph));

    engine.get_delta(None).await.unwrap();
    engine.end().await;
    assert!(graph.is_ended());
    engine.end().await; // must not crash
}
