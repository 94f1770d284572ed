// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end behaviour of the workspace: caching, invalidation, transactions
//! and undo across the built-in node sets.

use ordoplay_dataflow::error::FailureCause;
use ordoplay_dataflow::graphs::create_builtin_registry;
use ordoplay_dataflow::{
    Endpoint, GraphConfig, GraphError, GraphId, NodeId, Transaction, Value, Workspace,
    WorkspaceConfig, PROPERTIES_OUTPUT,
};

fn workspace() -> Workspace {
    workspace_with(WorkspaceConfig::default())
}

fn workspace_with(config: WorkspaceConfig) -> Workspace {
    Workspace::new(create_builtin_registry().unwrap(), config)
}

fn no_properties() -> Vec<(String, Value)> {
    Vec::new()
}

fn constant(ws: &Workspace, graph: GraphId, value: f64) -> NodeId {
    ws.create_node(graph, "constant", [("value", Value::Float(value))]).unwrap()
}

fn scale_of(ws: &Workspace, graph: GraphId, source: NodeId) -> NodeId {
    let node = ws.create_node(graph, "scale", no_properties()).unwrap();
    ws.connect(source, "out", node, "in").unwrap();
    node
}

fn resource(ws: &Workspace, graph: GraphId, path: &str) -> NodeId {
    ws.create_node(graph, "resource", [("path", Value::from(path))]).unwrap()
}

fn computation_error(err: GraphError) -> ordoplay_dataflow::ComputationError {
    match err {
        GraphError::Computation(err) => err,
        other => panic!("expected a computation error, got {other:?}"),
    }
}

#[test]
fn edit_recomputes_dependent_output_once() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let x = constant(&ws, graph, 3.0);
    let x2 = scale_of(&ws, graph, x);

    assert_eq!(ws.get_or_compute(x2, "out").unwrap(), Value::Float(6.0));
    assert_eq!(ws.get_or_compute(x2, "out").unwrap(), Value::Float(6.0));
    assert_eq!(ws.computation_count(x2, "out"), 1);

    ws.set_property(x, "value", 5.0).unwrap();
    assert!(!ws.is_cached(x2, "out"));
    assert_eq!(ws.get_or_compute(x2, "out").unwrap(), Value::Float(10.0));
    assert_eq!(ws.get_or_compute(x2, "out").unwrap(), Value::Float(10.0));
    assert_eq!(ws.computation_count(x2, "out"), 2);
    assert_eq!(ws.computation_count(x, "out"), 2);
}

#[test]
fn repeated_reads_hit_the_cache() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let x = constant(&ws, graph, 1.0);

    for _ in 0..5 {
        ws.get_or_compute(x, "out").unwrap();
    }
    let stats = ws.cache_stats();
    assert_eq!(ws.computation_count(x, "out"), 1);
    assert_eq!(stats.hits, 4);
    assert_eq!(stats.entries, 1);
}

#[test]
fn mutation_invalidates_only_forward_reachable_outputs() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let x = constant(&ws, graph, 1.0);
    let y = constant(&ws, graph, 2.0);
    let x2 = scale_of(&ws, graph, x);
    let total = ws.create_node(graph, "sum", no_properties()).unwrap();
    ws.connect(x2, "out", total, "terms").unwrap();
    ws.connect(y, "out", total, "terms").unwrap();

    assert_eq!(ws.get_or_compute(total, "total").unwrap(), Value::Float(4.0));
    ws.set_property(x, "value", 10.0).unwrap();

    assert!(ws.is_cached(y, "out"));
    for (node, output) in [(x, "out"), (x2, "out"), (total, "total")] {
        assert!(!ws.is_cached(node, output), "{output} of {node} should be stale");
    }
    assert_eq!(ws.get_or_compute(total, "total").unwrap(), Value::Float(22.0));
    assert_eq!(ws.computation_count(y, "out"), 1);
}

#[test]
fn invalidate_from_evicts_start_node_and_consumers() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let x = constant(&ws, graph, 1.0);
    let x2 = scale_of(&ws, graph, x);
    ws.get_or_compute(x2, "out").unwrap();

    assert_eq!(ws.invalidate_from(x).unwrap(), 2);
    assert!(!ws.is_cached(x, "out"));
    assert!(!ws.is_cached(x2, "out"));
}

#[test]
fn sibling_outputs_are_computed_once_per_read() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let node = resource(&ws, graph, "hero.sprite");

    let outline = ws.get_or_compute(node, "outline").unwrap();
    let outline = outline.as_map().unwrap();
    assert_eq!(outline["label"], Value::from("hero.sprite"));
    assert_eq!(
        ws.get_or_compute(node, "build-targets").unwrap(),
        Value::List(vec![Value::from("hero.sprite")])
    );
    assert_eq!(ws.computation_count(node, "build-targets"), 1);
    assert_eq!(ws.computation_count(node, "save-value"), 0);
}

#[test]
fn uncached_outputs_run_on_every_request() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let total = ws.create_node(graph, "sum", no_properties()).unwrap();

    assert_eq!(ws.get_or_compute(total, "count").unwrap(), Value::Int(0));
    assert_eq!(ws.get_or_compute(total, "count").unwrap(), Value::Int(0));
    assert_eq!(ws.computation_count(total, "count"), 2);
    assert!(!ws.is_cached(total, "count"));
}

#[test]
fn evaluate_forces_a_run() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let x = constant(&ws, graph, 1.0);
    let x2 = scale_of(&ws, graph, x);

    ws.get_or_compute(x2, "out").unwrap();
    assert_eq!(ws.evaluate(x2, "out").unwrap(), Value::Float(2.0));
    assert_eq!(ws.computation_count(x2, "out"), 2);
    assert_eq!(ws.computation_count(x, "out"), 1);
}

#[test]
fn second_arc_into_single_input_is_rejected() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let a = constant(&ws, graph, 1.0);
    let b = constant(&ws, graph, 2.0);
    let target = scale_of(&ws, graph, a);
    let revision = ws.revision(graph).unwrap();

    let err = ws.connect(b, "out", target, "in").unwrap_err();
    assert_eq!(err, GraphError::CardinalityViolation(Endpoint::new(target, "in")));
    assert_eq!(ws.sources(target, "in").unwrap(), vec![Endpoint::new(a, "out")]);
    assert_eq!(ws.revision(graph).unwrap(), revision);

    // Reconnecting the same arc changes nothing
    ws.connect(a, "out", target, "in").unwrap();
    assert_eq!(ws.connections(graph).unwrap().len(), 1);
}

#[test]
fn incompatible_kinds_are_rejected() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let asset = resource(&ws, graph, "a.png");
    let target = ws.create_node(graph, "scale", no_properties()).unwrap();

    let err = ws.connect(asset, "save-value", target, "in").unwrap_err();
    assert!(matches!(err, GraphError::IncompatibleKinds { .. }));
    let err = ws.connect(asset, "nope", target, "in").unwrap_err();
    assert!(matches!(err, GraphError::SchemaViolation { .. }));
}

#[test]
fn cycle_is_reported_and_nothing_is_cached() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let a = ws.create_node(graph, "scale", no_properties()).unwrap();
    let b = scale_of(&ws, graph, a);
    let c = scale_of(&ws, graph, b);
    ws.connect(c, "out", a, "in").unwrap();

    for start in [a, b, c] {
        let err = ws.get_or_compute(start, "out").unwrap_err();
        let GraphError::CyclicDependency(path) = err else {
            panic!("expected a cycle from {start}, got {err:?}");
        };
        assert_eq!(path.first(), path.last());
        assert_eq!(path.len(), 4);
        for node in [a, b, c] {
            assert!(path.contains(&Endpoint::new(node, "out")));
            assert!(!ws.is_cached(node, "out"));
        }
    }
    assert!(matches!(ws.resolve(b, "out"), Err(GraphError::CyclicDependency(_))));
    assert_eq!(ws.cache_stats().entries, 0);
}

#[test]
fn deleted_node_disappears_from_consumers() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let x = constant(&ws, graph, 3.0);
    let total = ws.create_node(graph, "sum", no_properties()).unwrap();
    ws.connect(x, "out", total, "terms").unwrap();
    assert_eq!(ws.get_or_compute(total, "total").unwrap(), Value::Float(3.0));

    ws.delete_node(x).unwrap();
    assert!(ws.sources(total, "terms").unwrap().is_empty());
    assert!(ws.connections(graph).unwrap().is_empty());
    assert_eq!(ws.get_or_compute(total, "total").unwrap(), Value::Float(0.0));
    assert_eq!(ws.get_property(x, "value").unwrap_err(), GraphError::NodeNotFound(x));
}

#[test]
fn undo_restores_observable_state() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let x = constant(&ws, graph, 3.0);
    let a = scale_of(&ws, graph, x);
    let b = scale_of(&ws, graph, x);
    let before = ws.export_graph(graph).unwrap();
    assert_eq!(ws.get_or_compute(b, "out").unwrap(), Value::Float(6.0));

    let extra = NodeId::new();
    let transaction = Transaction::new("Rework")
        .delete_node(x)
        .create_node(extra, "constant", [("value", Value::Float(7.0))])
        .connect(extra, "out", a, "in")
        .set_property(b, "factor", 4.0);
    ws.transact(graph, transaction).unwrap();
    assert_ne!(ws.export_graph(graph).unwrap(), before);

    ws.undo(graph).unwrap();
    assert_eq!(ws.export_graph(graph).unwrap(), before);
    assert_eq!(ws.get_or_compute(b, "out").unwrap(), Value::Float(6.0));

    ws.redo(graph).unwrap();
    assert_eq!(ws.get_or_compute(a, "out").unwrap(), Value::Float(14.0));
    assert!(matches!(
        ws.get_or_compute(b, "out"),
        Err(GraphError::Computation(_))
    ));
}

#[test]
fn new_transaction_clears_redo() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let x = constant(&ws, graph, 1.0);
    ws.set_property(x, "value", 2.0).unwrap();
    ws.undo(graph).unwrap();
    assert!(ws.can_redo(graph));

    ws.set_property(x, "value", 3.0).unwrap();
    assert!(!ws.can_redo(graph));
    assert_eq!(ws.redo(graph).unwrap_err(), GraphError::NothingToRedo);
}

#[test]
fn history_conflict_leaves_graph_and_history_unchanged() {
    let ws = workspace();
    let project = ws.create_graph(GraphConfig::new("project"));
    let view = ws.create_graph(GraphConfig::new("preview"));
    ws.permit_reads(view, project).unwrap();
    let source = constant(&ws, project, 2.0);
    let total = ws.create_node(view, "sum", no_properties()).unwrap();
    ws.connect(source, "out", total, "terms").unwrap();
    ws.disconnect(source, "out", total, "terms").unwrap();

    ws.delete_graph(project).unwrap();
    let revision = ws.revision(view).unwrap();
    let err = ws.undo(view).unwrap_err();
    assert!(matches!(err, GraphError::HistoryConflict { .. }));
    assert_eq!(ws.revision(view).unwrap(), revision);
    assert!(ws.can_undo(view));
    assert!(ws.sources(total, "terms").unwrap().is_empty());
}

#[test]
fn undo_does_not_overfill_a_single_input() {
    let ws = workspace();
    let project = ws.create_graph(GraphConfig::new("project"));
    let view = ws.create_graph(GraphConfig::new("preview"));
    ws.permit_reads(view, project).unwrap();
    let a = constant(&ws, project, 1.0);
    let target = ws.create_node(view, "scale", no_properties()).unwrap();
    ws.connect(a, "out", target, "in").unwrap();
    ws.delete_node(a).unwrap();
    let d = constant(&ws, view, 4.0);
    ws.connect(d, "out", target, "in").unwrap();

    let revision = ws.revision(project).unwrap();
    let err = ws.undo(project).unwrap_err();
    let GraphError::HistoryConflict { reason, .. } = err else {
        panic!("expected a history conflict, got {err:?}");
    };
    assert_eq!(*reason, GraphError::CardinalityViolation(Endpoint::new(target, "in")));
    assert_eq!(ws.revision(project).unwrap(), revision);
    assert!(ws.can_undo(project));
    assert!(ws.nodes(project).unwrap().is_empty());
    assert_eq!(ws.sources(target, "in").unwrap(), vec![Endpoint::new(d, "out")]);
    assert_eq!(ws.get_or_compute(target, "out").unwrap(), Value::Float(8.0));

    // Once the input is free again the deletion can be undone
    ws.disconnect(d, "out", target, "in").unwrap();
    ws.undo(project).unwrap();
    assert_eq!(ws.sources(target, "in").unwrap(), vec![Endpoint::new(a, "out")]);
    assert_eq!(ws.get_or_compute(target, "out").unwrap(), Value::Float(2.0));
}

#[test]
fn deleting_a_view_keeps_project_history_usable() {
    let ws = workspace();
    let project = ws.create_graph(GraphConfig::new("project"));
    let view = ws.create_graph(GraphConfig::new("preview"));
    ws.permit_reads(view, project).unwrap();
    let a = constant(&ws, project, 2.0);
    let total = ws.create_node(view, "sum", no_properties()).unwrap();
    ws.connect(a, "out", total, "terms").unwrap();

    let view_revision = ws.revision(view).unwrap();
    ws.delete_node(a).unwrap();
    assert_eq!(ws.revision(view).unwrap(), view_revision + 1);
    assert!(ws.sources(total, "terms").unwrap().is_empty());

    ws.delete_graph(view).unwrap();
    ws.undo(project).unwrap();
    assert_eq!(ws.nodes(project).unwrap(), vec![a]);
    assert_eq!(ws.get_or_compute(a, "out").unwrap(), Value::Float(2.0));
    ws.undo(project).unwrap();
    assert!(ws.nodes(project).unwrap().is_empty());
    ws.redo(project).unwrap();
    ws.redo(project).unwrap();
    assert!(ws.nodes(project).unwrap().is_empty());
}

#[test]
fn failures_aggregate_every_root_cause() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let collection = ws.create_node(graph, "collection", no_properties()).unwrap();
    let first = resource(&ws, graph, "");
    let second = resource(&ws, graph, "");
    let fine = resource(&ws, graph, "ok.png");
    for child in [first, fine, second] {
        ws.connect(child, "outline", collection, "children").unwrap();
    }

    let err = computation_error(ws.get_or_compute(collection, "outline").unwrap_err());
    assert!(matches!(err.cause, FailureCause::Upstream(_)));
    let roots: Vec<&Endpoint> = err.root_causes().iter().map(|r| &r.endpoint).collect();
    assert_eq!(
        roots,
        [
            &Endpoint::new(first, "build-targets"),
            &Endpoint::new(second, "build-targets")
        ]
    );
    assert_eq!(err.root_causes()[0].message(), Some("resource has no path"));

    // Failures are cached like values
    ws.get_or_compute(collection, "outline").unwrap_err();
    assert_eq!(ws.computation_count(first, "build-targets"), 1);
    assert_eq!(ws.computation_count(collection, "outline"), 0);
}

#[test]
fn production_error_is_captured_per_output() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let one = constant(&ws, graph, 1.0);
    let zero = constant(&ws, graph, 0.0);
    let divide = ws.create_node(graph, "divide", no_properties()).unwrap();
    ws.connect(one, "out", divide, "numerator").unwrap();
    ws.connect(zero, "out", divide, "denominator").unwrap();
    let scaled = scale_of_output(&ws, graph, divide, "quotient");

    let err = computation_error(ws.get_or_compute(divide, "quotient").unwrap_err());
    assert_eq!(err.message(), Some("division by zero"));
    let err = computation_error(ws.get_or_compute(scaled, "out").unwrap_err());
    assert_eq!(err.root_causes()[0].endpoint, Endpoint::new(divide, "quotient"));

    ws.set_property(zero, "value", 4.0).unwrap();
    assert_eq!(ws.get_or_compute(scaled, "out").unwrap(), Value::Float(0.5));
}

fn scale_of_output(ws: &Workspace, graph: GraphId, source: NodeId, output: &str) -> NodeId {
    let node = ws.create_node(graph, "scale", no_properties()).unwrap();
    ws.connect(source, output, node, "in").unwrap();
    node
}

#[test]
fn unconnected_inputs() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let scale = ws.create_node(graph, "scale", no_properties()).unwrap();
    let total = ws.create_node(graph, "sum", no_properties()).unwrap();

    let err = computation_error(ws.get_or_compute(scale, "out").unwrap_err());
    let roots = err.root_causes();
    assert_eq!(roots[0].endpoint, Endpoint::new(scale, "in"));
    assert_eq!(roots[0].message(), Some("required input is not connected"));
    assert_eq!(ws.computation_count(scale, "out"), 0);

    assert_eq!(ws.get_or_compute(total, "total").unwrap(), Value::Float(0.0));
}

#[test]
fn derived_property_defaults() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let ratio = ws
        .create_node(graph, "ratio", [("denominator", Value::Float(4.0))])
        .unwrap();

    assert_eq!(ws.get_property(ratio, "fraction").unwrap(), Value::Float(0.25));
    assert_eq!(ws.get_or_compute(ratio, "percent").unwrap(), Value::Float(25.0));

    ws.set_property(ratio, "fraction", 0.5).unwrap();
    assert_eq!(ws.get_or_compute(ratio, "percent").unwrap(), Value::Float(50.0));

    ws.transact(
        graph,
        Transaction::new("Reset")
            .clear_property(ratio, "fraction")
            .set_property(ratio, "denominator", 0.0),
    )
    .unwrap();
    let err = computation_error(ws.get_or_compute(ratio, "percent").unwrap_err());
    assert_eq!(err.root_causes()[0].endpoint, Endpoint::new(ratio, "fraction"));

    let properties = ws.get_or_compute(ratio, PROPERTIES_OUTPUT);
    assert!(matches!(properties, Err(GraphError::Computation(_))));
}

#[test]
fn properties_output_reports_effective_values() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let node = resource(&ws, graph, "a.png");

    let properties = ws.get_or_compute(node, PROPERTIES_OUTPUT).unwrap();
    let properties = properties.as_map().unwrap();
    assert_eq!(properties["path"], Value::from("a.png"));
    assert_eq!(properties["content"], Value::Nil);
}

#[test]
fn build_targets_follow_dependencies() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let texture = resource(&ws, graph, "hero.png");
    let material = resource(&ws, graph, "hero.mat");
    let sprite = resource(&ws, graph, "hero.sprite");
    ws.connect(texture, "build-targets", material, "dependencies").unwrap();
    ws.connect(material, "build-targets", sprite, "dependencies").unwrap();
    ws.connect(texture, "build-targets", sprite, "dependencies").unwrap();

    let targets = ws.get_or_compute(sprite, "build-targets").unwrap();
    assert_eq!(
        targets,
        Value::List(vec![
            Value::from("hero.png"),
            Value::from("hero.mat"),
            Value::from("hero.sprite"),
        ])
    );
    assert_eq!(
        ws.resolve(sprite, "build-targets").unwrap().last(),
        Some(&Endpoint::new(sprite, "build-targets"))
    );
}

#[test]
fn resolve_orders_upstream_first() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let x = constant(&ws, graph, 1.0);
    let x2 = scale_of(&ws, graph, x);

    assert_eq!(
        ws.resolve(x2, "out").unwrap(),
        vec![Endpoint::new(x, "out"), Endpoint::new(x2, "out")]
    );
}

#[test]
fn bounded_cache_evicts_volatile_graphs_first() {
    let ws = workspace_with(WorkspaceConfig {
        cache_capacity: Some(2),
        ..WorkspaceConfig::default()
    });
    let project = ws.create_graph(GraphConfig::new("project"));
    let view = ws.create_graph(GraphConfig::view("preview"));
    let p = constant(&ws, project, 1.0);
    let v = constant(&ws, view, 2.0);
    let q = constant(&ws, project, 3.0);

    ws.get_or_compute(p, "out").unwrap();
    ws.get_or_compute(v, "out").unwrap();
    ws.get_or_compute(q, "out").unwrap();

    assert!(ws.is_cached(p, "out"));
    assert!(ws.is_cached(q, "out"));
    assert!(!ws.is_cached(v, "out"));
    assert_eq!(ws.cache_stats().evicted, 1);
}

#[test]
fn concurrent_reads_see_a_consistent_revision() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let x = constant(&ws, graph, 1.0);
    let y = constant(&ws, graph, 1.0);
    let total = ws.create_node(graph, "sum", no_properties()).unwrap();
    ws.connect(x, "out", total, "terms").unwrap();
    ws.connect(y, "out", total, "terms").unwrap();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..50 {
                    let total = ws.get_or_compute(total, "total").unwrap();
                    let total = total.as_float().unwrap();
                    // Both terms always move together
                    assert!(total % 2.0 == 0.0, "observed a half-applied edit: {total}");
                }
            });
        }
        scope.spawn(|| {
            for step in 2..20 {
                let value = f64::from(step);
                ws.transact(
                    graph,
                    Transaction::new("Step")
                        .set_property(x, "value", value)
                        .set_property(y, "value", value),
                )
                .unwrap();
            }
        });
    });

    assert_eq!(ws.get_or_compute(total, "total").unwrap(), Value::Float(38.0));
}

#[test]
fn try_transact_succeeds_when_idle() {
    let ws = workspace();
    let graph = ws.create_graph(GraphConfig::new("project"));
    let revision = ws
        .try_transact(graph, Transaction::new("Add").create_node(NodeId::new(), "sum", no_properties()))
        .unwrap();
    assert_eq!(revision, 1);
}

#[test]
fn demo_document_loads_and_evaluates() {
    let document =
        ordoplay_dataflow::GraphDocument::from_ron(include_str!("../../../demos/assets.ron")).unwrap();
    let ws = workspace();
    let graph = ws.load_document(&document).unwrap();
    let collection: NodeId = "0b6f6a52-6c1e-4a43-9d8e-1f3a5c7e9b03".parse().unwrap();

    assert_eq!(ws.nodes(graph).unwrap().len(), 3);
    assert_eq!(
        ws.get_or_compute(collection, "build-targets").unwrap(),
        Value::List(vec![
            Value::from("textures/hero.png"),
            Value::from("materials/hero.mat"),
        ])
    );
}
